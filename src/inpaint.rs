//! Navier-Stokes style inpainting of a single channel.
//!
//! Masked pixels are filled from the outside in. A fast-marching front orders
//! the pixels by their distance to the known region; each pixel reached by the
//! front is estimated from the known pixels within `radius`, weighting every
//! neighbor by its closeness and by how well the offset to it follows the
//! local isophote (the direction of constant intensity). Intensity is thereby
//! transported along level lines into the hole, as in fluid-dynamics inpainting.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use image::GrayImage;

/// Pixel state during the march.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Original or already-finalized value.
    Known,
    /// On the front; value estimated, arrival time fixed.
    Band,
    /// Still to be filled.
    Inside,
}

/// Arrival time assigned to pixels the front has not reached.
const FAR_AWAY: f32 = 1.0e6;
/// Weight floor for neighbors without a usable gradient.
const FLAT_DIRECTION: f32 = 1.0e-6;

/// Front entry ordered by arrival time, then by insertion order.
#[derive(Debug, Clone, Copy)]
struct FrontPixel {
    arrival: f32,
    order: u64,
    index: usize,
}

impl PartialEq for FrontPixel {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontPixel {}

impl PartialOrd for FrontPixel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontPixel {
    // Reversed so `BinaryHeap` pops the earliest arrival first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .arrival
            .total_cmp(&self.arrival)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Working state shared by the march and the estimator.
struct Field<'a> {
    width: usize,
    height: usize,
    values: &'a mut [u8],
    states: Vec<State>,
    arrival: Vec<f32>,
}

impl Field<'_> {
    fn index(&self, x: isize, y: isize) -> Option<usize> {
        let x = usize::try_from(x).ok()?;
        let y = usize::try_from(y).ok()?;
        (x < self.width && y < self.height).then(|| y * self.width + x)
    }

    /// Value at `(x, y)` if it lies in the image and is not waiting to be filled.
    fn known_value(&self, x: isize, y: isize) -> Option<f32> {
        self.index(x, y)
            .filter(|&i| self.states[i] != State::Inside)
            .map(|i| f32::from(self.values[i]))
    }

    /// Arrival time at `(x, y)` if the front has already passed it.
    fn known_arrival(&self, x: isize, y: isize) -> Option<f32> {
        self.index(x, y)
            .filter(|&i| self.states[i] != State::Inside)
            .map(|i| self.arrival[i])
    }

    /// Eikonal update from one horizontal and one vertical neighbor.
    fn solve(&self, a: (isize, isize), b: (isize, isize)) -> f32 {
        match (self.known_arrival(a.0, a.1), self.known_arrival(b.0, b.1)) {
            (Some(ta), Some(tb)) => {
                let diff = ta - tb;
                if diff.abs() >= 1.0 {
                    1.0 + ta.min(tb)
                } else {
                    (ta + tb + (2.0 - diff * diff).sqrt()) * 0.5
                }
            }
            (Some(t), None) | (None, Some(t)) => 1.0 + t,
            (None, None) => 1.0 + FAR_AWAY,
        }
    }

    fn arrival_time(&self, x: isize, y: isize) -> f32 {
        self.solve((x, y - 1), (x - 1, y))
            .min(self.solve((x, y + 1), (x - 1, y)))
            .min(self.solve((x, y - 1), (x + 1, y)))
            .min(self.solve((x, y + 1), (x + 1, y)))
    }

    /// Intensity gradient at a known pixel, from known neighbors only.
    fn gradient(&self, x: isize, y: isize) -> (f32, f32) {
        let Some(center) = self.known_value(x, y) else {
            return (0.0, 0.0);
        };
        let diff = |fwd: Option<f32>, back: Option<f32>| match (fwd, back) {
            (Some(f), Some(b)) => (f - b) * 0.5,
            (Some(f), None) => f - center,
            (None, Some(b)) => center - b,
            (None, None) => 0.0,
        };
        let gx = diff(self.known_value(x + 1, y), self.known_value(x - 1, y));
        let gy = diff(self.known_value(x, y + 1), self.known_value(x, y - 1));
        (gx, gy)
    }

    /// Weighted estimate of the pixel at `(x, y)` from known neighbors.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn estimate(&self, x: isize, y: isize, radius: isize) -> u8 {
        let mut sum = 0.0_f32;
        let mut weight_sum = 1.0e-20_f32;

        for ny in (y - radius)..=(y + radius) {
            for nx in (x - radius)..=(x + radius) {
                let (dx, dy) = (nx - x, ny - y);
                let dist_sq = dx * dx + dy * dy;
                if dist_sq == 0 || dist_sq > radius * radius {
                    continue;
                }
                let Some(value) = self.known_value(nx, ny) else {
                    continue;
                };

                #[allow(clippy::cast_precision_loss)]
                let (rx, ry, len_sq) = (dx as f32, dy as f32, dist_sq as f32);
                let closeness = 1.0 / (len_sq + 1.0);

                let (gx, gy) = self.gradient(nx, ny);
                let grad_len = (gx * gx + gy * gy).sqrt();
                let direction = if grad_len > 0.0 {
                    // isophote = gradient rotated by 90 degrees
                    let along = (rx * -gy + ry * gx).abs() / (len_sq.sqrt() * grad_len);
                    along.max(FLAT_DIRECTION)
                } else {
                    FLAT_DIRECTION
                };

                let weight = closeness * direction;
                sum += weight * value;
                weight_sum += weight;
            }
        }

        (sum / weight_sum).round().clamp(0.0, 255.0) as u8
    }
}

/// Inpaint the pixels of `channel` where `mask` is non-zero.
///
/// Pixels outside the mask are copied unchanged. `radius` bounds the
/// neighborhood used to estimate each filled pixel. The mask must have the same
/// dimensions as the channel; an empty mask returns an exact copy.
#[must_use]
pub fn inpaint_ns(channel: &GrayImage, mask: &GrayImage, radius: u32) -> GrayImage {
    debug_assert_eq!(channel.dimensions(), mask.dimensions());
    let mut out = channel.clone();
    if mask.iter().all(|&v| v == 0) {
        return out;
    }

    let width = channel.width() as usize;
    let height = channel.height() as usize;
    let states: Vec<State> = mask
        .iter()
        .map(|&m| if m == 0 { State::Known } else { State::Inside })
        .collect();
    let arrival: Vec<f32> = states
        .iter()
        .map(|&s| if s == State::Inside { FAR_AWAY } else { 0.0 })
        .collect();

    let values: &mut [u8] = &mut out;
    let mut field = Field {
        width,
        height,
        values,
        states,
        arrival,
    };
    #[allow(clippy::cast_possible_wrap)]
    let radius = radius.max(1) as isize;

    let mut heap = BinaryHeap::new();
    let mut order = 0_u64;

    // Initial front: known pixels touching the hole.
    for idx in 0..width * height {
        if field.states[idx] != State::Known {
            continue;
        }
        #[allow(clippy::cast_possible_wrap)]
        let (x, y) = ((idx % width) as isize, (idx / width) as isize);
        let touches_hole = [(x + 1, y), (x - 1, y), (x, y + 1), (x, y - 1)]
            .iter()
            .any(|&(nx, ny)| {
                field
                    .index(nx, ny)
                    .is_some_and(|n| field.states[n] == State::Inside)
            });
        if touches_hole {
            field.states[idx] = State::Band;
            heap.push(FrontPixel {
                arrival: 0.0,
                order,
                index: idx,
            });
            order += 1;
        }
    }

    while let Some(front) = heap.pop() {
        field.states[front.index] = State::Known;
        #[allow(clippy::cast_possible_wrap)]
        let (x, y) = (
            (front.index % width) as isize,
            (front.index / width) as isize,
        );

        for (nx, ny) in [(x, y - 1), (x - 1, y), (x, y + 1), (x + 1, y)] {
            let Some(n) = field.index(nx, ny) else {
                continue;
            };
            if field.states[n] != State::Inside {
                continue;
            }

            let t = field.arrival_time(nx, ny);
            field.arrival[n] = t;
            let value = field.estimate(nx, ny, radius);
            field.values[n] = value;
            field.states[n] = State::Band;
            heap.push(FrontPixel {
                arrival: t,
                order,
                index: n,
            });
            order += 1;
        }
    }

    out
}
