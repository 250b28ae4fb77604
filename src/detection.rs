//! Watermark region detection.
//!
//! Candidate watermark pixels are found on the grayscale image in five steps:
//! 1. **Adaptive threshold**: Gaussian local mean minus an offset, inverted
//! 2. **Morphological cleanup**: close (fill gaps) followed by open (drop specks)
//! 3. **Connected components**: 8-connected labelling of the cleaned binary image
//! 4. **Area filter**: keep components with `min_area < area < ratio * total`
//! 5. **Dilation**: grow the kept components so the mask covers their edges

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::debug;

/// Side length of the adaptive threshold neighborhood.
pub const THRESHOLD_BLOCK_SIZE: u32 = 25;
/// Constant subtracted from the local mean.
pub const THRESHOLD_OFFSET: f32 = 15.0;
/// Components must be strictly larger than this many pixels.
pub const MIN_COMPONENT_AREA: u32 = 100;
/// Components must be strictly smaller than this fraction of the image.
pub const MAX_COMPONENT_RATIO: f64 = 0.3;
/// Iterations of 3x3 dilation applied to the final mask.
pub const MASK_DILATE_ITERATIONS: u8 = 2;

/// Chebyshev radius of the 3x3 rectangular structuring element.
const STRUCTURING_RADIUS: u8 = 1;
/// Foreground value in binary images and masks.
const FOREGROUND: u8 = 255;

/// Label image produced by connected-component analysis.
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Tunable parameters of the detection stages.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    /// Adaptive threshold block size (odd; even values behave like the next odd size).
    pub block_size: u32,
    /// Offset subtracted from the Gaussian local mean.
    pub offset: f32,
    /// Exclusive lower bound on component area.
    pub min_area: u32,
    /// Exclusive upper bound on component area, as a fraction of the pixel count.
    pub max_area_ratio: f64,
    /// Number of 3x3 dilation passes over the final mask.
    pub dilate_iterations: u8,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            block_size: THRESHOLD_BLOCK_SIZE,
            offset: THRESHOLD_OFFSET,
            min_area: MIN_COMPONENT_AREA,
            max_area_ratio: MAX_COMPONENT_RATIO,
            dilate_iterations: MASK_DILATE_ITERATIONS,
        }
    }
}

/// A connected foreground region of the cleaned binary image.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Label id (always >= 1; 0 is background).
    pub label: u32,
    /// Number of pixels in the component.
    pub area: u32,
    /// Mean `(x, y)` position of the component's pixels.
    pub centroid: (f64, f64),
}

/// Output of the detection stages.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Dilated watermark mask (0 or 255), same size as the input.
    pub mask: GrayImage,
    /// Every labelled component, before area filtering.
    pub components: Vec<Component>,
    /// Number of components that passed the area filter.
    pub kept: usize,
}

impl Detection {
    /// A detection that selects nothing on a `width`x`height` image.
    #[must_use]
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::new(width, height),
            components: Vec::new(),
            kept: 0,
        }
    }

    /// Number of mask pixels marked for inpainting.
    #[must_use]
    pub fn masked_pixels(&self) -> usize {
        self.mask.iter().filter(|&&v| v != 0).count()
    }

    /// Whether the mask selects nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mask.iter().all(|&v| v == 0)
    }
}

/// Convert an RGB image to grayscale.
///
/// Uses luminance formula: `0.299*R + 0.587*G + 0.114*B`, rounded.
#[must_use]
pub fn to_grayscale(img: &RgbImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let px = img.get_pixel(x, y);
        let lum = 0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2]);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let value = lum.round().clamp(0.0, 255.0) as u8;
        Luma([value])
    })
}

/// Grayscale view of any image.
///
/// One- and two-channel images pass through as their luma channel; everything
/// else goes through [`to_grayscale`].
#[must_use]
pub fn grayscale(image: &DynamicImage) -> GrayImage {
    if image.color().channel_count() <= 2 {
        image.to_luma8()
    } else {
        to_grayscale(&image.to_rgb8())
    }
}

/// Normalized 1D Gaussian kernel for a given block size.
///
/// Sigma follows the usual block-size rule: `0.3 * ((size - 1) * 0.5 - 1) + 0.8`.
fn gaussian_kernel(block_size: u32) -> Vec<f32> {
    let radius = i64::from(block_size / 2);
    #[allow(clippy::cast_precision_loss)]
    let sigma = 0.3 * ((2 * radius) as f32 * 0.5 - 1.0) + 0.8;
    let scale = -0.5 / (sigma * sigma);

    #[allow(clippy::cast_precision_loss)]
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| ((i * i) as f32 * scale).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Clamp a possibly out-of-range index to `[0, len)` (replicated border).
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn replicate(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Gaussian-weighted local mean of every pixel, with a replicated border.
fn gaussian_mean(gray: &GrayImage, block_size: u32) -> Vec<f32> {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    let kernel = gaussian_kernel(block_size);
    #[allow(clippy::cast_possible_wrap)]
    let radius = (kernel.len() / 2) as isize;
    let src = gray.as_raw();

    let mut horizontal = vec![0.0_f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0_f32;
            for (i, &k) in kernel.iter().enumerate() {
                #[allow(clippy::cast_possible_wrap)]
                let sx = replicate(x as isize + i as isize - radius, w);
                acc += k * f32::from(src[y * w + sx]);
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut mean = vec![0.0_f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0_f32;
            for (i, &k) in kernel.iter().enumerate() {
                #[allow(clippy::cast_possible_wrap)]
                let sy = replicate(y as isize + i as isize - radius, h);
                acc += k * horizontal[sy * w + x];
            }
            mean[y * w + x] = acc;
        }
    }
    mean
}

/// Inverted adaptive threshold.
///
/// A pixel becomes foreground (255) when its intensity is at or below the
/// rounded Gaussian local mean minus `offset`; everything else becomes 0.
#[must_use]
pub fn adaptive_threshold(gray: &GrayImage, block_size: u32, offset: f32) -> GrayImage {
    let mean = gaussian_mean(gray, block_size);
    let mut binary = GrayImage::new(gray.width(), gray.height());
    for ((dst, &src), &m) in binary.iter_mut().zip(gray.iter()).zip(mean.iter()) {
        if f32::from(src) <= m.round() - offset {
            *dst = FOREGROUND;
        }
    }
    binary
}

/// Close then open with the 3x3 rectangle.
///
/// Closing first fills small gaps so that opening does not tear thin strokes apart.
#[must_use]
pub fn clean_binary(binary: &GrayImage) -> GrayImage {
    let closed = morphology::close(binary, Norm::LInf, STRUCTURING_RADIUS);
    morphology::open(&closed, Norm::LInf, STRUCTURING_RADIUS)
}

/// Label 8-connected foreground regions. Background pixels get label 0.
#[must_use]
pub fn label_components(binary: &GrayImage) -> LabelImage {
    connected_components(binary, Connectivity::Eight, Luma([0u8]))
}

/// Area and centroid of every non-background label.
#[must_use]
pub fn component_stats(labels: &LabelImage) -> Vec<Component> {
    let max_label = labels.iter().copied().max().unwrap_or(0) as usize;
    // (area, sum_x, sum_y) per label
    let mut acc = vec![(0_u32, 0_u64, 0_u64); max_label + 1];
    for (x, y, px) in labels.enumerate_pixels() {
        let label = px[0] as usize;
        if label == 0 {
            continue;
        }
        let entry = &mut acc[label];
        entry.0 += 1;
        entry.1 += u64::from(x);
        entry.2 += u64::from(y);
    }

    acc.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, (area, _, _))| *area > 0)
        .map(|(label, &(area, sum_x, sum_y))| {
            #[allow(clippy::cast_precision_loss)]
            let centroid = (
                sum_x as f64 / f64::from(area),
                sum_y as f64 / f64::from(area),
            );
            #[allow(clippy::cast_possible_truncation)]
            let label = label as u32;
            Component {
                label,
                area,
                centroid,
            }
        })
        .collect()
}

/// Area filter: `min_area < area < max_area_ratio * total_pixels`, both strict.
#[must_use]
pub fn area_in_range(area: u32, total_pixels: u64, min_area: u32, max_area_ratio: f64) -> bool {
    #[allow(clippy::cast_precision_loss)]
    let upper = total_pixels as f64 * max_area_ratio;
    area > min_area && f64::from(area) < upper
}

/// Build the undilated mask from a cleaned binary image.
///
/// Returns the mask, every component found and the number kept.
#[must_use]
pub fn mask_from_components(
    binary: &GrayImage,
    min_area: u32,
    max_area_ratio: f64,
) -> (GrayImage, Vec<Component>, usize) {
    let labels = label_components(binary);
    let components = component_stats(&labels);
    let total = u64::from(binary.width()) * u64::from(binary.height());

    let max_label = components.last().map_or(0, |c| c.label as usize);
    let mut keep = vec![false; max_label + 1];
    let mut kept = 0;
    for c in &components {
        if area_in_range(c.area, total, min_area, max_area_ratio) {
            keep[c.label as usize] = true;
            kept += 1;
        }
    }

    let mut mask = GrayImage::new(binary.width(), binary.height());
    for (dst, label) in mask.iter_mut().zip(labels.iter()) {
        if keep.get(*label as usize).copied().unwrap_or(false) {
            *dst = FOREGROUND;
        }
    }

    (mask, components, kept)
}

/// Grow a mask by `iterations` passes of the 3x3 rectangle.
#[must_use]
pub fn dilate_mask(mask: &GrayImage, iterations: u8) -> GrayImage {
    if iterations == 0 {
        return mask.clone();
    }
    // k passes of a radius-1 square equal one pass of radius k under L-infinity.
    morphology::dilate(mask, Norm::LInf, iterations * STRUCTURING_RADIUS)
}

/// Run every detection stage on a grayscale image.
#[must_use]
pub fn detect_watermark(gray: &GrayImage, params: &DetectionParams) -> Detection {
    let binary = adaptive_threshold(gray, params.block_size, params.offset);
    let cleaned = clean_binary(&binary);
    let (mask, components, kept) =
        mask_from_components(&cleaned, params.min_area, params.max_area_ratio);
    let mask = dilate_mask(&mask, params.dilate_iterations);

    let detection = Detection {
        mask,
        components,
        kept,
    };
    debug!(
        components = detection.components.len(),
        kept = detection.kept,
        masked = detection.masked_pixels(),
        "watermark detection finished"
    );
    detection
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_on_white(size: u32, x0: u32, y0: u32, side: u32, value: u8) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y) {
                Luma([value])
            } else {
                Luma([255])
            }
        })
    }

    /// Binary image with a filled `w x h` rectangle at (x0, y0).
    fn binary_rect(width: u32, height: u32, x0: u32, y0: u32, w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if (x0..x0 + w).contains(&x) && (y0..y0 + h).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn grayscale_uses_bt601_weights() {
        let mut img = RgbImage::new(3, 1);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        img.put_pixel(1, 0, image::Rgb([0, 255, 0]));
        img.put_pixel(2, 0, image::Rgb([200, 200, 200]));
        let gray = to_grayscale(&img);
        assert_eq!(gray.get_pixel(0, 0)[0], 76);
        assert_eq!(gray.get_pixel(1, 0)[0], 150);
        assert_eq!(gray.get_pixel(2, 0)[0], 200);
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(25);
        assert_eq!(k.len(), 25);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for i in 0..12 {
            assert!((k[i] - k[24 - i]).abs() < 1e-7);
        }
        assert!(k[12] > k[11]);
    }

    #[test]
    fn threshold_of_uniform_image_is_empty() {
        let gray = GrayImage::from_pixel(40, 30, Luma([90]));
        let binary = adaptive_threshold(&gray, 25, 15.0);
        assert!(binary.iter().all(|&v| v == 0));
    }

    #[test]
    fn threshold_marks_dark_edge_of_gray_square() {
        let gray = square_on_white(200, 50, 50, 100, 200);
        let binary = adaptive_threshold(&gray, 25, 15.0);
        // Three-pixel band just inside the square's left edge
        for x in 50..=52 {
            assert_eq!(binary.get_pixel(x, 100)[0], 255, "x={x}");
        }
        // Square interior and white background stay background
        assert_eq!(binary.get_pixel(100, 100)[0], 0);
        assert_eq!(binary.get_pixel(49, 100)[0], 0);
        assert_eq!(binary.get_pixel(10, 10)[0], 0);
    }

    #[test]
    fn open_removes_isolated_specks() {
        let mut binary = GrayImage::new(20, 20);
        binary.put_pixel(5, 5, Luma([255]));
        binary.put_pixel(14, 3, Luma([255]));
        let cleaned = clean_binary(&binary);
        assert!(cleaned.iter().all(|&v| v == 0));
    }

    #[test]
    fn close_fills_single_pixel_gap() {
        let mut binary = binary_rect(30, 30, 5, 5, 20, 10);
        binary.put_pixel(15, 10, Luma([0]));
        let cleaned = clean_binary(&binary);
        assert_eq!(cleaned.get_pixel(15, 10)[0], 255);
    }

    #[test]
    fn components_use_eight_connectivity() {
        let mut binary = GrayImage::new(6, 6);
        binary.put_pixel(1, 1, Luma([255]));
        binary.put_pixel(2, 2, Luma([255]));
        binary.put_pixel(5, 5, Luma([255]));
        let labels = label_components(&binary);
        let stats = component_stats(&labels);
        assert_eq!(stats.len(), 2);
        let mut areas: Vec<u32> = stats.iter().map(|c| c.area).collect();
        areas.sort_unstable();
        assert_eq!(areas, vec![1, 2]);
        assert!(stats.iter().all(|c| c.label >= 1));
    }

    #[test]
    fn component_centroid_is_mean_position() {
        let binary = binary_rect(20, 20, 4, 6, 4, 2);
        let stats = component_stats(&label_components(&binary));
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].area, 8);
        assert!((stats[0].centroid.0 - 5.5).abs() < 1e-9);
        assert!((stats[0].centroid.1 - 6.5).abs() < 1e-9);
    }

    #[test]
    fn area_filter_bounds_are_strict() {
        assert!(!area_in_range(100, 10_000, 100, 0.3));
        assert!(area_in_range(101, 10_000, 100, 0.3));
        assert!(!area_in_range(300, 1_000, 100, 0.3));
        assert!(area_in_range(299, 1_000, 100, 0.3));
    }

    #[test]
    fn component_of_exactly_min_area_is_excluded() {
        let binary = binary_rect(60, 60, 10, 10, 10, 10);
        let (mask, components, kept) = mask_from_components(&binary, 100, 0.3);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].area, 100);
        assert_eq!(kept, 0);
        assert!(mask.iter().all(|&v| v == 0));

        let binary = binary_rect(60, 60, 10, 10, 11, 10);
        let (mask, _, kept) = mask_from_components(&binary, 100, 0.3);
        assert_eq!(kept, 1);
        assert_eq!(mask.iter().filter(|&&v| v == 255).count(), 110);
    }

    #[test]
    fn component_of_exactly_max_ratio_is_excluded() {
        // 40x25 = 1000 pixels, so the upper bound is 300
        let binary = binary_rect(40, 25, 0, 0, 20, 15);
        let (_, components, kept) = mask_from_components(&binary, 0, 0.3);
        assert_eq!(components[0].area, 300);
        assert_eq!(kept, 0);

        let binary = binary_rect(40, 25, 0, 0, 23, 13);
        let (_, _, kept) = mask_from_components(&binary, 0, 0.3);
        assert_eq!(kept, 1);
    }

    #[test]
    fn dilation_grows_mask_by_iterations() {
        let mut mask = GrayImage::new(11, 11);
        mask.put_pixel(5, 5, Luma([255]));
        let grown = dilate_mask(&mask, 2);
        assert_eq!(grown.iter().filter(|&&v| v == 255).count(), 25);
        assert_eq!(grown.get_pixel(3, 3)[0], 255);
        assert_eq!(grown.get_pixel(2, 5)[0], 0);

        assert_eq!(dilate_mask(&mask, 0), mask);
    }

    #[test]
    fn detect_finds_gray_square_edge() {
        let gray = square_on_white(200, 50, 50, 100, 200);
        let detection = detect_watermark(&gray, &DetectionParams::default());

        assert_eq!(detection.kept, 1);
        assert!(!detection.is_empty());
        // Band plus two dilation passes on either side
        for x in 48..=54 {
            assert_eq!(detection.mask.get_pixel(x, 100)[0], 255, "x={x}");
        }
        assert_eq!(detection.mask.get_pixel(100, 100)[0], 0);
        assert_eq!(detection.mask.get_pixel(10, 10)[0], 0);
    }

    #[test]
    fn detect_on_uniform_image_is_empty() {
        let gray = GrayImage::from_pixel(64, 48, Luma([255]));
        let detection = detect_watermark(&gray, &DetectionParams::default());
        assert!(detection.is_empty());
        assert_eq!(detection.masked_pixels(), 0);
        assert!(detection.components.is_empty());
    }
}
