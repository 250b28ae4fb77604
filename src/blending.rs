//! Blending and sharpening of inpainted channels.
//!
//! After inpainting, every channel is mixed back with the original:
//! `out = alpha * inpainted + (1 - alpha) * original`
//!
//! The mix covers the whole image, not only the masked region, so a trace of the
//! original texture survives everywhere. A 3x3 sharpening pass then counteracts
//! the blur introduced by the two previous stages.

use image::{GrayImage, Luma};

/// Weight of the inpainted channel in the final mix.
pub const BLEND_ALPHA: f32 = 0.8;

/// Sharpening kernel: center 9, every neighbor -1.
pub const SHARPEN_KERNEL: [[i32; 3]; 3] = [[-1, -1, -1], [-1, 9, -1], [-1, -1, -1]];

/// Mix two equally sized channels: `alpha * inpainted + (1 - alpha) * original`.
///
/// Results are rounded and saturated to `[0, 255]`.
#[must_use]
pub fn blend(inpainted: &GrayImage, original: &GrayImage, alpha: f32) -> GrayImage {
    debug_assert_eq!(inpainted.dimensions(), original.dimensions());
    let beta = 1.0 - alpha;
    let mut out = GrayImage::new(inpainted.width(), inpainted.height());
    for ((dst, &a), &b) in out.iter_mut().zip(inpainted.iter()).zip(original.iter()) {
        let mixed = alpha * f32::from(a) + beta * f32::from(b);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let value = mixed.round().clamp(0.0, 255.0) as u8;
        *dst = value;
    }
    out
}

/// Mirror an index one step outside `[0, len)` back inside, excluding the edge
/// pixel itself (`dcb|abcd|cba`).
fn reflect(i: i64, len: i64) -> u32 {
    let last = len - 1;
    let r = if last == 0 {
        0
    } else if i < 0 {
        -i
    } else if i > last {
        2 * last - i
    } else {
        i
    };
    u32::try_from(r.clamp(0, last)).unwrap_or(0)
}

/// Convolve a channel with a 3x3 integer kernel, saturating to `[0, 255]`.
#[must_use]
pub fn convolve3x3(channel: &GrayImage, kernel: &[[i32; 3]; 3]) -> GrayImage {
    let (w, h) = channel.dimensions();
    let (wl, hl) = (i64::from(w), i64::from(h));
    GrayImage::from_fn(w, h, |x, y| {
        let mut acc = 0_i32;
        for (ky, row) in kernel.iter().enumerate() {
            let sy = reflect(i64::from(y) + ky as i64 - 1, hl);
            for (kx, &k) in row.iter().enumerate() {
                let sx = reflect(i64::from(x) + kx as i64 - 1, wl);
                acc += k * i32::from(channel.get_pixel(sx, sy)[0]);
            }
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let value = acc.clamp(0, 255) as u8;
        Luma([value])
    })
}

/// Apply [`SHARPEN_KERNEL`] to a channel.
#[must_use]
pub fn sharpen(channel: &GrayImage) -> GrayImage {
    convolve3x3(channel, &SHARPEN_KERNEL)
}
