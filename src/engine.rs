//! Core watermark removal engine.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageError, ImageFormat, RgbImage};
use tracing::{debug, info, warn};

use crate::blending;
use crate::detection::{self, Detection, DetectionParams};
use crate::error::{Error, Result};
use crate::inpaint;

/// Prefix given to derived output file names.
pub const OUTPUT_PREFIX: &str = "nowatermark_";

/// Output extensions kept as-is; anything else becomes `.png`.
const OUTPUT_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Options controlling the removal pipeline and output encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOptions {
    /// Parameters of the detection stages.
    pub detection: DetectionParams,
    /// Neighborhood radius used when inpainting each pixel.
    pub inpaint_radius: u32,
    /// Weight of the inpainted image in the final blend (0.0-1.0).
    pub blend_alpha: f32,
    /// JPEG quality (1-100) for JPEG outputs.
    pub jpeg_quality: u8,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            detection: DetectionParams::default(),
            inpaint_radius: 3,
            blend_alpha: blending::BLEND_ALPHA,
            jpeg_quality: 95,
        }
    }
}

/// Result of running the pipeline on one image.
#[derive(Debug, Clone)]
pub struct Removal {
    /// Processed image, same dimensions and channel layout as the pipeline input.
    pub image: DynamicImage,
    /// Detection stages output, including the mask that was inpainted.
    pub detection: Detection,
}

/// An output image written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    /// Full path of the written file.
    pub path: PathBuf,
    /// File name component of `path`.
    pub file_name: String,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Number of pixels that were inpainted.
    pub masked_pixels: usize,
    /// Mask that was inpainted, same size as the output.
    pub mask: GrayImage,
}

/// The watermark remover.
///
/// Holds only immutable options, so one instance can serve any number of
/// images, including from several threads at once.
#[derive(Debug, Clone, Default)]
pub struct WatermarkRemover {
    opts: ProcessOptions,
}

impl WatermarkRemover {
    /// Create a remover with the given options.
    #[must_use]
    pub fn new(opts: ProcessOptions) -> Self {
        Self { opts }
    }

    /// Options this remover was built with.
    #[must_use]
    pub fn options(&self) -> &ProcessOptions {
        &self.opts
    }

    /// Run the detection stages on a grayscale image.
    #[must_use]
    pub fn detect(&self, gray: &GrayImage) -> Detection {
        detection::detect_watermark(gray, &self.opts.detection)
    }

    /// Remove watermark-like markings from an image.
    ///
    /// Single-channel images are returned unchanged with an empty detection.
    /// Luma+alpha images are processed as their luma channel and everything
    /// else as RGB (alpha is dropped). Running the pipeline again on its own
    /// output is not idempotent: blending and sharpening alter the image even
    /// where nothing is detected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Processing`] if an intermediate buffer does not match the
    /// input geometry.
    pub fn remove(&self, image: &DynamicImage) -> Result<Removal> {
        let (width, height) = (image.width(), image.height());
        if image.color().channel_count() == 1 {
            debug!(width, height, "single-channel image left unchanged");
            return Ok(Removal {
                image: image.clone(),
                detection: Detection::empty(width, height),
            });
        }

        let gray = detection::grayscale(image);
        let planes = if image.color().channel_count() == 2 {
            vec![gray.clone()]
        } else {
            split_channels(&image.to_rgb8())
        };

        let detection = self.detect(&gray);
        if detection.mask.dimensions() != (width, height) {
            return Err(Error::Processing(format!(
                "mask is {}x{} but image is {width}x{height}",
                detection.mask.width(),
                detection.mask.height()
            )));
        }

        let processed: Vec<GrayImage> = planes
            .iter()
            .map(|plane| {
                let restored = if detection.is_empty() {
                    plane.clone()
                } else {
                    inpaint::inpaint_ns(plane, &detection.mask, self.opts.inpaint_radius)
                };
                let blended = blending::blend(&restored, plane, self.opts.blend_alpha);
                blending::sharpen(&blended)
            })
            .collect();

        debug!(
            width,
            height,
            channels = processed.len(),
            masked = detection.masked_pixels(),
            "pipeline finished"
        );

        let image = merge_channels(processed, width, height)?;
        Ok(Removal { image, detection })
    }

    /// Decode, process and save an uploaded image.
    ///
    /// The output is written to `output_dir` under [`output_file_name`] of
    /// `name_hint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] for undecodable bytes, [`Error::Write`] if the
    /// result cannot be saved, or any error from [`WatermarkRemover::remove`].
    pub fn process_bytes(
        &self,
        bytes: &[u8],
        name_hint: &str,
        output_dir: &Path,
    ) -> Result<SavedImage> {
        let image = decode_image(bytes)?;
        let output = output_dir.join(output_file_name(name_hint));
        self.process_image(&image, &output)
    }

    /// Read, process and save an image file.
    ///
    /// The extension of `output` is corrected by [`enforce_output_extension`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if `input` cannot be read, [`Error::Decode`] if it
    /// is not an image, or [`Error::Write`] if the result cannot be saved.
    pub fn process_file(&self, input: &Path, output: &Path) -> Result<SavedImage> {
        let bytes = std::fs::read(input)?;
        let image = decode_image(&bytes)?;
        self.process_image(&image, &enforce_output_extension(output))
    }

    fn process_image(&self, image: &DynamicImage, output: &Path) -> Result<SavedImage> {
        let removal = self.remove(image)?;
        save_image(&removal.image, output, self.opts.jpeg_quality)?;

        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let masked_pixels = removal.detection.masked_pixels();
        info!(output = %output.display(), masked = masked_pixels, "watermark removed");

        Ok(SavedImage {
            path: output.to_path_buf(),
            file_name,
            width: removal.image.width(),
            height: removal.image.height(),
            masked_pixels,
            mask: removal.detection.mask,
        })
    }
}

/// Split an RGB image into three single-channel planes.
fn split_channels(rgb: &RgbImage) -> Vec<GrayImage> {
    (0..3)
        .map(|c| {
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                image::Luma([rgb.get_pixel(x, y)[c]])
            })
        })
        .collect()
}

/// Reassemble processed planes into a luma or RGB image.
fn merge_channels(planes: Vec<GrayImage>, width: u32, height: u32) -> Result<DynamicImage> {
    if let Some(plane) = planes.iter().find(|p| p.dimensions() != (width, height)) {
        return Err(Error::Processing(format!(
            "channel is {}x{} but image is {width}x{height}",
            plane.width(),
            plane.height()
        )));
    }

    match planes.len() {
        1 => planes
            .into_iter()
            .next()
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| Error::Processing("missing luma channel".to_string())),
        3 => {
            let mut raw = Vec::with_capacity(planes[0].len() * 3);
            for ((r, g), b) in planes[0].iter().zip(planes[1].iter()).zip(planes[2].iter()) {
                raw.extend_from_slice(&[*r, *g, *b]);
            }
            RgbImage::from_raw(width, height, raw)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| Error::Processing("RGB buffer has the wrong length".to_string()))
        }
        n => Err(Error::Processing(format!("unexpected channel count {n}"))),
    }
}

/// Decode an image from encoded bytes (PNG, JPEG, GIF, ...).
///
/// # Errors
///
/// Returns [`Error::Decode`] if the bytes are not a supported image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(Error::Decode)
}

/// Check if a file has an extension accepted as input.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "gif"
        ),
        None => false,
    }
}

/// Replace the extension of `path` with `png` unless it is jpg, jpeg or png.
#[must_use]
pub fn enforce_output_extension(path: &Path) -> PathBuf {
    let allowed = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| OUTPUT_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
    if allowed {
        path.to_path_buf()
    } else {
        path.with_extension("png")
    }
}

/// Derive the output file name for a client-supplied name.
///
/// Only the final path component of `hint` is used.
///
/// Example: `"photo.gif"` becomes `"nowatermark_photo.png"`.
#[must_use]
pub fn output_file_name(hint: &str) -> String {
    let base = Path::new(hint)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "image".to_string());
    let name = enforce_output_extension(Path::new(&format!("{OUTPUT_PREFIX}{base}")));
    name.to_string_lossy().into_owned()
}

/// Generate a default output path next to the input.
///
/// Example: `"shots/photo.jpg"` becomes `"shots/nowatermark_photo.jpg"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let parent = input.parent().unwrap_or(Path::new("."));
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent.join(output_file_name(&name))
}

/// Save an image with format-specific quality settings.
///
/// Missing parent directories are created. A partially written file is
/// removed if encoding fails.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] if the extension is not JPEG or PNG and
/// [`Error::Write`] if writing fails.
pub fn save_image(img: &DynamicImage, path: &Path, quality: u8) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
        return Err(Error::UnsupportedFormat(format!("{format:?}")));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Write(ImageError::IoError(e)))?;
        }
    }

    let written = match format {
        ImageFormat::Jpeg => write_jpeg(img, path, quality),
        _ => img.save_with_format(path, ImageFormat::Png),
    };

    if let Err(e) = written {
        if path.exists() {
            if let Err(cleanup) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %cleanup, "partial output left behind");
            }
        }
        return Err(Error::Write(e));
    }
    debug!(path = %path.display(), ?format, "image saved");
    Ok(())
}

fn write_jpeg(img: &DynamicImage, path: &Path, quality: u8) -> std::result::Result<(), ImageError> {
    let file = File::create(path)?;
    let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality);
    match img {
        DynamicImage::ImageLuma8(gray) => encoder.encode_image(gray),
        other => encoder.encode_image(&other.to_rgb8()),
    }
}
