//! Remove watermark-like markings via adaptive detection and inpainting.
//!
//! Overlaid text and logos are usually thin, darker-than-surroundings strokes.
//! This crate finds them with an adaptive threshold, keeps the connected regions
//! of plausible size, and reconstructs the covered pixels from their
//! surroundings with a Navier-Stokes style inpainting pass. The result is blended
//! with the original and lightly sharpened.
//!
//! # Quick Start
//!
//! ```no_run
//! use watermark_inpaint::WatermarkRemover;
//!
//! let remover = WatermarkRemover::default();
//! let img = image::open("photo.jpg").unwrap();
//! let removal = remover.remove(&img).expect("pipeline failed");
//! removal.image.save("cleaned.png").unwrap();
//! ```
//!
//! # Detection only
//!
//! ```no_run
//! use watermark_inpaint::WatermarkRemover;
//!
//! let remover = WatermarkRemover::default();
//! let gray = image::open("photo.jpg").unwrap().to_luma8();
//! let detection = remover.detect(&gray);
//! println!("{} regions, {} pixels masked", detection.kept, detection.masked_pixels());
//! ```

#![deny(missing_docs)]

pub mod blending;
pub mod detection;
mod engine;
pub mod error;
pub mod inpaint;
#[cfg(feature = "server")]
pub mod server;

pub use detection::{Component, Detection, DetectionParams};
pub use engine::{
    decode_image, default_output_path, enforce_output_extension, is_supported_image,
    output_file_name, save_image, ProcessOptions, Removal, SavedImage, WatermarkRemover,
    OUTPUT_PREFIX,
};
pub use error::{Error, Result};
