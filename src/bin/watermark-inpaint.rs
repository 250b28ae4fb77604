use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use watermark_inpaint::{
    default_output_path, is_supported_image, save_image, ProcessOptions, SavedImage,
    WatermarkRemover,
};

#[derive(Parser)]
#[command(
    name = "watermark-inpaint",
    about = "Remove watermark-like markings via adaptive detection and inpainting",
    version,
    after_help = "Simple usage: watermark-inpaint <image>  (writes nowatermark_<image> next to it)\n\n\
                  NOTE: Output is always JPEG or PNG; other extensions are replaced with .png.\n\
                  Running the tool again on its own output changes the image further."
)]
struct Cli {
    /// Input image file
    input: PathBuf,

    /// Output file (default: nowatermark_{name} next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write the detected watermark mask to this PNG file
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Weight of the inpainted image in the final blend (0.0-1.0)
    #[arg(long, default_value = "0.8")]
    blend_alpha: f32,

    /// Neighborhood radius used when inpainting
    #[arg(long, default_value = "3")]
    inpaint_radius: u32,

    /// JPEG output quality (1-100)
    #[arg(long, default_value = "95")]
    quality: u8,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if !(0.0..=1.0).contains(&cli.blend_alpha) {
        eprintln!("Error: Blend alpha must be between 0.0 and 1.0");
        process::exit(1);
    }

    if !(1..=100).contains(&cli.quality) {
        eprintln!("Error: Quality must be between 1 and 100");
        process::exit(1);
    }

    if !cli.input.is_file() {
        eprintln!("Error: Input file does not exist: {}", cli.input.display());
        process::exit(1);
    }

    if !is_supported_image(&cli.input) && !cli.quiet {
        eprintln!(
            "WARNING: {} does not have a jpg, jpeg, png or gif extension; trying to decode anyway",
            cli.input.display()
        );
    }

    let opts = ProcessOptions {
        inpaint_radius: cli.inpaint_radius,
        blend_alpha: cli.blend_alpha,
        jpeg_quality: cli.quality,
        ..ProcessOptions::default()
    };
    let remover = WatermarkRemover::new(opts);

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input));

    match remover.process_file(&cli.input, &output) {
        Ok(saved) => {
            print_success(&cli.input, &saved, cli.quiet);
            if let Some(mask_path) = &cli.mask {
                write_mask(&saved, mask_path);
            }
        }
        Err(e) => {
            eprintln!("[FAIL] {}: {e}", display_name(&cli.input));
            process::exit(1);
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn write_mask(saved: &SavedImage, mask_path: &Path) {
    let mask = image::DynamicImage::ImageLuma8(saved.mask.clone());
    if let Err(e) = save_image(&mask, mask_path, 100) {
        eprintln!("[FAIL] mask {}: {e}", mask_path.display());
        process::exit(1);
    }
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}

fn print_success(input: &Path, saved: &SavedImage, quiet: bool) {
    if quiet {
        return;
    }
    eprintln!(
        "[OK] {} -> {} ({}x{}, {} pixels inpainted)",
        display_name(input),
        saved.path.display(),
        saved.width,
        saved.height,
        saved.masked_pixels
    );
}
