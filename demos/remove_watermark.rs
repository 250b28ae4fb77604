//! Remove watermark-like markings from a single image.
//!
//! Usage:
//! ```sh
//! cargo run --example remove_watermark -- input.jpg output.jpg
//! ```

use std::env;
use std::process;

use watermark_inpaint::WatermarkRemover;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input> <output>", args[0]);
        process::exit(1);
    }

    let input = &args[1];
    let output = &args[2];

    let remover = WatermarkRemover::default();
    match remover.process_file(input.as_ref(), output.as_ref()) {
        Ok(saved) => println!(
            "Done: {} ({} pixels inpainted)",
            saved.path.display(),
            saved.masked_pixels
        ),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
