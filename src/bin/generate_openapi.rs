//! Writes the API's OpenAPI document as pretty JSON.
//!
//! Usage:
//!   cargo run --bin generate_openapi > openapi.json
//!   cargo run --bin generate_openapi -- --output openapi.json

use std::{
    env, fs,
    io::{self, Write},
    path::PathBuf,
    process,
};

use hydro_telemetry_service::api::handlers::ApiDoc;
use utoipa::OpenApi;

fn main() {
    let json = match ApiDoc::openapi().to_pretty_json() {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error serialising OpenAPI document: {e}");
            process::exit(1);
        }
    };

    let output_path = output_arg(env::args());

    let result = match &output_path {
        Some(path) => fs::write(path, &json),
        None => io::stdout().write_all(json.as_bytes()),
    };
    match (result, output_path) {
        (Ok(()), Some(path)) => eprintln!("OpenAPI document written to {}", path.display()),
        (Ok(()), None) => {}
        (Err(e), Some(path)) => {
            eprintln!("Error writing to {}: {e}", path.display());
            process::exit(1);
        }
        (Err(e), None) => {
            eprintln!("Error writing to stdout: {e}");
            process::exit(1);
        }
    }
}

/// Value following `--output`, if any.
fn output_arg(args: impl Iterator<Item = String>) -> Option<PathBuf> {
    let args: Vec<String> = args.collect();
    args.windows(2)
        .find(|w| w[0] == "--output")
        .map(|w| PathBuf::from(&w[1]))
}
