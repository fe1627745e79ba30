//! flurry CLI: tail append-only blobs cooperatively with other readers.

use std::process::ExitCode;

use clap::Parser;

use flurry::{CliArgs, Config, init_tracing, run, shutdown_token};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if !flurry_core::config::is_yaml_file(&args.config) {
        eprintln!(
            "Warning: {} does not have a .yaml or .yml extension",
            args.config.display()
        );
    }

    let mut config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(reader_id) = args.reader_id {
        config.reader.id = reader_id;
        if let Err(e) = config.validate() {
            eprintln!("Invalid config: {e}");
            return ExitCode::FAILURE;
        }
    }

    init_tracing(config.log_format);

    match run(config, shutdown_token()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Reader failed: {e}");
            ExitCode::FAILURE
        }
    }
}
