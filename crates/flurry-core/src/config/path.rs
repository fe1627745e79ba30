//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Check if a path has a YAML extension.
pub fn is_yaml_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(version, about = "Cooperatively tail append-only blobs in a shared container")]
pub struct CliArgs {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Reader identifier, overriding `reader.id` from the file
    #[arg(short, long = "reader-id")]
    pub reader_id: Option<String>,
}
