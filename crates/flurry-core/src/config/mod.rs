//! Configuration building blocks shared by flurry binaries.

mod path;
mod vars;

pub use path::{CliArgs, is_yaml_file};
pub use vars::expand_env;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::path::Path;

use crate::error::{ConfigError, MetricsAddressSnafu, ReadFileSnafu, YamlParseSnafu};

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP server. No endpoint when absent.
    #[serde(default)]
    pub address: Option<String>,
}

impl MetricsConfig {
    /// Parsed bind address, if an endpoint is configured.
    pub fn socket_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.address
            .as_deref()
            .map(|address| {
                address
                    .parse()
                    .context(MetricsAddressSnafu { address })
            })
            .transpose()
    }
}

/// Read a YAML file, expand environment references and deserialize it.
pub fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    parse_yaml(&contents)
}

/// Expand environment references in `contents` and deserialize it.
pub fn parse_yaml<T: serde::de::DeserializeOwned>(contents: &str) -> Result<T, ConfigError> {
    let expanded = expand_env(contents)?;
    serde_yaml::from_str(&expanded).context(YamlParseSnafu)
}
