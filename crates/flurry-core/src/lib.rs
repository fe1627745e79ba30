//! flurry-core: shared infrastructure for the flurry blob tailer.
//!
//! - `storage/` - Blob container abstraction (Azure, S3, GCS, local, memory)
//!   and lease emulation over conditional writes
//! - `metrics/` - Internal events and the Prometheus endpoint
//! - `config/` - Env-var expansion, YAML loading and CLI arguments
//! - `polling` - Generic polling loop trait and runner
//! - `signal` - Signal handling for graceful shutdown
//! - `error` - Common error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod polling;
pub mod signal;
pub mod storage;
pub mod tracing;

pub use config::{CliArgs, KB, MB, MetricsConfig, expand_env, load_yaml, parse_yaml};
pub use error::{ConfigError, LeaseError, MetricsError, StorageError};
pub use metrics::{
    MetricsController, init_global as init_metrics, init_test as init_metrics_test,
};
pub use polling::{IterationResult, PollingProcessor, random_jitter, run_polling_loop};
pub use signal::{shutdown_signal, shutdown_token};
pub use storage::{BlobMeta, LeaseHandle, LeaseRecord, StorageConfig, StorageProvider};
pub use self::tracing::{LogFormat, init_tracing};
