//! flurry: cooperative tailing of append-only blobs by multiple readers.
//!
//! Readers share one container and coordinate through a registry document
//! guarded by a lease on a lock object:
//! - `registry/` - Per-blob offsets, owners and generations
//! - `lease` - Registry lease acquisition with bounded retry
//! - `scheduler` - Generation-based fair blob selection
//! - `chunk` - Bounded reads with head/tail framing
//! - `split` - Incremental JSON object extraction
//! - `tailer` - The claim/read/commit cycle driven by the poll loop
//! - `sink` - Downstream record delivery

pub mod chunk;
pub mod config;
pub mod error;
pub mod lease;
pub mod registry;
pub mod run;
pub mod scheduler;
pub mod sink;
pub mod split;
pub mod store;
pub mod tailer;

pub use config::{Config, CreatePolicy, SplitPolicy};
pub use error::{CycleError, RunError};
pub use registry::{Registry, RegistryItem, RegistryStore};
pub use run::run;
pub use sink::{ChannelSink, Record, RecordSink, VecSink};
pub use store::{BlobStore, BlobStoreRef};
pub use tailer::BlobTailer;

pub use flurry_core::{CliArgs, LogFormat, StorageProvider, init_tracing, shutdown_token};
