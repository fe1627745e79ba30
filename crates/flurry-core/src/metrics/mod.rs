//! Metrics and observability infrastructure.
//!
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder and HTTP endpoint

pub mod events;
pub mod server;

pub use server::{MetricsController, init_global, init_test};

/// Macro for emitting metric events.
///
/// Calls `InternalEvent::emit()` on the given event, which records the
/// corresponding Prometheus metric.
///
/// # Example
///
/// ```ignore
/// use flurry_core::metrics::events::BytesRead;
///
/// emit!(BytesRead { bytes: 1024, reader: "reader-a".to_string() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
