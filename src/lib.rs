//! # promsink
//!
//! A Prometheus Remote Write receiver that appends every sample to a
//! line-oriented file.
//!
//! Each accepted request is snappy-decompressed, decoded into a batch of time
//! series and written as one record per sample (timestamp, value and the full
//! label set), either as JSON lines or as escaped tab-separated lines.
//!
//! ## Rotation
//!
//! The output file can be reopened in place so that external log rotation can
//! move it away without restarting the process. The reopen is triggered either
//! by `SIGUSR1` or by touching a marker file, and it shares one lock with the
//! write path: a batch always lands entirely in one physical file.
//!
//! ## Layout
//!
//! - **api**: HTTP router and the remote-write decoder
//! - **ingester**: write path, sink and rotation triggers
//! - **schema**: decoded data model and record formats

pub mod api;
pub mod config;
pub mod ingester;
pub mod schema;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::api::{build_http_router, ApiServerConfig};
    pub use crate::config::{RotationMode, ServerConfig};
    pub use crate::ingester::{Ingester, IngesterConfig, Sink};
    pub use crate::schema::{LabelSet, RecordFormat, Sample, TimeSeries, WriteBatch};
    pub use crate::{Error, Result};
}
