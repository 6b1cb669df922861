//! # snmp-collector
//!
//! High-throughput SNMP telemetry collector: polls network devices on
//! configurable intervals, receives asynchronous traps and informs,
//! decodes raw variable bindings against a hierarchical configuration of
//! managed objects, normalizes values (unit scaling, enumeration
//! resolution, counter delta), and emits canonical JSON records to an
//! output transport.
//!
//! ## Pipeline
//!
//! ```text
//! Scheduler → Poller workers → Decoder workers → Producer workers →
//! Formatter → Transport
//! TrapReceiver → trap Formatter → Transport
//! ```
//!
//! Stages exchange messages over bounded channels; shutdown cascades from
//! the scheduler down to the transport so nothing in flight is lost.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use snmp_collector::config;
//! use snmp_collector::format::JsonFormatter;
//! use snmp_collector::pipeline::{Pipeline, PipelineConfig};
//! use snmp_collector::transport::WriterTransport;
//!
//! #[tokio::main]
//! async fn main() -> snmp_collector::Result<()> {
//!     let snapshot = config::load(&config::Paths::from_env())?;
//!
//!     let mut pipeline = Pipeline::new(
//!         PipelineConfig::default(),
//!         Arc::new(JsonFormatter::default()),
//!         Arc::new(WriterTransport::stdout()),
//!     );
//!     pipeline.start(snapshot).await?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     pipeline.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod format;
pub mod model;
pub mod pipeline;
pub mod poll;
pub mod produce;
pub mod schedule;
pub mod transport;
pub mod trap;

pub use error::{Error, Result};
pub use model::{Device, Metric, MetricBatch, MetricValue, Trap, TrapInfo};
pub use pipeline::{Pipeline, PipelineConfig};
