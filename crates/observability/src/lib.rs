//! agentry observability - tracing setup shared by the agentry crates.
//!
//! Provides a `tracing-subscriber` registry with an env filter, console
//! output, and optional OpenTelemetry OTLP export, plus span helpers for
//! MCP traffic.
//!
//! # Quick Start
//!
//! ```no_run
//! use agentry_observability::{ObservabilityConfig, init};
//!
//! let config = ObservabilityConfig::new("agentry")
//!     .with_log_level("agentry_toolbus=debug,info");
//!
//! init(config)?;
//! tracing::info!("Runtime started");
//! # Ok::<(), agentry_observability::ObservabilityError>(())
//! ```
//!
//! # Environment Variables
//!
//! - `OTEL_SERVICE_NAME` - Service name
//! - `OTEL_EXPORTER_OTLP_ENDPOINT` - OTLP endpoint (export disabled when unset)
//! - `AGENTRY_LOG` or `RUST_LOG` - Log level filter

pub mod config;
pub mod error;
pub mod spans;
pub mod telemetry;

pub use config::ObservabilityConfig;
pub use error::ObservabilityError;
pub use spans::{record_duration, record_error};
pub use telemetry::{init, init_from_env, shutdown};
