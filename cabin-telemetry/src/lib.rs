//! # Cabin Telemetry
//!
//! Structured logging for live sessions using `tracing`.
//!
//! ## Usage
//!
//! ```rust
//! use cabin_telemetry::{init_telemetry, info};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     init_telemetry("cabin-console")?;
//!     info!("ready");
//!     Ok(())
//! }
//! ```

pub mod init;
pub mod spans;

// Re-export tracing macros for convenience
pub use tracing::{Instrument, Span, debug, error, info, instrument, trace, warn};

pub use init::{LogFormat, init_json_telemetry, init_telemetry, init_with_format};
pub use spans::*;
