//! PnP Bridge Common Library
//!
//! Shared building blocks used by the bridge core and its plugins:
//!
//! - [`config`] - Zenoh and logging configuration, JSON5 loading
//! - [`serialization`] - JSON/CBOR encoding and decoding of twin payloads
//! - [`session`] - Zenoh session management
//! - [`keyexpr`] - Device-twin key expression builders and parsers
//! - [`telemetry`] - Component telemetry values
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod serialization;
pub mod session;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, ZenohConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use keyexpr::{InboundKey, KEY_PREFIX, TwinKeys};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::{build_zenoh_config, connect};
pub use telemetry::{ComponentTelemetry, TelemetryValue, current_timestamp_millis};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. When
/// `transport_trace` is set, the Zenoh transport crates are raised to
/// `debug` so connection problems towards the cloud side become visible.
///
/// # Example
///
/// ```ignore
/// use pnpbridge_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
///     transport_trace: false,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
