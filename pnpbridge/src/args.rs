//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG: &str = "pnpbridge.json5";

/// PnP device bridge: publishes discovered devices as cloud twin components.
#[derive(Parser, Debug, Clone)]
#[command(name = "pnpbridge")]
#[command(version)]
pub struct PnpBridgeArgs {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        let args = PnpBridgeArgs::try_parse_from(["pnpbridge"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG));
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = PnpBridgeArgs::try_parse_from([
            "pnpbridge",
            "-c",
            "/etc/pnpbridge/gateway.json5",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/pnpbridge/gateway.json5"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }
}
