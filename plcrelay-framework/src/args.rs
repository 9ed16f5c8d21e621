//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for all bridges.
#[derive(Parser, Debug, Clone)]
#[command(about = "plcrelay protocol bridge")]
pub struct BridgeArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If no `--config` argument is provided, uses the default.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        Self::parse_from_with_default(std::env::args_os(), default_config)
    }

    /// Parse the given argument list with a default config path.
    pub fn parse_from_with_default<I, T>(args: I, default_config: &'static str) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.default_value(default_config).required(false))
            .get_matches_from(args);

        <Self as clap::FromArgMatches>::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }

    /// Parse CLI arguments (requires --config to be specified).
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_config() {
        let args = BridgeArgs::parse_from_with_default(["bridge"], "bridge.json5");
        assert_eq!(args.config, PathBuf::from("bridge.json5"));
        assert_eq!(args.log_level, None);
    }

    #[test]
    fn test_args_log_level_without_config() {
        let args =
            BridgeArgs::parse_from_with_default(["bridge", "--log-level", "warn"], "bridge.json5");
        assert_eq!(args.config, PathBuf::from("bridge.json5"));
        assert_eq!(args.log_level, Some("warn".to_string()));
    }

    #[test]
    fn test_args_override() {
        let args = BridgeArgs::parse_from_with_default(
            ["bridge", "--config", "line3.json5", "--log-level", "debug"],
            "bridge.json5",
        );
        assert_eq!(args.config, PathBuf::from("line3.json5"));
        assert_eq!(args.log_level, Some("debug".to_string()));
    }
}
