use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::runtime::conf::conf_serde::level;

/// Replays a recorded TCP segment trace through the connection tracker.
#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set the path to the configuration file (e.g., "flowtrack.yaml").
    #[arg(short, long, value_name = "FILE", env = "FLOWTRACK_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Set the application's log level (e.g., "debug", "warn").
    /// Overrides the level from the configuration file when given.
    #[arg(short, long, value_name = "LEVEL", env = "FLOWTRACK_LOG_LEVEL")]
    #[serde(
        default,
        with = "level::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub log_level: Option<Level>,

    /// The YAML segment trace to replay.
    #[arg(value_name = "TRACE")]
    #[serde(skip)]
    pub trace: PathBuf,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser as _;
    use figment::Jail;
    use tracing::Level;

    use super::Cli;

    #[test]
    fn parses_long_flags() {
        Jail::expect_with(|jail| {
            jail.set_env("FLOWTRACK_CONFIG_PATH", "/tmp/flowtrack.yaml");
            jail.set_env("FLOWTRACK_LOG_LEVEL", "debug");

            let cli = Cli::parse_from([
                "flowtrack",
                "--config",
                "/path/to/conf.yaml",
                "--log-level",
                "warn",
                "capture.yaml",
            ]);
            assert_eq!(cli.config, Some(PathBuf::from("/path/to/conf.yaml")));
            assert_eq!(cli.log_level, Some(Level::WARN));
            assert_eq!(cli.trace, PathBuf::from("capture.yaml"));

            Ok(())
        });
    }

    #[test]
    fn parses_from_env_when_no_flags() {
        Jail::expect_with(|jail| {
            jail.set_env("FLOWTRACK_CONFIG_PATH", "/tmp/flowtrack.yaml");
            jail.set_env("FLOWTRACK_LOG_LEVEL", "trace");

            let cli = Cli::parse_from(["flowtrack", "capture.yaml"]);
            assert_eq!(cli.config, Some(PathBuf::from("/tmp/flowtrack.yaml")));
            assert_eq!(cli.log_level, Some(Level::TRACE));

            Ok(())
        });
    }

    #[test]
    fn log_level_is_unset_by_default() {
        Jail::expect_with(|_| {
            let cli = Cli::parse_from(["flowtrack", "capture.yaml"]);
            assert_eq!(cli.config, None);
            assert_eq!(cli.log_level, None);

            Ok(())
        });
    }

    #[test]
    fn trace_argument_is_required() {
        Jail::expect_with(|_| {
            assert!(Cli::try_parse_from(["flowtrack"]).is_err());

            Ok(())
        });
    }
}
