//! Command-line interface definition.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use notecal_core::TracingOutputFormat;

/// notecal - Google Calendar events for your daily notes
#[derive(Debug, Parser)]
#[command(name = "notecal")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "NOTECAL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Link a Google Calendar account through the browser
    Auth {
        /// OAuth client ID (from Google Cloud Console)
        #[arg(long, env = "GOOGLE_CLIENT_ID")]
        client_id: Option<String>,

        /// OAuth client secret (from Google Cloud Console)
        #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
        client_secret: Option<String>,

        /// Path to Google Cloud Console credentials JSON file
        ///
        /// Alternative to providing client_id and client_secret separately.
        #[arg(long, env = "GOOGLE_CREDENTIALS_FILE")]
        credentials_file: Option<PathBuf>,

        /// Link again even if an account is already linked
        #[arg(long, short)]
        force: bool,
    },

    /// Forget the linked account's tokens
    Logout,

    /// Show whether an account is linked
    Status {
        /// Also query the calendar list to verify access
        #[arg(long)]
        check: bool,
    },

    /// List the events of a day
    Events {
        /// Day to list, as YYYY-MM-DD (defaults to today)
        #[arg(long, short)]
        date: Option<NaiveDate>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Show configuration and settings file paths
    Path,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for TracingOutputFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
            LogFormat::Json => Self::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_events_date() {
        let cli = Cli::try_parse_from(["notecal", "events", "--date", "2026-03-02"]).unwrap();
        match cli.command {
            Command::Events { date } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 3, 2));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_date() {
        assert!(Cli::try_parse_from(["notecal", "events", "--date", "03/02/2026"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["notecal", "status", "--debug", "--log-format", "json"])
            .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
