use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bell", author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to <config dir>/bell/config.toml)
    #[arg(short, long, global = true, env = "BELL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Whose notifications to operate on.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// Viewer role (student, mentor, company, admin)
    #[arg(short, long, env = "BELL_ROLE")]
    pub role: Option<String>,

    /// Recipient id within the role
    #[arg(long, env = "BELL_RECIPIENT")]
    pub recipient: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Keep a live notification list on screen until interrupted
    Watch {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Also refetch every N seconds
        #[arg(long)]
        poll: Option<u64>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Fetch the current notification list once
    List {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Maximum number of notifications to request
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only show unread notifications
        #[arg(long)]
        unread: bool,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Mark one notification as read
    Read {
        /// Notification id
        id: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Mark every notification in scope as read
    ReadAll {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Configuration management
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,

        /// Overwrite the configuration file with defaults
        #[arg(long, conflicts_with = "show")]
        reset: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable
    #[default]
    Pretty,
    /// Pretty-printed JSON
    Json,
    /// One JSON document per line
    JsonCompact,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::JsonCompact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_watch() {
        let args = Args::try_parse_from([
            "bell", "watch", "--role", "student", "--recipient", "42", "--poll", "30",
        ])
        .unwrap();
        match args.command {
            Commands::Watch {
                scope,
                poll,
                output,
            } => {
                assert_eq!(scope.role.as_deref(), Some("student"));
                assert_eq!(scope.recipient.as_deref(), Some("42"));
                assert_eq!(poll, Some(30));
                assert_eq!(output, OutputFormat::Pretty);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_read_with_global_flags() {
        let args = Args::try_parse_from(["bell", "read", "17", "-r", "mentor", "-v"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Commands::Read { ref id, .. } if id == "17"));
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Args::try_parse_from(["bell", "-v", "-q", "read-all"]).is_err());
    }
}
