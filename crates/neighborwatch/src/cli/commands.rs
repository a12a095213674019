//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::report::{Category, VoteKind};

/// Register command arguments.
#[derive(Debug, Args)]
pub struct RegisterCommand {
    /// Display name (at least 3 characters)
    #[arg(long)]
    pub name: String,

    /// Email address
    #[arg(long)]
    pub email: String,

    /// Password (at least 6 characters)
    #[arg(long)]
    pub password: String,

    /// Password again
    #[arg(long)]
    pub confirm_password: String,

    /// Register without locating the device (zone becomes "Unspecified")
    #[arg(long)]
    pub no_location: bool,
}

/// Login command arguments.
#[derive(Debug, Args)]
pub struct LoginCommand {
    /// Email address
    #[arg(long)]
    pub email: String,

    /// Password
    #[arg(long)]
    pub password: String,
}

/// Zone commands.
#[derive(Debug, Subcommand)]
pub enum ZoneCommand {
    /// Move to another chat zone
    Set {
        /// Zone name, e.g. "Quito - La Mariscal"
        zone: String,
    },
}

/// Incident report commands.
#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// Submit a report at the current position
    Submit {
        /// Incident category
        #[arg(long, value_enum, default_value = "robbery")]
        category: CategoryArg,

        /// What happened
        #[arg(short, long)]
        description: String,

        /// Reporter name (defaults to Anonymous)
        #[arg(short, long)]
        name: Option<String>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List reports, newest first
    List {
        /// Only reports of this category
        #[arg(long, value_enum)]
        category: Option<CategoryArg>,

        /// Maximum number of reports
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show one report with its votes and comments
    Show {
        /// Report id
        id: i64,
    },

    /// Confirm or deny a report
    Vote {
        /// Report id
        id: i64,

        /// Vote to cast
        #[arg(value_enum)]
        kind: VoteArg,
    },

    /// Comment on a report
    Comment {
        /// Report id
        id: i64,

        /// Comment text
        text: String,
    },

    /// Show a report's comments
    Comments {
        /// Report id
        id: i64,

        /// Keep printing new comments as they arrive
        #[arg(short, long)]
        watch: bool,
    },
}

/// Heatmap command arguments.
#[derive(Debug, Args)]
pub struct HeatmapCommand {
    /// Only reports of this category
    #[arg(long, value_enum)]
    pub category: Option<CategoryArg>,

    /// Decimal digits of the bucket grid, 0 to 10 (defaults to the configured value)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub precision: Option<u32>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Recompute whenever reports change
    #[arg(short, long)]
    pub watch: bool,
}

/// Zone chat commands.
#[derive(Debug, Subcommand)]
pub enum ChatCommand {
    /// Send a message to your zone
    Send {
        /// Message text
        text: String,
    },

    /// Show recent messages in your zone
    History {
        /// Maximum number of messages
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print messages as they arrive and notify on panic alerts
    Watch,
}

/// Panic command arguments.
#[derive(Debug, Args)]
pub struct PanicCommand {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Emergency number commands.
#[derive(Debug, Subcommand)]
pub enum EmergencyCommand {
    /// List emergency numbers
    List,

    /// Dial an emergency number
    Call {
        /// Number to call, e.g. 911
        number: String,

        /// Print the tel: link instead of opening it
        #[arg(short, long)]
        print: bool,
    },
}

/// Useful link commands.
#[derive(Debug, Subcommand)]
pub enum LinksCommand {
    /// List useful links
    List,

    /// Open a link by its position in the list
    Open {
        /// 1-based index from `links list`
        index: usize,

        /// Print the URL instead of opening it
        #[arg(short, long)]
        print: bool,
    },
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Profile command arguments.
#[derive(Debug, Args)]
pub struct ProfileCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Category argument for filtering and submitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CategoryArg {
    /// Robbery
    Robbery,
    /// Assault
    Assault,
    /// Harassment
    Harassment,
    /// Anything else
    Other,
}

impl From<CategoryArg> for Category {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Robbery => Self::Robbery,
            CategoryArg::Assault => Self::Assault,
            CategoryArg::Harassment => Self::Harassment,
            CategoryArg::Other => Self::Other,
        }
    }
}

/// Vote argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VoteArg {
    /// The incident happened
    Confirm,
    /// The incident is false
    Deny,
}

impl From<VoteArg> for VoteKind {
    fn from(arg: VoteArg) -> Self {
        match arg {
            VoteArg::Confirm => Self::Confirm,
            VoteArg::Deny => Self::Deny,
        }
    }
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_arg_conversion() {
        assert_eq!(Category::from(CategoryArg::Robbery), Category::Robbery);
        assert_eq!(Category::from(CategoryArg::Assault), Category::Assault);
        assert_eq!(
            Category::from(CategoryArg::Harassment),
            Category::Harassment
        );
        assert_eq!(Category::from(CategoryArg::Other), Category::Other);
    }

    #[test]
    fn test_vote_arg_conversion() {
        assert_eq!(VoteKind::from(VoteArg::Confirm), VoteKind::Confirm);
        assert_eq!(VoteKind::from(VoteArg::Deny), VoteKind::Deny);
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Plain);
    }

    #[test]
    fn test_report_command_debug() {
        let cmd = ReportCommand::Vote {
            id: 7,
            kind: VoteArg::Deny,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Vote"));
        assert!(debug_str.contains("Deny"));
    }

    #[test]
    fn test_heatmap_command_debug() {
        let cmd = HeatmapCommand {
            category: Some(CategoryArg::Assault),
            precision: Some(3),
            format: OutputFormat::Json,
            watch: false,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("precision"));
        assert!(debug_str.contains("Assault"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
