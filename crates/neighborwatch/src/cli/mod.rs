//! Command-line interface for neighborwatch.
//!
//! This module provides the CLI structure and command handlers for the
//! `nwatch` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CategoryArg, ChatCommand, ConfigCommand, EmergencyCommand, HeatmapCommand, LinksCommand,
    LoginCommand, OutputFormat, PanicCommand, ProfileCommand, RegisterCommand, ReportCommand,
    StatusCommand, VoteArg, ZoneCommand,
};

use crate::logging::Verbosity;

/// nwatch - Look out for your neighborhood
///
/// Report incidents, see where they cluster, chat with your zone and raise a
/// panic alert with your location.
#[derive(Debug, Parser)]
#[command(name = "nwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Override the device latitude
    #[arg(long, global = true, allow_hyphen_values = true, requires = "lon")]
    pub lat: Option<f64>,

    /// Override the device longitude
    #[arg(long, global = true, allow_hyphen_values = true, requires = "lat")]
    pub lon: Option<f64>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create an account
    Register(RegisterCommand),

    /// Sign in
    Login(LoginCommand),

    /// Sign out
    Logout,

    /// Show the signed-in profile
    Profile(ProfileCommand),

    /// Manage your chat zone
    #[command(subcommand)]
    Zone(ZoneCommand),

    /// Submit, browse and vote on incident reports
    #[command(subcommand)]
    Report(ReportCommand),

    /// Show where reports cluster
    Heatmap(HeatmapCommand),

    /// Chat with your zone
    #[command(subcommand)]
    Chat(ChatCommand),

    /// Send a panic alert with your location to your zone
    Panic(PanicCommand),

    /// Emergency numbers
    #[command(subcommand)]
    Emergency(EmergencyCommand),

    /// Useful links
    #[command(subcommand)]
    Links(LinksCommand),

    /// Show the introduction
    Intro,

    /// Show session and store status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }

    /// Device position given on the command line, if any.
    #[must_use]
    pub fn position_override(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_debug() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "nwatch");
    }

    #[test]
    fn test_cli_verify() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_from_flags() {
        assert_eq!(parse(&["nwatch", "-q", "intro"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["nwatch", "intro"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["nwatch", "-v", "intro"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["nwatch", "-vv", "intro"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["nwatch", "-c", "/custom/config.toml", "status"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_parse_register() {
        let cli = parse(&[
            "nwatch",
            "register",
            "--name",
            "Ana",
            "--email",
            "ana@example.com",
            "--password",
            "secret1",
            "--confirm-password",
            "secret1",
            "--no-location",
        ]);
        let Command::Register(cmd) = cli.command else {
            panic!("expected register");
        };
        assert_eq!(cmd.name, "Ana");
        assert!(cmd.no_location);
    }

    #[test]
    fn test_parse_report_submit_defaults() {
        let cli = parse(&["nwatch", "report", "submit", "-d", "Phone snatched"]);
        assert!(matches!(
            cli.command,
            Command::Report(ReportCommand::Submit {
                category: CategoryArg::Robbery,
                yes: false,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_report_vote() {
        let cli = parse(&["nwatch", "report", "vote", "3", "deny"]);
        assert!(matches!(
            cli.command,
            Command::Report(ReportCommand::Vote {
                id: 3,
                kind: VoteArg::Deny
            })
        ));
    }

    #[test]
    fn test_parse_heatmap() {
        let cli = parse(&[
            "nwatch",
            "heatmap",
            "--category",
            "harassment",
            "--precision",
            "3",
            "--format",
            "json",
        ]);
        let Command::Heatmap(cmd) = cli.command else {
            panic!("expected heatmap");
        };
        assert_eq!(cmd.category, Some(CategoryArg::Harassment));
        assert_eq!(cmd.precision, Some(3));
        assert_eq!(cmd.format, OutputFormat::Json);
    }

    #[test]
    fn test_heatmap_precision_range() {
        let cli = parse(&["nwatch", "heatmap", "--precision", "10"]);
        assert!(matches!(
            cli.command,
            Command::Heatmap(HeatmapCommand {
                precision: Some(10),
                ..
            })
        ));
        assert!(Cli::try_parse_from(["nwatch", "heatmap", "--precision", "11"]).is_err());
    }

    #[test]
    fn test_parse_position_override() {
        let cli = parse(&["nwatch", "--lat", "-0.18", "--lon", "-78.47", "panic", "--yes"]);
        assert_eq!(cli.position_override(), Some((-0.18, -78.47)));
        assert!(matches!(cli.command, Command::Panic(PanicCommand { yes: true })));
    }

    #[test]
    fn test_lat_requires_lon() {
        assert!(Cli::try_parse_from(["nwatch", "--lat", "1.0", "panic"]).is_err());
    }

    #[test]
    fn test_parse_chat_and_links() {
        assert!(matches!(
            parse(&["nwatch", "chat", "watch"]).command,
            Command::Chat(ChatCommand::Watch)
        ));
        assert!(matches!(
            parse(&["nwatch", "links", "open", "2", "--print"]).command,
            Command::Links(LinksCommand::Open {
                index: 2,
                print: true
            })
        ));
        assert!(matches!(
            parse(&["nwatch", "emergency", "call", "911"]).command,
            Command::Emergency(EmergencyCommand::Call { print: false, .. })
        ));
    }

    #[test]
    fn test_parse_with_quiet() {
        let cli = parse(&["nwatch", "-q", "status"]);
        assert!(cli.quiet);
    }
}
