pub mod commands;
pub mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a file (defaults to the data directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze pages and check every link they contain
    Crawl {
        /// Pages to analyze, one task per URL
        #[arg(required = true)]
        urls: Vec<String>,

        /// Configuration profile to use instead of the default
        #[arg(short, long)]
        profile: Option<String>,

        /// Number of tasks processed concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Number of concurrent link checks per task
        #[arg(short, long)]
        link_workers: Option<usize>,

        /// Print every task revision as a JSON line
        #[arg(long)]
        json: bool,

        /// Only print the final summary
        #[arg(short, long, conflicts_with = "json")]
        quiet: bool,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl { urls, profile, workers, link_workers, json, quiet } => {
            info!("Starting {} crawl task(s)", urls.len());
            let output = match (json, quiet) {
                (true, _) => commands::Output::Json,
                (_, true) => commands::Output::Quiet,
                _ => commands::Output::Text,
            };
            commands::crawl(urls, profile, workers, link_workers, output).await
        }
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_crawl() {
        let cli = Cli::parse_from([
            "crawler",
            "crawl",
            "https://example.com",
            "https://example.org",
            "--workers",
            "2",
            "-l",
            "4",
            "--verbose",
        ]);

        assert!(cli.verbose);
        assert!(cli.log_file.is_none());
        match cli.command {
            Commands::Crawl { urls, profile, workers, link_workers, json, quiet } => {
                assert_eq!(urls.len(), 2);
                assert!(!json);
                assert!(!quiet);
                assert_eq!(profile, None);
                assert_eq!(workers, Some(2));
                assert_eq!(link_workers, Some(4));
            }
            _ => panic!("expected crawl command"),
        }
    }

    #[test]
    fn test_log_file_optional_value() {
        let cli = Cli::parse_from(["crawler", "config", "--list", "--log-file"]);
        assert_eq!(cli.log_file, Some(None));

        let cli = Cli::parse_from(["crawler", "config", "--list", "--log-file=/tmp/crawler.log"]);
        assert_eq!(cli.log_file, Some(Some(PathBuf::from("/tmp/crawler.log"))));
    }

    #[test]
    fn test_json_conflicts_with_quiet() {
        let args = ["crawler", "crawl", "https://example.com", "--json", "-q"];
        let result = Cli::try_parse_from(args);
        assert!(result.is_err());
    }

    #[test]
    fn test_crawl_requires_url() {
        assert!(Cli::try_parse_from(["crawler", "crawl"]).is_err());
    }
}
