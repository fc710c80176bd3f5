use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "offline-mirror",
    about = "Mirror a web page and its assets for offline viewing",
    version,
    long_about = "Downloads a single page together with its stylesheets, scripts, and images into a content-addressed cache directory, rewriting the page to use the local copies."
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache root directory (overrides config and environment)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Download a page and its assets into the cache
    Mirror {
        /// The URL of the page to mirror
        url: String,

        /// Display name for the page
        #[arg(short, long)]
        name: Option<String>,

        /// Maximum simultaneous asset downloads
        #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..=32))]
        concurrency: Option<u16>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show whether a page is mirrored and how large the mirror is
    Status {
        url: String,
    },

    /// Delete the mirror of one page
    Evict {
        url: String,
    },

    /// Delete every mirror in the cache
    EvictAll {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// List cached mirrors
    List {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_mirror() {
        let args = Cli::try_parse_from([
            "offline-mirror",
            "mirror",
            "https://example.com/game",
        ])
        .unwrap();

        assert_eq!(
            args.command,
            Command::Mirror {
                url: "https://example.com/game".to_string(),
                name: None,
                concurrency: None,
                json: false,
            }
        );
        assert!(!args.verbose);
        assert!(args.cache_dir.is_none());
    }

    #[test]
    fn test_parse_all_mirror_args() {
        let args = Cli::try_parse_from([
            "offline-mirror",
            "--cache-dir",
            "./cache",
            "-v",
            "mirror",
            "https://example.com",
            "-n",
            "Example",
            "-c",
            "8",
            "--json",
        ])
        .unwrap();

        assert_eq!(args.cache_dir, Some(PathBuf::from("./cache")));
        assert!(args.verbose);
        assert_eq!(
            args.command,
            Command::Mirror {
                url: "https://example.com".to_string(),
                name: Some("Example".to_string()),
                concurrency: Some(8),
                json: true,
            }
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Cli::try_parse_from([
            "offline-mirror",
            "list",
            "--json",
            "--config",
            "mirror.toml",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("mirror.toml")));
        assert_eq!(args.command, Command::List { json: true });
    }

    #[test]
    fn test_parse_invalid_concurrency() {
        let result = Cli::try_parse_from([
            "offline-mirror",
            "mirror",
            "https://example.com",
            "-c",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_missing_url() {
        let result = Cli::try_parse_from(["offline-mirror", "mirror"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        let result = Cli::try_parse_from(["offline-mirror", "-v", "-q", "list"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_evict_all() {
        let args = Cli::try_parse_from(["offline-mirror", "evict-all", "--yes"]).unwrap();
        assert_eq!(args.command, Command::EvictAll { yes: true });
    }
}
