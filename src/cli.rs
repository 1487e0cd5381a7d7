use std::{num::NonZeroU32, path::PathBuf, time::Duration};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::{bootstrap::RetryPolicy, connection::DEFAULT_INDEX};

#[derive(Debug, Parser)]
#[command(
    name = "chaindb",
    version,
    about = "A tag-searchable file catalog with a web front end"
)]
pub struct Cli {
    /// Base URL of the search service (e.g. http://localhost:9200)
    #[arg(short = 'e', long, env = "CHAINDB_SEARCH_URL", global = true)]
    pub search_url: Option<String>,

    /// Search backend: a remote service, or the built-in engine
    #[arg(long, value_enum, default_value_t = EngineKind::Http, global = true)]
    pub engine: EngineKind,

    /// Override the XDG data directory (embedded engine only)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Name of the catalog index
    #[arg(long, default_value = DEFAULT_INDEX, global = true)]
    pub index: String,

    /// Seconds to wait between connection attempts at startup
    #[arg(long, value_name = "SECS", default_value_t = 2, global = true)]
    pub retry_delay: u64,

    /// Give up after this many connection attempts (default: never)
    #[arg(long, value_name = "N", global = true)]
    pub max_attempts: Option<NonZeroU32>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_secs(self.retry_delay),
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// JSON-over-HTTP search service
    Http,
    /// In-process index stored under the data directory
    Embedded,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the web search page and file downloads
    Serve(ServeArgs),
    /// Create or replace the tags recorded for a file
    Tag(TagArgs),
    /// Remove the record for a file (the file itself is kept)
    Untag(UntagArgs),
    /// Search file names and tags
    Search(SearchArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Serve --

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Directory to serve files from
    #[arg(short = 'd', long)]
    pub store_dir: PathBuf,

    /// Port to serve on
    #[arg(
        short,
        long,
        default_value_t = 80,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub port: u16,

    /// Domain this is served under (e.g. app.example.net or 192.168.2.1:80)
    #[arg(short = 'r', long)]
    pub site_root: Option<String>,

    /// Sub-path this is served under; "db" serves the page at /db/
    #[arg(short = 's', long, default_value = "")]
    pub site_path: String,
}

// -- Records --

#[derive(Debug, Parser)]
pub struct TagArgs {
    /// File name, relative to the store directory
    pub name: String,

    /// Tags to record; replaces any existing tags
    pub tags: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct UntagArgs {
    /// File name, relative to the store directory
    pub name: String,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "chaindb",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_serve_defaults() {
        let cli = Cli::parse_from([
            "chaindb",
            "-e",
            "http://localhost:9200",
            "serve",
            "-d",
            "/srv/files",
        ]);
        assert_eq!(cli.engine, EngineKind::Http);
        assert_eq!(cli.index, "documents");
        assert_eq!(cli.search_url.as_deref(), Some("http://localhost:9200"));
        assert_eq!(cli.retry_policy(), RetryPolicy::default());

        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.store_dir, PathBuf::from("/srv/files"));
                assert_eq!(args.port, 80);
                assert!(args.site_root.is_none());
                assert_eq!(args.site_path, "");
            }
            _ => panic!("expected serve command"),
        }
    }

    #[test]
    fn port_must_be_in_range() {
        for port in ["0", "65536", "-1"] {
            assert!(
                Cli::try_parse_from(["chaindb", "serve", "-d", "x", "-p", port])
                    .is_err(),
                "{port}"
            );
        }
        let cli =
            Cli::try_parse_from(["chaindb", "serve", "-d", "x", "-p", "65535"])
                .unwrap();
        assert!(matches!(cli.command, Command::Serve(ServeArgs { port: 65535, .. })));
    }

    #[test]
    fn store_dir_is_required() {
        assert!(Cli::try_parse_from(["chaindb", "serve"]).is_err());
    }

    #[test]
    fn tag_collects_tags() {
        let cli = Cli::parse_from(["chaindb", "tag", "a.txt", "x", "y"]);
        match cli.command {
            Command::Tag(args) => {
                assert_eq!(args.name, "a.txt");
                assert_eq!(args.tags, vec!["x", "y"]);
            }
            _ => panic!("expected tag command"),
        }
    }

    #[test]
    fn global_options_after_subcommand() {
        let cli = Cli::parse_from([
            "chaindb",
            "search",
            "report",
            "--engine",
            "embedded",
            "--max-attempts",
            "3",
            "--retry-delay",
            "0",
            "--json",
        ]);
        assert_eq!(cli.engine, EngineKind::Embedded);
        let policy = cli.retry_policy();
        assert_eq!(policy.delay, Duration::ZERO);
        assert_eq!(policy.max_attempts, NonZeroU32::new(3));
        assert!(matches!(cli.command, Command::Search(SearchArgs { json: true, .. })));
    }

    #[test]
    fn zero_max_attempts_is_rejected() {
        assert!(
            Cli::try_parse_from(["chaindb", "--max-attempts", "0", "search", "x"])
                .is_err()
        );
    }
}
