pub mod address;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod mirror;
pub mod types;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{Config, Overrides};

#[derive(Parser)]
#[command(
    name = "gitserve",
    version,
    about = "Serve a git repository over HTTP, kept in sync with its remote"
)]
struct Cli {
    #[command(flatten)]
    options: Options,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Options {
    /// Private key used for ssh remotes
    #[arg(short = 'k', long, env = "GITSERVE_PRIVATE_KEY", global = true)]
    private_key: Option<String>,

    /// Passphrase for the private key
    #[arg(
        short = 'p',
        long,
        env = "GITSERVE_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    password: Option<String>,

    /// Address to listen on, e.g. ":8080" or "127.0.0.1:8080"
    #[arg(short = 'a', long, env = "GITSERVE_ADDRESS", global = true)]
    address: Option<String>,

    /// Time between refreshes, e.g. "30s" or "5m"
    #[arg(
        short = 'i',
        long,
        env = "GITSERVE_INTERVAL",
        value_parser = humantime::parse_duration,
        global = true
    )]
    interval: Option<Duration>,

    /// Keep the mirror in this directory instead of a temporary one
    #[arg(long, env = "GITSERVE_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Only fetch the latest commit
    #[arg(long, env = "GITSERVE_SHALLOW", global = true)]
    shallow: bool,

    /// JSON config file (default: ~/.gitserve.json, then ./.gitserve.json)
    #[arg(short = 'c', long, env = "GITSERVE_CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror a repository and serve its files over HTTP
    Http {
        /// Repository to mirror, e.g. "github.com/owner/repo" or "git@host:owner/repo.git"
        remote: String,
    },
}

impl Cli {
    fn into_overrides(self) -> Overrides {
        let remote = match self.command {
            Commands::Http { remote } => remote,
        };
        let options = self.options;
        Overrides {
            remote,
            private_key: options.private_key,
            password: options.password,
            address: options.address,
            interval: options.interval,
            cache_dir: options.cache_dir,
            shallow: options.shallow,
            config: options.config,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = Config::load(cli.into_overrides())
        .map_err(daemon::ServiceError::from)
        .and_then(daemon::run);

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
