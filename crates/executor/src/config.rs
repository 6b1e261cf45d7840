use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_BIND: &str = "0.0.0.0:4242";
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Command line flags. Every flag falls back to an environment variable.
#[derive(Debug, Parser)]
#[command(author, version, about = "Run commands in response to Alertmanager webhooks", long_about = None)]
pub struct Cli {
    /// IP:PORT to listen for HTTP requests
    #[arg(short, long, env = "AMEXEC_BIND", default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Handler configuration file
    #[arg(short, long, env = "AMEXEC_CONFIG", default_value = "./config.yaml")]
    pub config: PathBuf,

    /// Activate debug mode: commands are rendered but never executed
    #[arg(short, long, env = "AMEXEC_DEBUG")]
    pub debug: bool,

    /// Verbose logging, including request and response bodies
    #[arg(short, long, env = "AMEXEC_VERBOSE")]
    pub verbose: bool,

    /// Command/handler timeout (e.g. 30s, 2m)
    #[arg(short, long, env = "AMEXEC_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Maximum request body size in bytes
    #[arg(long, env = "AMEXEC_BODY_LIMIT", default_value_t = DEFAULT_BODY_LIMIT)]
    pub body_limit: usize,

    /// Maximum number of commands running at once (unbounded when unset)
    #[arg(long, env = "AMEXEC_MAX_CONCURRENT")]
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    /// Requests with a body of this many bytes or more are rejected.
    pub body_limit: usize,
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_BIND.to_string(),
            body_limit: DEFAULT_BODY_LIMIT,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub debug: bool,
    pub timeout: Duration,
    pub max_concurrent_commands: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            debug: false,
            timeout: DEFAULT_TIMEOUT,
            max_concurrent_commands: None,
        }
    }
}

/// Process-wide settings, frozen after startup.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub execution: ExecutionConfig,
    pub handlers_path: PathBuf,
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> crate::Result<Self> {
        if cli.timeout.is_zero() {
            return Err(crate::Error::Config("timeout must be greater than zero".to_string()));
        }
        if cli.body_limit == 0 {
            return Err(crate::Error::Config("body limit must be greater than zero".to_string()));
        }
        if cli.max_concurrent == Some(0) {
            return Err(crate::Error::Config(
                "max concurrent commands must be greater than zero".to_string(),
            ));
        }

        Ok(Config {
            server: ServerConfig {
                addr: cli.bind,
                body_limit: cli.body_limit,
                verbose: cli.verbose,
            },
            execution: ExecutionConfig {
                debug: cli.debug,
                timeout: cli.timeout,
                max_concurrent_commands: cli.max_concurrent,
            },
            handlers_path: cli.config,
        })
    }
}
