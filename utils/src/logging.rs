//! Logging configuration shared by every binary in the workspace. Embed
//! [`Config`] in the clap arguments of a binary with `#[clap(flatten)]` and
//! call [`Config::init`] once at startup.

use clap::Args;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[derive(Clone, Debug, Default, Args)]
pub struct Config {
    /// Log filter directives, e.g. "info" or "edgefab_node=debug,info".
    #[clap(long, env = "EDGEFAB_LOG", default_value = "info")]
    pub log_filter: String,

    /// Emit logs as single-line JSON objects instead of human-readable text.
    #[clap(long, env = "EDGEFAB_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn init(&self) {
        // RUST_LOG, if set, wins over the CLI flag.
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_filter.clone()));

        let registry = tracing_subscriber::registry().with(filter);
        let result = if self.log_json {
            registry.with(fmt::layer().json().with_target(true)).try_init()
        } else {
            registry.with(fmt::layer().with_target(true)).try_init()
        };
        // A second init (e.g. from tests running in one process) is harmless.
        if result.is_err() {
            tracing::debug!("logging already initialized");
        }
    }
}
