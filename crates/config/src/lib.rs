//! Environment-variable configuration for the tool-calling bridge.
//!
//! Mirrors the teacher's `config` crate shape (structured types + a
//! dedicated `Error` + a loader function) but sources from the process
//! environment instead of a TOML file, per the spec's env-var table.

mod error;
mod loader;
mod protocol;
mod proxy_config;
mod server;
mod token_multiplier;
mod upstream;

pub use error::{Error, Result};
pub use protocol::Protocol;
pub use proxy_config::ProxyConfig;
pub use server::ServerConfig;
pub use token_multiplier::parse_token_multiplier;
pub use upstream::{Channel, LegacyUpstream, NamedUpstream, UpstreamConfig};

/// Root configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// Returns [`Error::NoUpstreamConfigured`] if neither a legacy upstream,
    /// a numbered upstream config, nor a channel is present — the proxy would
    /// otherwise start and reject every request.
    pub fn from_env() -> Result<Self> {
        let config = loader::load_from_env()?;

        if !config.proxy.has_upstream() {
            return Err(Error::NoUpstreamConfigured);
        }

        Ok(config)
    }
}
