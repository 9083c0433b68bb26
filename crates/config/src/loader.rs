use secrecy::SecretString;

use crate::{
    Config, Error, Protocol, Result,
    proxy_config::ProxyConfig,
    server::ServerConfig,
    token_multiplier::parse_token_multiplier,
    upstream::{Channel, LegacyUpstream, NamedUpstream},
};

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &'static str) -> Result<bool> {
    match env(name) {
        None => Ok(false),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::InvalidBool { name, value }),
        },
    }
}

fn env_u16(name: &'static str, default: u16) -> Result<u16> {
    match env(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| Error::InvalidPort { name, value }),
    }
}

fn env_u64(name: &'static str, default: u64) -> Result<u64> {
    match env(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| Error::InvalidInteger { name, value }),
    }
}

fn env_u32_opt(name: &'static str) -> Result<Option<u32>> {
    match env(name) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidInteger { name, value }),
    }
}

/// Loads [`Config`] from the process environment, per the table in the spec's
/// "Environment variables (recognized)" section.
pub fn load_from_env() -> Result<Config> {
    let server = ServerConfig {
        host: env("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
        port: env_u16("PORT", 8080)?,
        auto_port: env_bool("AUTO_PORT")?,
        client_api_key: env("CLIENT_API_KEY").map(SecretString::from),
    };

    let legacy_upstream = env("UPSTREAM_BASE_URL").map(|base_url| LegacyUpstream {
        base_url,
        api_key: env("UPSTREAM_API_KEY").map(SecretString::from),
        model_override: env("UPSTREAM_MODEL"),
    });

    let upstreams = load_numbered_upstreams()?;
    let channels = load_numbered_channels()?;

    let proxy = ProxyConfig {
        timeout_ms: env_u64("TIMEOUT_MS", 120_000)?,
        aggregation_interval_ms: env_u64("AGGREGATION_INTERVAL_MS", 50)?,
        token_multiplier: parse_token_multiplier(env("TOKEN_MULTIPLIER").as_deref()),
        max_requests_per_minute: env_u32_opt("MAX_REQUESTS_PER_MINUTE")?,
        passthrough_api_key: env_bool("PASSTHROUGH_API_KEY")?,
        max_retries: 2,
        legacy_upstream,
        upstreams,
        channels,
    };

    Ok(Config { server, proxy })
}

fn load_numbered_upstreams() -> Result<Vec<NamedUpstream>> {
    let mut upstreams = Vec::new();

    for index in 1.. {
        let Some(base_url) = env(&format!("UPSTREAM_CONFIG_{index}_BASE_URL")) else {
            break;
        };

        let name_model = env(&format!("UPSTREAM_CONFIG_{index}_NAME_MODEL"))
            .ok_or(Error::UpstreamConfigMissingNameModel { index })?;

        upstreams.push(NamedUpstream {
            name_model,
            base_url,
            api_key: env(&format!("UPSTREAM_CONFIG_{index}_API_KEY")).map(SecretString::from),
            request_model: env(&format!("UPSTREAM_CONFIG_{index}_REQUEST_MODEL")),
        });
    }

    Ok(upstreams)
}

fn load_numbered_channels() -> Result<Vec<Channel>> {
    let mut channels = Vec::new();

    for index in 1.. {
        let Some(base_url) = env(&format!("CHANNEL_{index}_BASE_URL")) else {
            break;
        };

        let name = env(&format!("CHANNEL_{index}_NAME")).ok_or(Error::ChannelMissingName { index })?;

        let protocol = match env(&format!("CHANNEL_{index}_PROTOCOL")) {
            None => Protocol::OpenAi,
            Some(value) => Protocol::parse(&value).ok_or(Error::UnknownProtocol { index, value })?,
        };

        channels.push(Channel {
            name,
            base_url,
            api_key: env(&format!("CHANNEL_{index}_API_KEY")).map(SecretString::from),
            protocol,
        });
    }

    Ok(channels)
}
