//! C3 — channel resolver.
//!
//! Mirrors the teacher's `ModelManager` lookup order (try a named provider
//! entry first, fall back to the default) but adds the `channel+model`
//! client-visible syntax and the passthrough-API-key override from spec §4.3.

use secrecy::SecretString;

use config::{Channel, Protocol, ProxyConfig, UpstreamConfig};

use crate::error::{ProxyError, Result};

/// Resolves a client-supplied `model` string to a concrete upstream.
///
/// Resolution order:
/// 1. `model` contains `+` and the prefix names a configured channel: use the
///    channel's `base_url`/`api_key`/`protocol`, with the suffix as `upstream_model`.
/// 2. A numbered `UPSTREAM_CONFIG_n` entry whose `name_model` matches `model` exactly.
/// 3. The single legacy upstream, with `upstream_model` from `UPSTREAM_MODEL` or,
///    absent that, the client's own `model` string.
///
/// A client-presented API key overrides the resolved one when
/// `passthrough_api_key` is enabled.
pub fn resolve(model: &str, config: &ProxyConfig, client_api_key: Option<&str>) -> Result<UpstreamConfig> {
    let mut resolved = resolve_upstream(model, config)?;

    if config.passthrough_api_key {
        if let Some(key) = client_api_key {
            resolved.api_key = Some(SecretString::from(key.to_string()));
        }
    }

    Ok(resolved)
}

fn resolve_upstream(model: &str, config: &ProxyConfig) -> Result<UpstreamConfig> {
    if let Some((channel_name, upstream_model)) = model.split_once('+') {
        if let Some(channel) = config.channels.iter().find(|c| c.name == channel_name) {
            return Ok(from_channel(channel, upstream_model));
        }
    }

    if let Some(named) = config.upstreams.iter().find(|u| u.name_model == model) {
        return Ok(UpstreamConfig {
            base_url: named.base_url.clone(),
            api_key: named.api_key.clone(),
            upstream_model: named.request_model.clone().unwrap_or_else(|| model.to_string()),
            protocol: Protocol::OpenAi,
        });
    }

    if let Some(legacy) = &config.legacy_upstream {
        return Ok(UpstreamConfig {
            base_url: legacy.base_url.clone(),
            api_key: legacy.api_key.clone(),
            upstream_model: legacy.model_override.clone().unwrap_or_else(|| model.to_string()),
            protocol: Protocol::OpenAi,
        });
    }

    Err(ProxyError::Config(format!(
        "no upstream configured for model '{model}'"
    )))
}

fn from_channel(channel: &Channel, upstream_model: &str) -> UpstreamConfig {
    UpstreamConfig {
        base_url: channel.base_url.clone(),
        api_key: channel.api_key.clone(),
        upstream_model: upstream_model.to_string(),
        protocol: channel.protocol,
    }
}
