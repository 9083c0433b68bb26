use secrecy::SecretString;

use crate::Protocol;

/// A resolved upstream endpoint: where to send the request, how to authenticate,
/// which model name the upstream should see, and which wire dialect it speaks.
///
/// This is the output of channel resolution (spec C3), not a config-file shape;
/// [`LegacyUpstream`], [`NamedUpstream`] and [`Channel`] are the raw configured
/// entries this gets built from.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub upstream_model: String,
    pub protocol: Protocol,
}

/// `UPSTREAM_BASE_URL` / `UPSTREAM_API_KEY` / `UPSTREAM_MODEL`.
///
/// The fallback used when a client's model string matches neither a channel
/// nor a numbered `UPSTREAM_CONFIG_n` entry.
#[derive(Debug, Clone)]
pub struct LegacyUpstream {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    /// `UPSTREAM_MODEL`: overrides the client's model string when set.
    pub model_override: Option<String>,
}

/// One `UPSTREAM_CONFIG_{n}_*` entry, matched by `name_model == request.model`.
#[derive(Debug, Clone)]
pub struct NamedUpstream {
    pub name_model: String,
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub request_model: Option<String>,
}

/// One `CHANNEL_{n}_*` entry, selected via the client-visible `channel+model` syntax.
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub protocol: Protocol,
}
