use crate::upstream::{Channel, LegacyUpstream, NamedUpstream};

/// Tuning knobs and upstream tables consumed by the enrichment/dispatch/retry pipeline.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub timeout_ms: u64,
    pub aggregation_interval_ms: u64,
    pub token_multiplier: f64,
    pub max_requests_per_minute: Option<u32>,
    pub passthrough_api_key: bool,
    pub max_retries: u32,

    pub legacy_upstream: Option<LegacyUpstream>,
    pub upstreams: Vec<NamedUpstream>,
    pub channels: Vec<Channel>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            aggregation_interval_ms: 50,
            token_multiplier: 1.0,
            max_requests_per_minute: None,
            passthrough_api_key: false,
            max_retries: 2,
            legacy_upstream: None,
            upstreams: Vec::new(),
            channels: Vec::new(),
        }
    }
}

impl ProxyConfig {
    /// At least one way of reaching an upstream has been configured.
    pub fn has_upstream(&self) -> bool {
        self.legacy_upstream.is_some() || !self.upstreams.is_empty() || !self.channels.is_empty()
    }
}
