//! C9 — request context.
//!
//! Grounded on the teacher's `RequestContext` (`crates/llm/src/request.rs`):
//! an immutable, per-request value built once at entry and carried through
//! the rest of the pipeline. This bridge's version additionally carries the
//! enriched request and trigger delimiter produced by C2/C1, since here
//! (unlike the teacher) the request body itself is rewritten before dispatch.

use secrecy::SecretString;

use config::UpstreamConfig;

use crate::{error::Result, model::ClientRequest, prompt, trigger::TriggerDelimiter};

/// Immutable per-request value carrying the enriched request, delimiter,
/// resolved upstream, and request id (spec §3 `RequestContext`).
///
/// Invariant: `delimiter` is `Some` iff `original.tools` is non-empty.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub upstream: UpstreamConfig,
    pub original: ClientRequest,
    pub enriched: ClientRequest,
    pub delimiter: Option<TriggerDelimiter>,
    pub client_api_key: Option<SecretString>,
}

impl RequestContext {
    /// Builds a context for one request: resolves the upstream (C3) and
    /// enriches the request with a tool catalog + trigger signal (C2).
    pub fn build(
        request_id: String,
        original: ClientRequest,
        proxy_config: &config::ProxyConfig,
        client_api_key: Option<SecretString>,
    ) -> Result<Self> {
        let upstream = crate::channel::resolve(
            &original.model,
            proxy_config,
            client_api_key.as_ref().map(|k| {
                use secrecy::ExposeSecret;
                k.expose_secret()
            }),
        )?;

        let (enriched, delimiter) = prompt::enrich(&original);

        debug_assert_eq!(original.has_tools(), delimiter.is_some());

        Ok(Self {
            request_id,
            upstream,
            original,
            enriched,
            delimiter,
            client_api_key,
        })
    }
}
