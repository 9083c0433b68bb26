//! C8 — token counter facade.
//!
//! Grounded on the teacher's workspace dependency on `tiktoken-rs`. A
//! process-wide, lazily-populated, read-dominant cache of BPE encoders
//! (spec §5 "encoder cache... an append-only map... whose entries are
//! lazily constructed once per normalized model name"), mirroring the
//! teacher's `http_client()` `OnceLock`-backed singleton pattern
//! (`crates/llm/src/http_client.rs`) but keyed per-encoding instead of global.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
};

use tiktoken_rs::CoreBPE;

/// Encoding names this facade normalizes model names down to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Encoding {
    Cl100kBase,
    O200kBase,
}

fn normalize_model(model: &str) -> Encoding {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("gpt-4o") || lower.starts_with("o1") {
        Encoding::O200kBase
    } else {
        // `claude-*` and anything unrecognized (spec §4.8).
        Encoding::Cl100kBase
    }
}

fn encoder_cache() -> &'static RwLock<HashMap<Encoding, Arc<CoreBPE>>> {
    static CACHE: OnceLock<RwLock<HashMap<Encoding, Arc<CoreBPE>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

fn build_encoder(encoding: Encoding) -> Option<Arc<CoreBPE>> {
    let bpe = match encoding {
        Encoding::Cl100kBase => tiktoken_rs::cl100k_base(),
        Encoding::O200kBase => tiktoken_rs::o200k_base(),
    };
    bpe.ok().map(Arc::new)
}

fn encoder_for(encoding: Encoding) -> Option<Arc<CoreBPE>> {
    if let Some(encoder) = encoder_cache().read().ok().and_then(|cache| cache.get(&encoding).cloned()) {
        return Some(encoder);
    }

    let encoder = build_encoder(encoding)?;
    if let Ok(mut cache) = encoder_cache().write() {
        cache.entry(encoding).or_insert_with(|| encoder.clone());
    }
    Some(encoder)
}

/// Estimator used when no tokenizer is available: never returns NaN, ∞, or a
/// negative count.
fn estimate(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Counts tokens in `text` for `model`. Falls back to `ceil(len/4)` on any
/// tokenizer failure; never panics, never returns a negative or non-finite
/// count (spec §4.8, §8 invariant 7).
pub fn count(text: &str, model: &str) -> usize {
    let encoding = normalize_model(model);

    match encoder_for(encoding) {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => estimate(text),
    }
}

/// Drops the process-wide encoder cache. Intended for an explicit shutdown
/// hook (spec §3 "Encoder cache... explicitly freed at shutdown"); harmless
/// to call more than once, and the cache simply repopulates lazily on the
/// next `count` call.
pub fn shutdown() {
    if let Ok(mut cache) = encoder_cache().write() {
        cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_non_negative_and_finite_for_edge_inputs() {
        for (text, model) in [("", "claude-3-opus"), ("hello world", "gpt-4o"), ("\u{0}\u{1}", "o1-preview")] {
            let n = count(text, model);
            assert!(n < usize::MAX);
        }
    }

    #[test]
    fn empty_text_counts_to_zero() {
        assert_eq!(count("", "claude-3-opus"), 0);
    }

    #[test]
    fn unknown_model_falls_back_to_cl100k_normalization() {
        // Doesn't panic, returns a sane non-zero count for non-trivial text.
        assert!(count("the quick brown fox", "some-unlisted-model") > 0);
    }

    #[test]
    fn shutdown_then_count_still_works() {
        let _ = count("warm the cache", "claude-3-haiku");
        shutdown();
        assert!(count("after shutdown", "claude-3-haiku") > 0);
    }
}
