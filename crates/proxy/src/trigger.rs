//! C1 — trigger-signal generator.

use rand::Rng;
use rand::distr::Alphanumeric;

/// The bundle of markers (spec §3 `TriggerDelimiter`) shared by the prompt
/// injector and the incremental parser for one request. Generated fresh per
/// request and never persisted.
#[derive(Debug, Clone)]
pub struct TriggerDelimiter {
    pub tc_start: String,
}

pub const INVOKE_OPEN: &str = "<invoke name=\"";
pub const INVOKE_CLOSE: &str = "</invoke>";
pub const PARAM_OPEN: &str = "<parameter name=\"";
pub const PARAM_CLOSE: &str = "</parameter>";

impl TriggerDelimiter {
    /// Generates `<<CALL_xxxx>>` with 4 random alphanumerics. Case-sensitive,
    /// whitespace-free, opaque to everything downstream.
    pub fn generate() -> Self {
        Self {
            tc_start: format!("<<CALL_{}>>", random_alnum(4)),
        }
    }
}

/// Draws `len` random alphanumeric characters, shared by the trigger
/// generator (C1) and everywhere else this bridge mints an opaque id
/// (`toolu_` tool-use ids in C6, non-streaming tool-use ids in C10).
pub fn random_alnum(len: usize) -> String {
    rand::rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_expected_shape() {
        let delimiter = TriggerDelimiter::generate();
        assert!(delimiter.tc_start.starts_with("<<CALL_"));
        assert!(delimiter.tc_start.ends_with(">>"));
        assert!(!delimiter.tc_start.chars().any(char::is_whitespace));
        assert_eq!(delimiter.tc_start.len(), "<<CALL_".len() + 4 + ">>".len());
    }

    #[test]
    fn vanishingly_low_collision_rate() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            seen.insert(TriggerDelimiter::generate().tc_start);
        }
        // 62^4 possibilities; 1000 draws colliding down to <900 distinct would
        // indicate a broken RNG, not bad luck.
        assert!(seen.len() > 900);
    }
}
