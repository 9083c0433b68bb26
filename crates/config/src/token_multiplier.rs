/// Parses `TOKEN_MULTIPLIER` into a positive, finite multiplier.
///
/// Accepts `1.2`, `1.2x`, `x1.2`, `120%`, and any of those quoted. Anything
/// that isn't a positive finite number (missing, unparsable, zero, negative,
/// `NaN`) falls back to `1.0` rather than erroring — a misconfigured
/// multiplier should never take the proxy down.
pub fn parse_token_multiplier(raw: Option<&str>) -> f64 {
    let Some(raw) = raw else {
        return 1.0;
    };

    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim();

    let (body, is_percent) = match unquoted.strip_suffix('%') {
        Some(body) => (body, true),
        None => (unquoted, false),
    };

    let body = body
        .strip_prefix('x')
        .or_else(|| body.strip_prefix('X'))
        .unwrap_or(body);
    let body = body
        .strip_suffix('x')
        .or_else(|| body.strip_suffix('X'))
        .unwrap_or(body);

    let Ok(mut value) = body.trim().parse::<f64>() else {
        return 1.0;
    };

    if is_percent {
        value /= 100.0;
    }

    if value.is_finite() && value > 0.0 { value } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_one_for_garbage() {
        for input in ["", "abc", "-3", "0", "NaN", "-Infinity"] {
            assert_eq!(parse_token_multiplier(Some(input)), 1.0, "input: {input}");
        }
        assert_eq!(parse_token_multiplier(None), 1.0);
    }

    #[test]
    fn accepts_plain_decimal() {
        assert!((parse_token_multiplier(Some("1.2")) - 1.2).abs() < 1e-9);
    }

    #[test]
    fn accepts_x_suffix_and_prefix() {
        assert!((parse_token_multiplier(Some("1.2x")) - 1.2).abs() < 1e-9);
        assert!((parse_token_multiplier(Some("x1.2")) - 1.2).abs() < 1e-9);
    }

    #[test]
    fn accepts_percent() {
        assert!((parse_token_multiplier(Some("120%")) - 1.2).abs() < 1e-9);
    }

    #[test]
    fn accepts_quoted() {
        assert!((parse_token_multiplier(Some("\"1.2\"")) - 1.2).abs() < 1e-9);
    }
}
