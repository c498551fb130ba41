//! Published per-model price table.
//!
//! If a model is missing here the call still succeeds — cost is reported as
//! `None` ("unknown") rather than failing the call. Prices are USD per
//! million tokens, matching the convention the teacher's cost tracker uses
//! for its Grok pricing constants.

/// (input $/M tokens, output $/M tokens, cached-input $/M tokens)
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cached_input_per_million: f64,
}

pub fn lookup(model: &str) -> Option<ModelPrice> {
    match model {
        "grok-4-1-fast-reasoning" | "grok-4-1-fast" | "grok-4.1" => Some(ModelPrice {
            input_per_million: 0.20,
            output_per_million: 0.50,
            cached_input_per_million: 0.05,
        }),
        "claude-opus-4-5" => Some(ModelPrice {
            input_per_million: 15.0,
            output_per_million: 75.0,
            cached_input_per_million: 1.50,
        }),
        "claude-sonnet-4-5" => Some(ModelPrice {
            input_per_million: 3.0,
            output_per_million: 15.0,
            cached_input_per_million: 0.30,
        }),
        "gemini-2.0-flash-exp" => Some(ModelPrice {
            input_per_million: 0.0,
            output_per_million: 0.0,
            cached_input_per_million: 0.0,
        }),
        "gpt-4o-mini" => Some(ModelPrice {
            input_per_million: 0.15,
            output_per_million: 0.60,
            cached_input_per_million: 0.075,
        }),
        _ => None,
    }
}

/// Compute the dollar cost of a call, or `None` if the model isn't in the
/// price table. Never an error — an unpriced model should never block a
/// call from succeeding.
pub fn cost_usd(model: &str, input_tokens: u64, output_tokens: u64, cached_tokens: u64) -> Option<f64> {
    let price = lookup(model)?;
    let billable_input = input_tokens.saturating_sub(cached_tokens);
    Some(
        (billable_input as f64 / 1_000_000.0) * price.input_per_million
            + (cached_tokens as f64 / 1_000_000.0) * price.cached_input_per_million
            + (output_tokens as f64 / 1_000_000.0) * price.output_per_million,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_has_cost() {
        let cost = cost_usd("grok-4-1-fast-reasoning", 1_000_000, 0, 0).unwrap();
        assert!((cost - 0.20).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_returns_none() {
        assert!(cost_usd("some-unreleased-model", 1000, 1000, 0).is_none());
    }

    #[test]
    fn cached_tokens_are_cheaper_than_fresh_input() {
        let cached = cost_usd("grok-4-1-fast-reasoning", 1_000_000, 0, 1_000_000).unwrap();
        let fresh = cost_usd("grok-4-1-fast-reasoning", 1_000_000, 0, 0).unwrap();
        assert!(cached < fresh);
    }
}
