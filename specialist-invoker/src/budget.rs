//! Token-budget pre-clamp math. A char/4 heuristic for text,
//! plus a flat ceiling for an attached image, with a hard safety margin
//! that `max_output_tokens` is never reduced below.

/// Coarse chars-per-token heuristic; good enough for a pre-dispatch clamp,
/// not for billing.
const CHARS_PER_TOKEN: f64 = 4.0;
/// Flat per-image token-cost ceiling used for budget planning, independent
/// of actual resolution (the invoker downscales before dispatch anyway).
const IMAGE_TOKEN_CEILING: u32 = 1500;
/// `max_output_tokens` is never clamped below this floor.
pub const MIN_OUTPUT_TOKENS: u32 = 128;
/// Overflow-retry reduction: cut `max_output_tokens` by at least this
/// fraction on a `max_tokens` overflow from the serving layer.
pub const OVERFLOW_REDUCTION_FRACTION: f64 = 0.25;

pub fn estimate_input_tokens(prompt: &str, has_image: bool) -> u32 {
    let text_tokens = (prompt.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as u32;
    if has_image {
        text_tokens.saturating_add(IMAGE_TOKEN_CEILING)
    } else {
        text_tokens
    }
}

/// If `input_estimate + requested_max_output` would exceed `context_limit`,
/// reduces `requested_max_output` to fit, down to `MIN_OUTPUT_TOKENS`.
/// Returns the (possibly unchanged) output budget to use.
pub fn clamp_max_output_tokens(input_estimate: u32, requested_max_output: u32, context_limit: u32) -> u32 {
    let total = input_estimate.saturating_add(requested_max_output);
    if total <= context_limit {
        return requested_max_output;
    }
    let available = context_limit.saturating_sub(input_estimate);
    available.max(MIN_OUTPUT_TOKENS).min(requested_max_output.max(MIN_OUTPUT_TOKENS))
}

/// Overflow-retry reduction of `max_output_tokens` by at least 25%.
pub fn reduce_for_overflow(current_max_output: u32) -> u32 {
    let reduced = (f64::from(current_max_output) * (1.0 - OVERFLOW_REDUCTION_FRACTION)).floor() as u32;
    reduced.max(MIN_OUTPUT_TOKENS).min(current_max_output.saturating_sub(1).max(MIN_OUTPUT_TOKENS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_clamp_when_under_context_limit() {
        let result = clamp_max_output_tokens(1000, 2000, 32_000);
        assert_eq!(result, 2000);
    }

    #[test]
    fn clamps_down_when_over_context_limit() {
        let result = clamp_max_output_tokens(31_000, 4000, 32_000);
        assert!(result < 4000);
        assert!(result >= MIN_OUTPUT_TOKENS);
    }

    #[test]
    fn image_adds_token_ceiling() {
        let without = estimate_input_tokens("a".repeat(400).as_str(), false);
        let with_image = estimate_input_tokens("a".repeat(400).as_str(), true);
        assert_eq!(with_image - without, IMAGE_TOKEN_CEILING);
    }

    #[test]
    fn overflow_reduction_cuts_at_least_a_quarter() {
        let reduced = reduce_for_overflow(1000);
        assert!(reduced <= 750);
        assert!(reduced >= MIN_OUTPUT_TOKENS);
    }
}
