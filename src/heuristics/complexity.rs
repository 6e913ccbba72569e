//! Complexity/token-cost estimation heuristics.

use crate::types::PlanComplexity;

/// Coarse complexity tiers based on field count and input length.
pub fn estimate_complexity(field_count: usize, input_len: usize) -> PlanComplexity {
    let score = field_count * 8 + input_len / 200;
    if score < 20 {
        PlanComplexity::Low
    } else if score < 80 {
        PlanComplexity::Medium
    } else {
        PlanComplexity::High
    }
}

/// Token-cost estimate shared by the Architect's confidence/metadata
/// computation: `min(2000, ceil(inputLen/4) + 32*fieldCount)`.
pub fn estimate_token_cost(input_len: usize, field_count: usize) -> u32 {
    let per_char = (input_len as u32).div_ceil(4);
    let per_field = 32 * field_count as u32;
    (per_char + per_field).min(2000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_complexity_for_small_inputs() {
        assert_eq!(estimate_complexity(2, 100), PlanComplexity::Low);
    }

    #[test]
    fn high_complexity_for_large_schema() {
        assert_eq!(estimate_complexity(20, 5000), PlanComplexity::High);
    }

    #[test]
    fn token_cost_is_capped() {
        assert_eq!(estimate_token_cost(100_000, 64), 2000);
    }

    #[test]
    fn token_cost_formula() {
        assert_eq!(estimate_token_cost(40, 2), 10 + 64);
    }
}
