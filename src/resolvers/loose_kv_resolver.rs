//! Optional loose key/value resolver: fuzzy-matches `label: value` and
//! `label=value` pairs against the target key when nothing stricter fired.
//! Lower confidence than every other built-in resolver; profiles opt into
//! it explicitly.

use crate::resolvers::registry::{FieldResolver, ResolverContext, ResolverOutcome};
use async_trait::async_trait;

pub struct LooseKvResolver;

#[async_trait]
impl FieldResolver for LooseKvResolver {
    fn name(&self) -> &str {
        "loose-kv"
    }

    async fn resolve(&self, ctx: &ResolverContext<'_>) -> ResolverOutcome {
        let target_norm = normalize(&ctx.step.target_key);
        if target_norm.is_empty() {
            return ResolverOutcome::NotFound;
        }

        let mut best: Option<(String, f64)> = None;
        for line in ctx.input_data.lines() {
            for (label, value) in candidate_pairs(line) {
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                let label_norm = normalize(label);
                if label_norm.is_empty() {
                    continue;
                }
                let score = similarity(&target_norm, &label_norm);
                if score < 0.5 {
                    continue;
                }
                if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                    best = Some((value.to_string(), score));
                }
            }
        }

        match best {
            Some((value, score)) => ResolverOutcome::Resolved {
                value: serde_json::Value::String(value),
                confidence: (0.35 + 0.3 * score).min(0.6),
                diagnostics: Vec::new(),
            },
            None => ResolverOutcome::NotFound,
        }
    }
}

fn candidate_pairs(line: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    if let Some(idx) = line.find(':') {
        pairs.push((&line[..idx], &line[idx + 1..]));
    }
    if let Some(idx) = line.find('=') {
        pairs.push((&line[..idx], &line[idx + 1..]));
    }
    pairs
}

fn normalize(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase()
}

/// `1.0` on exact match, `0.8` when one contains the other, otherwise the
/// longest-common-substring ratio. Deliberately simple — this resolver is a
/// last resort before the LLM fallback, not a replacement for it.
fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if a.contains(b) || b.contains(a) {
        return 0.8;
    }
    let common = longest_common_substring_len(a, b);
    common as f64 / a.len().max(b.len()) as f64
}

fn longest_common_substring_len(a: &str, b: &str) -> usize {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    let mut dp = vec![vec![0usize; b_bytes.len() + 1]; a_bytes.len() + 1];
    let mut best = 0;
    for i in 1..=a_bytes.len() {
        for j in 1..=b_bytes.len() {
            if a_bytes[i - 1] == b_bytes[j - 1] {
                dp[i][j] = dp[i - 1][j - 1] + 1;
                best = best.max(dp[i][j]);
            }
        }
    }
    best
}
