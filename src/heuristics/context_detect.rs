//! Domain/system context detection heuristic.

use crate::types::DetectedSystemContext;

struct ContextRule {
    id: &'static str,
    label: &'static str,
    base: f64,
    field_keywords: &'static [&'static str],
    instruction_keywords: &'static [&'static str],
}

const RULES: &[ContextRule] = &[
    ContextRule {
        id: "ecommerce",
        label: "E-commerce",
        base: 0.20,
        field_keywords: &["sku", "price", "order", "cart", "product", "shipping", "quantity"],
        instruction_keywords: &["order", "checkout", "product", "shipment", "catalog"],
    },
    ContextRule {
        id: "crm",
        label: "CRM",
        base: 0.20,
        field_keywords: &["lead", "contact", "deal", "pipeline", "account", "opportunity"],
        instruction_keywords: &["lead", "pipeline", "sales", "crm", "prospect"],
    },
    ContextRule {
        id: "finance",
        label: "Finance",
        base: 0.20,
        field_keywords: &["invoice", "amount", "currency", "total", "tax", "balance", "payment"],
        instruction_keywords: &["invoice", "ledger", "payment", "accounting", "reconcile"],
    },
    ContextRule {
        id: "healthcare",
        label: "Healthcare",
        base: 0.20,
        field_keywords: &["patient", "diagnosis", "medication", "provider", "dosage", "symptom"],
        instruction_keywords: &["patient", "clinical", "diagnosis", "treatment", "provider"],
    },
    ContextRule {
        id: "support",
        label: "Support",
        base: 0.20,
        field_keywords: &["ticket", "priority", "issue", "resolution", "agent", "sla"],
        instruction_keywords: &["ticket", "support", "escalate", "sla", "helpdesk"],
    },
];

/// Scans schema keys, descriptor tokens, and instruction tokens against a
/// fixed rule table and returns the single best match, or `None` if nothing
/// clears the 0.45 floor.
pub fn detect_system_context(
    schema_keys: &[String],
    descriptor_hints: &[String],
    instructions: Option<&str>,
    total_fields: usize,
) -> Option<DetectedSystemContext> {
    let instructions_lower = instructions.unwrap_or("").to_lowercase();

    let mut best: Option<DetectedSystemContext> = None;

    for rule in RULES {
        let mut matched_fields = Vec::new();
        for (key, hint) in schema_keys.iter().zip(descriptor_hints.iter()) {
            let combined = format!("{} {}", key.to_lowercase(), hint.to_lowercase());
            if rule.field_keywords.iter().any(|kw| combined.contains(kw)) {
                matched_fields.push(key.clone());
            }
        }

        let matched_terms: Vec<String> = rule
            .instruction_keywords
            .iter()
            .filter(|kw| instructions_lower.contains(*kw))
            .map(|kw| kw.to_string())
            .collect();

        let coverage = if total_fields == 0 {
            0.0
        } else {
            matched_fields.len() as f64 / total_fields as f64
        };

        let confidence = (rule.base
            + 0.14 * (matched_fields.len().min(5) as f64)
            + 0.10 * (matched_terms.len().min(4) as f64)
            + 0.22 * coverage)
            .min(0.95);

        if confidence < 0.45 {
            continue;
        }

        let candidate = DetectedSystemContext {
            id: rule.id.to_string(),
            label: rule.label.to_string(),
            confidence,
            matched_fields: matched_fields.clone(),
            matched_instruction_terms: matched_terms,
            rationale: format!(
                "{} field(s) and {} instruction term(s) matched the {} rule table",
                matched_fields.len(),
                rule.instruction_keywords.len(),
                rule.label
            ),
        };

        let is_better = match &best {
            None => true,
            Some(current) => {
                candidate.confidence > current.confidence
                    || (candidate.confidence == current.confidence
                        && candidate.matched_fields.len() > current.matched_fields.len())
            }
        };
        if is_better {
            best = Some(candidate);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_finance_context() {
        let keys = vec!["invoice_total".to_string(), "currency".to_string()];
        let hints = vec!["currency".to_string(), "string".to_string()];
        let ctx = detect_system_context(&keys, &hints, Some("generate an invoice payment"), 2);
        let ctx = ctx.expect("expected a detected context");
        assert_eq!(ctx.id, "finance");
        assert!(ctx.confidence >= 0.45);
    }

    #[test]
    fn returns_none_below_floor() {
        let keys = vec!["random_field".to_string()];
        let hints = vec!["string".to_string()];
        assert!(detect_system_context(&keys, &hints, None, 1).is_none());
    }
}
