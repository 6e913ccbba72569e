//! Type inference heuristic.

use crate::types::{SchemaDescriptor, ValidationType};

/// Ordered key-token precedence table. First match wins.
const KEY_TOKEN_TABLE: &[(&[&str], ValidationType)] = &[
    (&["email"], ValidationType::Email),
    (&["phone"], ValidationType::Phone),
    (&["date", "iso"], ValidationType::Date),
    (&["url", "link"], ValidationType::Url),
    (&["count", "number", "total"], ValidationType::Number),
    (&["flag", "is_", "has_"], ValidationType::Boolean),
    (&["ids", "numbers"], ValidationType::NumberArray),
    (&["list", "tags"], ValidationType::StringArray),
    (&["amount", "price", "cost"], ValidationType::Currency),
    (&["percent", "ratio"], ValidationType::Percentage),
    (&["address", "location"], ValidationType::Address),
    (&["name", "contact"], ValidationType::Name),
];

fn explicit_type_from_str(hint: &str) -> Option<ValidationType> {
    let lower = hint.to_lowercase();
    match lower.as_str() {
        "string" => Some(ValidationType::String),
        "number" => Some(ValidationType::Number),
        "boolean" | "bool" => Some(ValidationType::Boolean),
        "email" => Some(ValidationType::Email),
        "phone" => Some(ValidationType::Phone),
        "date" => Some(ValidationType::Date),
        "iso_date" | "isodate" => Some(ValidationType::IsoDate),
        "url" => Some(ValidationType::Url),
        "string_array" | "stringarray" => Some(ValidationType::StringArray),
        "number_array" | "numberarray" => Some(ValidationType::NumberArray),
        "currency" => Some(ValidationType::Currency),
        "percentage" => Some(ValidationType::Percentage),
        "address" => Some(ValidationType::Address),
        "name" => Some(ValidationType::Name),
        "object" => Some(ValidationType::Object),
        "custom" => Some(ValidationType::Custom),
        _ => None,
    }
}

fn match_tokens(haystack: &str) -> Option<ValidationType> {
    let lower = haystack.to_lowercase();
    KEY_TOKEN_TABLE
        .iter()
        .find(|(tokens, _)| tokens.iter().any(|t| lower.contains(t)))
        .map(|(_, vt)| *vt)
}

/// Precedence: explicit descriptor type name -> descriptor string tokens ->
/// key tokens -> default `string`.
pub fn detect_validation_type(key: &str, descriptor: &SchemaDescriptor) -> ValidationType {
    if let SchemaDescriptor::Typed(typed) = descriptor {
        if let Some(hint) = &typed.type_hint {
            if let Some(vt) = explicit_type_from_str(hint) {
                return vt;
            }
            if let Some(vt) = match_tokens(hint) {
                return vt;
            }
        }
    }

    let hint_str = descriptor.as_hint_str();
    if !hint_str.is_empty() {
        if let Some(vt) = explicit_type_from_str(&hint_str) {
            return vt;
        }
        if let Some(vt) = match_tokens(&hint_str) {
            return vt;
        }
    }

    if let Some(vt) = match_tokens(key) {
        return vt;
    }

    ValidationType::String
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::request::TypedDescriptor;

    fn hint(s: &str) -> SchemaDescriptor {
        SchemaDescriptor::Hint(s.to_string())
    }

    #[test]
    fn explicit_descriptor_wins() {
        assert_eq!(
            detect_validation_type("total_count", &hint("email")),
            ValidationType::Email
        );
    }

    #[test]
    fn key_tokens_used_when_descriptor_uninformative() {
        assert_eq!(
            detect_validation_type("contact_email", &hint("")),
            ValidationType::Email
        );
        assert_eq!(detect_validation_type("item_count", &hint("")), ValidationType::Number);
        assert_eq!(detect_validation_type("is_active", &hint("")), ValidationType::Boolean);
        assert_eq!(detect_validation_type("tag_list", &hint("")), ValidationType::StringArray);
        assert_eq!(
            detect_validation_type("invoice_total", &hint("")),
            ValidationType::Number
        );
    }

    #[test]
    fn defaults_to_string() {
        assert_eq!(detect_validation_type("random_field", &hint("")), ValidationType::String);
    }

    #[test]
    fn typed_descriptor_type_hint_respected() {
        let d = SchemaDescriptor::Typed(TypedDescriptor {
            type_hint: Some("currency".to_string()),
            optional: true,
        });
        assert_eq!(detect_validation_type("amount", &d), ValidationType::Currency);
    }
}
