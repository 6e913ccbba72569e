//! Pre/post-processor hooks: synchronous, ordered transforms run before
//! the Architect sees a request and after the Extractor produces parsed
//! data.

use crate::types::{ParseDiagnostic, ParseRequest, Severity};
use std::collections::HashMap;
use std::sync::Arc;

pub trait RequestProcessor: Send + Sync {
    fn name(&self) -> &str;
    fn process(&self, request: &mut ParseRequest) -> Vec<ParseDiagnostic>;
}

pub trait ResponseProcessor: Send + Sync {
    fn name(&self) -> &str;
    fn process(&self, parsed_data: &mut HashMap<String, serde_json::Value>) -> Vec<ParseDiagnostic>;
}

/// Diagnostics plus the number of processors that ran, for the caller to
/// fold into its own stage metrics.
#[derive(Debug, Clone, Default)]
pub struct ProcessorRunOutcome {
    pub diagnostics: Vec<ParseDiagnostic>,
    pub runs: u32,
}

/// Ordered, mutable-in-place pipeline run once per parse.
#[derive(Clone, Default)]
pub struct ProcessorPipeline {
    request_processors: Vec<Arc<dyn RequestProcessor>>,
    response_processors: Vec<Arc<dyn ResponseProcessor>>,
}

impl ProcessorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_processor(mut self, processor: Arc<dyn RequestProcessor>) -> Self {
        self.request_processors.push(processor);
        self
    }

    pub fn with_response_processor(mut self, processor: Arc<dyn ResponseProcessor>) -> Self {
        self.response_processors.push(processor);
        self
    }

    pub fn run_request(&self, request: &mut ParseRequest) -> ProcessorRunOutcome {
        let mut diagnostics = Vec::new();
        for processor in &self.request_processors {
            diagnostics.extend(processor.process(request));
        }
        ProcessorRunOutcome {
            diagnostics,
            runs: self.request_processors.len() as u32,
        }
    }

    pub fn run_response(
        &self,
        parsed_data: &mut HashMap<String, serde_json::Value>,
    ) -> ProcessorRunOutcome {
        let mut diagnostics = Vec::new();
        for processor in &self.response_processors {
            diagnostics.extend(processor.process(parsed_data));
        }
        ProcessorRunOutcome {
            diagnostics,
            runs: self.response_processors.len() as u32,
        }
    }
}

/// `any error diagnostic forces confidence to 0, any warning caps it at
/// 0.75`. Applied to the postprocess stage's own confidence metric, which
/// the session then folds into the overall aggregated confidence via `min`.
pub fn postprocess_confidence_floor(diagnostics: &[ParseDiagnostic]) -> f64 {
    if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        return 0.0;
    }
    if diagnostics.iter().any(|d| d.severity == Severity::Warning) {
        return 0.75;
    }
    1.0
}

/// Collapses runs of whitespace in `inputData` and trims leading/trailing
/// whitespace from every string value in the parsed output.
pub struct WhitespaceNormalizer;

impl RequestProcessor for WhitespaceNormalizer {
    fn name(&self) -> &str {
        "whitespace-normalizer"
    }

    fn process(&self, request: &mut ParseRequest) -> Vec<ParseDiagnostic> {
        request.input_data = collapse_whitespace(&request.input_data);
        Vec::new()
    }
}

impl ResponseProcessor for WhitespaceNormalizer {
    fn name(&self) -> &str {
        "whitespace-normalizer"
    }

    fn process(&self, parsed_data: &mut HashMap<String, serde_json::Value>) -> Vec<ParseDiagnostic> {
        for value in parsed_data.values_mut() {
            trim_strings(value);
        }
        Vec::new()
    }
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;
    for ch in input.trim().chars() {
        if ch.is_whitespace() && ch != '\n' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out
}

fn trim_strings(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => *s = s.trim().to_string(),
        serde_json::Value::Array(items) => items.iter_mut().for_each(trim_strings),
        serde_json::Value::Object(map) => map.values_mut().for_each(trim_strings),
        _ => {}
    }
}

/// Drops keys whose resolved value is `null`, an empty string, an empty
/// array, or an empty object — "resolved but carries no information".
pub struct EmptyValuePruner;

impl ResponseProcessor for EmptyValuePruner {
    fn name(&self) -> &str {
        "empty-value-pruner"
    }

    fn process(&self, parsed_data: &mut HashMap<String, serde_json::Value>) -> Vec<ParseDiagnostic> {
        parsed_data.retain(|_, value| !is_empty(value));
        Vec::new()
    }
}

fn is_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Normalizes common "no value" string tokens (`"n/a"`, `"none"`, `"null"`,
/// `"-"`, `"tbd"`, case-insensitive) into JSON `null`, so downstream
/// consumers see a consistent absent-value representation.
pub struct NullTokenNormalizer;

const NULL_TOKENS: &[&str] = &["n/a", "none", "null", "-", "tbd", "unknown"];

impl ResponseProcessor for NullTokenNormalizer {
    fn name(&self) -> &str {
        "null-token-normalizer"
    }

    fn process(&self, parsed_data: &mut HashMap<String, serde_json::Value>) -> Vec<ParseDiagnostic> {
        for value in parsed_data.values_mut() {
            normalize(value);
        }
        Vec::new()
    }
}

fn normalize(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if NULL_TOKENS.contains(&s.trim().to_lowercase().as_str()) {
                *value = serde_json::Value::Null;
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(normalize),
        serde_json::Value::Object(map) => map.values_mut().for_each(normalize),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SchemaDescriptor;

    #[test]
    fn whitespace_normalizer_collapses_request_input() {
        let processor = WhitespaceNormalizer;
        let mut request = ParseRequest {
            input_data: "  hello    world  ".to_string(),
            output_schema: indexmap::IndexMap::<String, SchemaDescriptor>::new(),
            instructions: None,
            options: None,
        };
        processor.process(&mut request);
        assert_eq!(request.input_data, "hello world");
    }

    #[test]
    fn empty_value_pruner_drops_blank_entries() {
        let processor = EmptyValuePruner;
        let mut data = HashMap::from([
            ("a".to_string(), serde_json::json!("x")),
            ("b".to_string(), serde_json::json!("")),
            ("c".to_string(), serde_json::Value::Null),
            ("d".to_string(), serde_json::json!([])),
        ]);
        processor.process(&mut data);
        assert_eq!(data.len(), 1);
        assert!(data.contains_key("a"));
    }

    #[test]
    fn null_token_normalizer_converts_known_tokens() {
        let processor = NullTokenNormalizer;
        let mut data = HashMap::from([
            ("a".to_string(), serde_json::json!("N/A")),
            ("b".to_string(), serde_json::json!("Jane")),
        ]);
        processor.process(&mut data);
        assert_eq!(data.get("a"), Some(&serde_json::Value::Null));
        assert_eq!(data.get("b"), Some(&serde_json::json!("Jane")));
    }

    #[test]
    fn pipeline_runs_processors_in_order() {
        let pipeline = ProcessorPipeline::new()
            .with_response_processor(Arc::new(NullTokenNormalizer))
            .with_response_processor(Arc::new(EmptyValuePruner));
        let mut data = HashMap::from([("a".to_string(), serde_json::json!("n/a"))]);
        let outcome = pipeline.run_response(&mut data);
        assert!(data.is_empty());
        assert_eq!(outcome.runs, 2);
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn confidence_floor_is_unconstrained_without_diagnostics() {
        assert_eq!(postprocess_confidence_floor(&[]), 1.0);
    }

    #[test]
    fn confidence_floor_caps_at_075_on_warning() {
        let diagnostics = vec![ParseDiagnostic::new(
            crate::types::Stage::Postprocess,
            crate::types::Severity::Warning,
            "recovered".to_string(),
        )];
        assert_eq!(postprocess_confidence_floor(&diagnostics), 0.75);
    }

    #[test]
    fn confidence_floor_zeroes_on_error() {
        let diagnostics = vec![
            ParseDiagnostic::new(
                crate::types::Stage::Postprocess,
                crate::types::Severity::Warning,
                "recovered".to_string(),
            ),
            ParseDiagnostic::new(
                crate::types::Stage::Postprocess,
                crate::types::Severity::Error,
                "fatal".to_string(),
            ),
        ];
        assert_eq!(postprocess_confidence_floor(&diagnostics), 0.0);
    }
}
