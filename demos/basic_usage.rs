//! Basic usage examples for parserator-core.
//!
//! Demonstrates one-shot parsing, session reuse, profile-driven
//! configuration, and telemetry hookup.

use parserator_core::{Config, ParseOptions, ParseRequest, Parserator, SchemaDescriptor};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::main]
async fn main() -> parserator_core::Result<()> {
    one_shot_parse_example().await;
    session_reuse_example().await;
    profile_example().await;
    telemetry_example().await;

    println!("All examples completed successfully!");
    Ok(())
}

fn schema(pairs: &[(&str, &str)]) -> indexmap::IndexMap<String, SchemaDescriptor> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), SchemaDescriptor::Hint(v.to_string())))
        .collect()
}

/// Parsing a single input with no session: every call builds its own plan.
async fn one_shot_parse_example() {
    println!("=== One-shot Parse Example ===");

    let parserator = Parserator::new();
    let request = ParseRequest::new(
        r#"{"email": "jane@example.com", "order_total": "204.50"}"#,
        schema(&[("email", "email"), ("order_total", "currency")]),
    );

    let response = parserator.parse(request).await;
    println!("success: {}", response.success);
    println!("parsed_data: {:?}", response.parsed_data);
    println!("confidence: {:.2}", response.metadata.confidence);
}

/// Reusing a `Session` across parses amortizes the Architect stage: only
/// the first call pays for plan construction, later calls reuse the
/// cached plan as long as the schema/instructions/options are unchanged.
async fn session_reuse_example() {
    println!("\n=== Session Reuse Example ===");

    let parserator = Parserator::new();
    let session = parserator
        .create_session(parserator_core::SessionInit {
            output_schema: schema(&[("contact_name", "name"), ("phone", "phone"), ("email", "email")]),
            instructions: None,
            options: Some(ParseOptions {
                confidence_threshold: Some(0.5),
                ..Default::default()
            }),
            seed_input: None,
            auto_refresh: None,
            plan: None,
        })
        .await;

    let first = session
        .parse("Contact: Jane Doe\nPhone: +1 555 123 4567\nEmail: jane@example.com", None)
        .await;
    println!("first parse architect tokens: {}", first.metadata.architect_tokens);

    let second = session.parse("Name: Bob Smith\nPhone: 555-0100\nEmail: b@c.io", None).await;
    println!("second parse architect tokens (expect 0, cached): {}", second.metadata.architect_tokens);
    println!("plan ids match: {}", first.metadata.architect_plan.id == second.metadata.architect_plan.id);
}

/// Profiles bundle an architect mode, confidence floor, and resolver
/// toggles under one name. `lean-agent`/`vibe-coder`/`sensor-grid` ship as
/// defaults; a caller can add its own via `Config::profiles`.
async fn profile_example() {
    println!("\n=== Profile Example ===");

    let config = Config::default();
    let parserator = Parserator::builder().with_config(config).with_profile("sensor-grid").build();

    let request = ParseRequest::new(
        "temp=21.4C humidity=55% status=ok",
        schema(&[("temperature", "number"), ("humidity", "percentage")]),
    );
    let response = parserator.parse(request).await;
    println!("sensor-grid profile confidence: {:.2}", response.metadata.confidence);
}

/// Registering a telemetry listener surfaces every lifecycle event the
/// core emits (`parse:start`, `parse:stage`, `parse:success`/`failure`,
/// plan cache/rewrite/auto-refresh events) without changing `parse()`'s
/// call shape.
async fn telemetry_example() {
    println!("\n=== Telemetry Example ===");

    let parserator = Parserator::new();
    let event_count = Arc::new(AtomicUsize::new(0));
    let event_count_listener = event_count.clone();
    parserator
        .add_telemetry_listener(move |_event| {
            event_count_listener.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    let request = ParseRequest::new(r#"{"email": "a@b.com"}"#, schema(&[("email", "email")]));
    parserator.parse(request).await;

    println!("telemetry events observed: {}", event_count.load(Ordering::SeqCst));
}
