//! Integration tests for span finalization
//!
//! Exercises the controller against sinks with a hard attribute cap, the
//! exactly-once guarantee, and the proxy-driven end-to-end flow.

use std::convert::Infallible;

use serde_json::{Value, json};

use streamtap::attributes::FlattenExtractor;
use streamtap::config::Config;
use streamtap::span::{AttributeValue, ExceptionRecord, SpanStatus};
use streamtap::testing::RecordingSpan;
use streamtap::{DeltaAccumulator, SpanLifecycleController, StreamOutcome, StreamProxy};

fn wide_response(fields: usize) -> Value {
    let usage: serde_json::Map<String, Value> = (0..fields)
        .map(|i| (format!("field_{i:03}"), json!(i)))
        .collect();
    json!({ "usage": usage })
}

// =============================================================================
// Attribute ceiling
// =============================================================================

mod ceiling_tests {
    use super::*;

    #[test]
    fn test_core_attributes_survive_exporter_cap() {
        let (span, handle) = RecordingSpan::new();
        let mut controller = SpanLifecycleController::new(
            span.with_attribute_limit(10),
            FlattenExtractor::default(),
        )
        .max_attributes(10);

        controller.finish(Some(&wide_response(50)), StreamOutcome::Completed);

        let record = handle.snapshot();
        assert_eq!(record.attributes.len(), 10);
        assert_eq!(record.dropped_attributes, 0);
        assert!(record.attribute("output.value").is_some());
        assert_eq!(
            record.attribute("output.mime_type"),
            Some(&AttributeValue::String("application/json".to_string()))
        );
    }

    #[test]
    fn test_uncapped_controller_overflows_exporter() {
        let (span, handle) = RecordingSpan::new();
        let mut controller = SpanLifecycleController::new(
            span.with_attribute_limit(10),
            FlattenExtractor::default(),
        )
        .max_attributes(usize::MAX);

        controller.finish(Some(&wide_response(50)), StreamOutcome::Completed);

        let record = handle.snapshot();
        assert_eq!(record.attributes.len(), 10);
        assert_eq!(record.dropped_attributes, 42);
        // core attributes are attached before anything else
        assert!(record.attribute("output.value").is_some());
    }

    #[test]
    fn test_ceiling_from_config() {
        let config = Config::from_toml_str("[span]\nmax_attributes = 5").unwrap();
        let (span, handle) = RecordingSpan::new();
        let mut controller = SpanLifecycleController::from_config(
            Box::new(span),
            Box::new(FlattenExtractor::default()),
            &config,
        );

        controller.finish(Some(&wide_response(20)), StreamOutcome::Completed);

        assert_eq!(handle.snapshot().attributes.len(), 5);
    }

    #[test]
    fn test_small_response_attaches_everything() {
        let (span, handle) = RecordingSpan::new();
        let mut controller = SpanLifecycleController::new(span, FlattenExtractor::default());

        controller.finish(Some(&wide_response(3)), StreamOutcome::Completed);

        let record = handle.snapshot();
        assert_eq!(record.attributes.len(), 5);
        assert_eq!(
            record.attribute("llm.output.usage.field_002"),
            Some(&AttributeValue::Int(2))
        );
    }
}

// =============================================================================
// Exactly-once finalization
// =============================================================================

mod finalization_tests {
    use super::*;

    #[test]
    fn test_finish_after_failure_is_ignored() {
        let (span, handle) = RecordingSpan::new();
        let mut controller = SpanLifecycleController::new(span, FlattenExtractor::default());

        controller.finish(
            None,
            StreamOutcome::Failed(ExceptionRecord::new("Timeout", "read timed out")),
        );
        controller.finish(Some(&json!({"late": true})), StreamOutcome::Completed);

        let record = handle.snapshot();
        assert_eq!(record.end_count, 1);
        assert_eq!(
            record.status,
            SpanStatus::Error("Timeout: read timed out".to_string())
        );
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn test_first_chunk_after_finish_is_ignored() {
        let (span, handle) = RecordingSpan::new();
        let mut controller = SpanLifecycleController::new(span, FlattenExtractor::default());

        controller.finish(None, StreamOutcome::Completed);
        controller.record_first_chunk();

        assert!(handle.snapshot().events.is_empty());
    }

    #[test]
    fn test_proxy_drives_single_finalization() {
        let (span, handle) = RecordingSpan::new();
        let controller = SpanLifecycleController::new(span, FlattenExtractor::default());
        let mut proxy = StreamProxy::new(
            vec![
                Ok::<_, Infallible>(json!({"model": "m"})),
                Ok(json!({"model": "m", "id": "r1"})),
            ]
            .into_iter(),
            DeltaAccumulator::dynamic(),
            controller,
        );

        while proxy.next().is_some() {}
        for _ in 0..3 {
            assert!(proxy.next().is_none());
        }

        let record = handle.snapshot();
        assert_eq!(record.end_count, 1);
        assert_eq!(record.events.len(), 1);
        assert_eq!(record.status, SpanStatus::Ok);
        assert_eq!(
            record.attribute("output.value"),
            Some(&AttributeValue::String(r#"{"id":"r1","model":"m"}"#.to_string()))
        );
    }
}
