use std::collections::HashMap;

use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::error;

/// The metadata key the original agent and this one both use to carry a
/// JSON-encoded W3C trace-context map carrier alongside an order or message.
pub const OTEL_CTX_KEY: &str = "_otelCtx";

struct MapCarrier<'a>(&'a HashMap<String, String>);

impl Extractor for MapCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

struct MapInjector<'a>(&'a mut HashMap<String, String>);

impl Injector for MapInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

/// Extracts the trace context carried in `order.metadata["_otelCtx"]`. Absence
/// or unparsable JSON is logged but never fails the receive, matching the
/// original `ExtractOtelCtxFromMessage`.
pub fn extract_otel_ctx(metadata: &HashMap<String, String>) -> Context {
    let Some(raw) = metadata.get(OTEL_CTX_KEY) else {
        error!("_otelCtx metadata key not found on received order");
        return Context::new();
    };

    let carrier: HashMap<String, String> = match serde_json::from_str(raw) {
        Ok(carrier) => carrier,
        Err(err) => {
            error!(error = %err, "failed to parse _otelCtx metadata");
            return Context::new();
        }
    };

    let propagator = TraceContextPropagator::new();
    propagator.extract(&MapCarrier(&carrier))
}

/// Injects the current trace context into `message.metadata["_otelCtx"]` as a
/// JSON-encoded carrier, matching the original `InjectOtelCtxInMessage`.
pub fn inject_otel_ctx(cx: &Context, metadata: &mut HashMap<String, String>) {
    let mut carrier = HashMap::new();
    let propagator = TraceContextPropagator::new();
    propagator.inject_context(cx, &mut MapInjector(&mut carrier));

    match serde_json::to_string(&carrier) {
        Ok(encoded) => {
            metadata.insert(OTEL_CTX_KEY.to_string(), encoded);
        }
        Err(err) => error!(error = %err, "failed to encode _otelCtx metadata"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_metadata_yields_empty_context() {
        let metadata = HashMap::new();
        let cx = extract_otel_ctx(&metadata);
        assert_eq!(cx.span().span_context().trace_id(), opentelemetry::trace::TraceId::INVALID);
    }

    #[test]
    fn unparsable_metadata_does_not_panic() {
        let mut metadata = HashMap::new();
        metadata.insert(OTEL_CTX_KEY.to_string(), "not json".to_string());
        let _cx = extract_otel_ctx(&metadata);
    }

    #[test]
    fn inject_then_extract_round_trips() {
        let cx = Context::new();
        let mut metadata = HashMap::new();
        inject_otel_ctx(&cx, &mut metadata);
        assert!(metadata.contains_key(OTEL_CTX_KEY));

        let round_tripped = extract_otel_ctx(&metadata);
        assert_eq!(
            round_tripped.span().span_context().trace_id(),
            cx.span().span_context().trace_id()
        );
    }
}
