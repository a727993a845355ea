use anyhow::{Context, Result, anyhow};
use opentelemetry::trace::{Span, TraceContextExt, Tracer, TracerProvider as OtelTracerProvider};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider, SpanExporter,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Telemetry handle for OpenTelemetry tracing.
pub(crate) struct Telemetry {
    tracer: opentelemetry_sdk::trace::SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Initialize telemetry with an OTLP HTTP exporter.
    pub(crate) fn new(endpoint: &str) -> Result<Self> {
        let endpoint = normalize_otlp_http_trace_endpoint(endpoint)?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("build OTLP span exporter")?;
        Self::from_exporter(exporter)
    }

    /// Run a closure inside a span.
    pub(crate) fn in_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.tracer.in_span(name.to_string(), |cx| {
            let span = cx.span();
            for attribute in attributes {
                span.set_attribute(attribute.clone());
            }
            f()
        })
    }

    /// Run a closure inside a child span of `parent_cx`.
    ///
    /// Rayon workers do not inherit the caller's active context, so parallel
    /// work passes the parent explicitly.
    pub(crate) fn in_span_with_parent<T, F>(
        &self,
        name: &str,
        attributes: &[KeyValue],
        parent_cx: &OtelContext,
        f: F,
    ) -> T
    where
        F: FnOnce() -> T,
    {
        let mut span = self.tracer.start_with_context(name.to_string(), parent_cx);
        for attribute in attributes {
            span.set_attribute(attribute.clone());
        }
        let cx = parent_cx.with_span(span);
        let _guard = cx.attach();
        f()
    }

    /// Flush spans and shut down the tracer provider.
    pub(crate) fn shutdown(&self) -> Result<()> {
        if let Err(err) = self.provider.shutdown() {
            return Err(anyhow!("failed to shutdown tracer provider: {err}"));
        }
        Ok(())
    }

    fn from_exporter<E: SpanExporter + 'static>(exporter: E) -> Result<Self> {
        let resource = Resource::builder().with_service_name("annolint").build();
        // Spans end on rayon workers; the batch processor hands them to its own export thread.
        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(16_384)
            .with_max_export_batch_size(2048)
            .with_scheduled_delay(Duration::from_millis(200))
            .build();
        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config)
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_span_processor(processor)
            .build();
        let tracer = provider.tracer("annolint");
        opentelemetry::global::set_tracer_provider(provider.clone());
        Ok(Self { tracer, provider })
    }
}

fn normalize_otlp_http_trace_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint).context("parse OTLP endpoint")?;
    let path = url.path().to_string();
    if path == "/" {
        url.set_path("/v1/traces");
    } else if let Some(prefix) = path.strip_suffix("/v1/logs") {
        url.set_path(&format!("{prefix}/v1/traces"));
    }
    Ok(url.to_string())
}

/// Initialize logging facade with stderr output.
pub(crate) fn init_logging(quiet: bool) {
    let default_filter = if quiet { "error" } else { "annolint=info,warn" };
    let init_result = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    let _ = init_result;
}

/// Optional telemetry span helper for work moved off the thread that owns `parent_cx`.
pub(crate) fn with_parent_span<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    parent_cx: &OtelContext,
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    match telemetry {
        Some(telemetry) => telemetry.in_span_with_parent(name, attributes, parent_cx, f),
        None => f(),
    }
}

/// Optional telemetry span helper.
pub(crate) fn with_span<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    match telemetry {
        Some(telemetry) => telemetry.in_span(name, attributes, f),
        None => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::error::OTelSdkResult;
    use opentelemetry_sdk::trace::{SpanData, SpanExporter};
    use rayon::prelude::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct NoopExporter;

    impl SpanExporter for NoopExporter {
        async fn export(&self, _batch: Vec<SpanData>) -> OTelSdkResult {
            Ok(())
        }
    }

    #[derive(Debug, Clone, Default)]
    struct RecordingExporter {
        spans: Arc<Mutex<Vec<SpanData>>>,
    }

    impl SpanExporter for RecordingExporter {
        async fn export(&self, batch: Vec<SpanData>) -> OTelSdkResult {
            self.spans.lock().expect("spans lock").extend(batch);
            Ok(())
        }
    }

    #[test]
    fn telemetry_uses_exporter_without_errors() {
        let telemetry = Telemetry::from_exporter(NoopExporter).expect("telemetry");
        let value = telemetry.in_span("test", &[KeyValue::new("test.key", "value")], || 42);
        assert_eq!(value, 42);
        telemetry.shutdown().expect("shutdown");
    }

    #[test]
    fn parallel_spans_keep_their_parent() {
        let exporter = RecordingExporter::default();
        let telemetry = Telemetry::from_exporter(exporter.clone()).expect("telemetry");

        let total: i32 = telemetry.in_span("analysis", &[], || {
            let parent_cx = OtelContext::current();
            (1..=4)
                .into_par_iter()
                .map(|value| with_parent_span(Some(&telemetry), "tree", &[], &parent_cx, || value))
                .sum()
        });
        telemetry.shutdown().expect("shutdown");

        assert_eq!(total, 10);
        let spans = exporter.spans.lock().expect("spans lock");
        let analysis = spans
            .iter()
            .find(|span| span.name == "analysis")
            .expect("analysis span");
        let trees: Vec<_> = spans.iter().filter(|span| span.name == "tree").collect();
        assert_eq!(trees.len(), 4);
        for tree in trees {
            assert_eq!(tree.parent_span_id, analysis.span_context.span_id());
            assert_eq!(tree.span_context.trace_id(), analysis.span_context.trace_id());
        }
    }

    #[test]
    fn with_span_runs_closure_without_telemetry() {
        let value = with_span(None, "test", &[], || "done");
        assert_eq!(value, "done");
    }

    #[test]
    fn normalize_root_endpoint_to_trace_path() {
        let endpoint =
            normalize_otlp_http_trace_endpoint("http://localhost:4318/").expect("endpoint");
        assert_eq!(endpoint, "http://localhost:4318/v1/traces");
    }

    #[test]
    fn normalize_log_endpoint_to_trace_path() {
        let endpoint =
            normalize_otlp_http_trace_endpoint("http://localhost:4318/v1/logs").expect("endpoint");
        assert_eq!(endpoint, "http://localhost:4318/v1/traces");
    }

    #[test]
    fn normalize_rejects_invalid_endpoint() {
        assert!(normalize_otlp_http_trace_endpoint("not a url").is_err());
    }
}
