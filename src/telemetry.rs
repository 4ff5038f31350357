use opentelemetry::trace::TraceId;
use thiserror::Error;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to install the global subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Failed to build the span exporter: {0}")]
    Exporter(String),
}

///  Fetch an opentelemetry::trace::TraceId as hex through the full tracing stack
pub fn get_trace_id() -> TraceId {
    use opentelemetry::trace::TraceContextExt as _; // opentelemetry::Context -> opentelemetry::trace::Span
    use tracing_opentelemetry::OpenTelemetrySpanExt as _; // tracing::Span to opentelemetry::Context

    tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
}

fn init_tracer() -> Result<opentelemetry_sdk::trace::Tracer, TelemetryError> {
    use opentelemetry::trace::TracerProvider;
    #[cfg(feature = "telemetry")]
    use opentelemetry_otlp::SpanExporter;
    use opentelemetry_sdk::trace::SdkTracerProvider;

    #[cfg(feature = "telemetry")]
    let exporter = SpanExporter::builder()
        .with_tonic()
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;
    let builder = SdkTracerProvider::builder();
    #[cfg(feature = "telemetry")]
    let builder = builder.with_batch_exporter(exporter);
    Ok(builder.build().tracer("hmc-controller"))
}

/// Initialize tracing
///
/// `RUST_LOG` selects the filter (default `info`), `LOG_FORMAT=json` switches
/// the log lines to JSON.
pub async fn init() -> Result<(), TelemetryError> {
    // Setup tracing layers
    let telemetry = tracing_opentelemetry::layer().with_tracer(init_tracer()?);
    let logger = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => tracing_subscriber::fmt::layer().json().boxed(),
        _ => tracing_subscriber::fmt::layer().compact().boxed(),
    };
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new("info")?,
    };

    // Decide on layers
    let collector = Registry::default()
        .with(telemetry)
        .with(logger)
        .with(env_filter);

    // Initialize tracing
    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}
