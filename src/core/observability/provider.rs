use crate::app::config::{FileRotation, LogSink, LoggingConfig, OtelProto};
use anyhow::{Context, Result, anyhow};
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

type DynLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync + 'static>;

/// Keeps the non-blocking writers flushing and the otel
/// exporter alive. Dropping it flushes buffered log lines.
pub struct Telemetry {
    provider: Option<SdkTracerProvider>,
    _guards: Vec<WorkerGuard>,
}

/// Installs the global subscriber with one layer per configured sink
pub fn init(config: &LoggingConfig) -> Result<Telemetry> {
    config.validate()?;

    let crate_name = env!("CARGO_PKG_NAME");
    let filter = EnvFilter::from_default_env()
        .add_directive("error".parse()?)
        .add_directive(format!("{}={}", crate_name, config.level).parse()?);

    let mut layers: Vec<DynLayer> = Vec::new();
    let mut guards = Vec::new();
    let mut provider: Option<SdkTracerProvider> = None;

    for sink in &config.sinks {
        match sink {
            LogSink::Stdout { color, json, spans } => {
                let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
                guards.push(guard);
                layers.push(fmt_layer(writer, *json, *color, *spans));
            }
            LogSink::File {
                path,
                json,
                rotation,
                max_files,
                spans,
            } => {
                let (writer, guard) = create_file_writer(path, rotation, *max_files)?;
                guards.push(guard);
                layers.push(fmt_layer(writer, *json, false, *spans));
            }
            LogSink::Otel { endpoint, proto } => {
                if provider.is_some() {
                    return Err(anyhow!("Only one otel sink is supported"));
                }

                let (layer, tracer_provider) =
                    create_otel_layer(endpoint, proto, config.span_sample_rate)?;
                layers.push(layer);
                provider = Some(tracer_provider);
            }
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    if let Some(tracer_provider) = &provider {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let _ = global::set_tracer_provider(tracer_provider.clone());
    }

    Ok(Telemetry {
        provider,
        _guards: guards,
    })
}

/// Flushes pending spans to the collector, then the log writers
pub fn shutdown(telemetry: Telemetry) -> Result<()> {
    if let Some(provider) = &telemetry.provider {
        provider
            .shutdown()
            .context("failed to shutdown tracer provider")?;
    }

    drop(telemetry);
    Ok(())
}

fn fmt_layer<W>(writer: W, json: bool, color: bool, spans: bool) -> DynLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let span_events = if spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if json {
        fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_ansi(color)
            .with_span_events(span_events)
            .with_writer(writer)
            .boxed()
    }
}

fn create_file_writer(
    path: &Path,
    rotation: &FileRotation,
    max_files: usize,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid log file name in {}", path.display()))?;

    let directory = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    std::fs::create_dir_all(directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;

    let rotation = match rotation {
        FileRotation::Daily => Rotation::DAILY,
        FileRotation::Hourly => Rotation::HOURLY,
        FileRotation::Never => Rotation::NEVER,
    };

    // retention is enforced by the appender on every rollover
    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file_name);
    if max_files > 0 {
        builder = builder.max_log_files(max_files);
    }

    let appender = builder
        .build(directory)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    Ok(tracing_appender::non_blocking(appender))
}

fn create_otel_layer(
    endpoint: &str,
    proto: &OtelProto,
    sample_rate: f32,
) -> Result<(DynLayer, SdkTracerProvider)> {
    use opentelemetry_otlp::WithExportConfig;

    let exporter = match proto {
        OtelProto::Grpc => {
            let mut builder = opentelemetry_otlp::SpanExporter::builder().with_tonic();
            if !endpoint.is_empty() {
                builder = builder.with_endpoint(endpoint);
            }

            builder
                .build()
                .context("failed to build OTLP gRPC exporter")?
        }
        OtelProto::Http => build_http_exporter(endpoint)?,
    };

    let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(sample_rate as f64)));

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string());
    let resource = Resource::builder()
        .with_service_name(service_name)
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_sampler(sampler)
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build();

    let tracer = tracer_provider.tracer(env!("CARGO_PKG_NAME"));
    let layer = tracing_opentelemetry::layer().with_tracer(tracer).boxed();

    Ok((layer, tracer_provider))
}

#[cfg(feature = "otel-http")]
fn build_http_exporter(endpoint: &str) -> Result<opentelemetry_otlp::SpanExporter> {
    use opentelemetry_otlp::WithExportConfig;

    let mut builder = opentelemetry_otlp::SpanExporter::builder().with_http();
    if !endpoint.is_empty() {
        builder = builder.with_endpoint(endpoint);
    }

    builder.build().context("failed to build OTLP HTTP exporter")
}

#[cfg(not(feature = "otel-http"))]
fn build_http_exporter(_: &str) -> Result<opentelemetry_otlp::SpanExporter> {
    Err(anyhow!(
        "OTLP HTTP exporter requested but the `otel-http` feature is disabled"
    ))
}
