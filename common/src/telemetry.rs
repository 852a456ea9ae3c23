// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

/// Initialize structured logging with JSON formatting and trace context
///
/// This function sets up the tracing subscriber with:
/// - JSON formatting for structured logs
/// - Trace context (trace_id, span_id) in all log entries
/// - Log levels from configuration or environment
/// - Optional OpenTelemetry integration
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized with JSON formatting"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", "taskpulse"),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());

    let tracer = tracer_provider.tracer("taskpulse");

    tracing::info!(
        endpoint = endpoint,
        "OpenTelemetry tracer initialized with OTLP exporter"
    );

    Ok(tracer)
}

/// Shutdown OpenTelemetry tracer provider
///
/// This should be called on graceful shutdown to flush remaining spans
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Initialize Prometheus metrics exporter
///
/// Registers the notification metrics:
/// - email_sent_total: Counter for delivered emails, labeled by kind
/// - email_failed_total: Counter for emails that exhausted their retries
/// - notification_runs_started_total: Counter for runs entered
/// - notification_runs_completed_total: Counter for runs finished, by outcome
/// - pending_wakeups: Gauge for runs currently parked on a durable wait
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("email_sent_total", "Total number of emails delivered");
    describe_counter!(
        "email_failed_total",
        "Total number of emails that exhausted their retry budget"
    );
    describe_counter!(
        "notification_runs_started_total",
        "Total number of notification runs entered"
    );
    describe_counter!(
        "notification_runs_completed_total",
        "Total number of notification runs finished, labeled by outcome"
    );
    describe_gauge!(
        "pending_wakeups",
        "Notification runs currently suspended on a durable wait"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

/// Record a delivered email. `kind` is "assignment" or "reminder".
#[inline]
pub fn record_email_sent(kind: &str) {
    counter!("email_sent_total", "kind" => kind.to_string()).increment(1);
}

/// Record an email that failed after its bounded retries
#[inline]
pub fn record_email_failure(kind: &str) {
    counter!("email_failed_total", "kind" => kind.to_string()).increment(1);
}

/// Record a notification run entering execution
#[inline]
pub fn record_run_started() {
    counter!("notification_runs_started_total").increment(1);
}

/// Record a notification run reaching a terminal state
#[inline]
pub fn record_run_completed(outcome: &str) {
    counter!("notification_runs_completed_total", "outcome" => outcome.to_string()).increment(1);
}

/// Update the pending-wakeups gauge
#[inline]
pub fn update_pending_wakeups(count: i64) {
    gauge!("pending_wakeups").set(count as f64);
}

/// Alert notification interface
///
/// Fired when the step runner itself fails to persist or resume a run:
/// those failures are operator problems, not business end states.
#[async_trait::async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Send an alert for a run the infrastructure could not advance
    async fn send_alert(&self, run_id: &Uuid, reason: &str) -> Result<()>;
}

/// Log-based alert notifier (default implementation)
///
/// Logs alerts at ERROR level. In production this could be replaced with
/// integrations to email, Slack/Teams webhooks, or PagerDuty.
pub struct LogAlertNotifier;

#[async_trait::async_trait]
impl AlertNotifier for LogAlertNotifier {
    #[tracing::instrument(skip(self))]
    async fn send_alert(&self, run_id: &Uuid, reason: &str) -> Result<()> {
        tracing::error!(
            run_id = %run_id,
            reason = reason,
            alert_type = "scheduling_failure",
            "ALERT: notification run could not be advanced"
        );
        Ok(())
    }
}
