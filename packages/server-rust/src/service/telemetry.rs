//! Logging and metrics context handed to each component at construction.
//!
//! Components log inside their own span and label their metrics with their
//! component name, so nothing reaches for process-wide handles directly.

use tracing::{info_span, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Metric names emitted by the core and modules.
pub mod names {
    pub const REGISTRATIONS: &str = "conduit_registrations_total";
    pub const HEALTH_TRANSITIONS: &str = "conduit_health_transitions_total";
    pub const COMPILATIONS: &str = "conduit_route_compilations_total";
    pub const REJECTIONS: &str = "conduit_route_rejections_total";
    pub const CONFIG_PATCHES: &str = "conduit_config_patches_total";
    pub const CALLS: &str = "conduit_gateway_calls_total";
    pub const CALL_DURATION: &str = "conduit_gateway_call_duration_seconds";
}

/// Span + metric labels for one component.
#[derive(Debug, Clone)]
pub struct Telemetry {
    span: Span,
    component: &'static str,
}

impl Telemetry {
    /// Root context for a process.
    #[must_use]
    pub fn new(node_id: &str) -> Self {
        Self {
            span: info_span!("conduit", node = %node_id),
            component: "root",
        }
    }

    /// Context that logs without a parent span. Used by tests.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            span: Span::none(),
            component: "detached",
        }
    }

    /// Derives the context for a child component.
    #[must_use]
    pub fn child(&self, component: &'static str) -> Self {
        Self {
            span: info_span!(parent: &self.span, "component", name = component),
            component,
        }
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    #[must_use]
    pub fn component(&self) -> &'static str {
        self.component
    }

    /// Increments `metric` for `module`.
    pub fn count(&self, metric: &'static str, module: &str) {
        metrics::counter!(metric, "component" => self.component, "module" => module.to_string())
            .increment(1);
    }

    /// Increments `metric` for `module` by `n`.
    pub fn count_n(&self, metric: &'static str, module: &str, n: u64) {
        metrics::counter!(metric, "component" => self.component, "module" => module.to_string())
            .increment(n);
    }

    /// Records a duration sample in seconds.
    pub fn observe(&self, metric: &'static str, module: &str, seconds: f64) {
        metrics::histogram!(metric, "component" => self.component, "module" => module.to_string())
            .record(seconds);
    }
}

/// Registers descriptions for every metric in [`names`].
pub fn describe_metrics() {
    metrics::describe_counter!(names::REGISTRATIONS, "Module registration RPCs accepted");
    metrics::describe_counter!(names::HEALTH_TRANSITIONS, "Module health transitions");
    metrics::describe_counter!(names::COMPILATIONS, "Per-module route compilations");
    metrics::describe_counter!(names::REJECTIONS, "Descriptors rejected by the compiler");
    metrics::describe_counter!(names::CONFIG_PATCHES, "Accepted runtime config patches");
    metrics::describe_counter!(names::CALLS, "Gateway calls dispatched to modules");
    metrics::describe_histogram!(names::CALL_DURATION, "Gateway call latency");
}

/// Installs the global subscriber: `RUST_LOG` (default `info`), text or JSON lines.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set.
pub fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()?;
    }
    Ok(())
}

/// Installs the Prometheus exporter with an HTTP listener on `port`.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or a recorder is already installed.
pub fn install_prometheus(port: u16) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;
    Ok(())
}
