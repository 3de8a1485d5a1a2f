use std::sync::OnceLock;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static VIEWS_RECORDED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static VIEWS_SUPPRESSED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static VIEW_PERSIST_FAILURES_TOTAL: OnceLock<IntCounter> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "arkiv_gateway_http_requests_total",
                    "Gateway HTTP request count.",
                ),
                &["route", "method", "status"],
            )
            .expect("create arkiv_gateway_http_requests_total"),
        )
    })
}

fn views_recorded_total() -> &'static IntCounter {
    VIEWS_RECORDED_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "arkiv_gateway_views_recorded_total",
                "View events accepted by the dedup check and queued for persistence.",
            )
            .expect("create arkiv_gateway_views_recorded_total"),
        )
    })
}

fn views_suppressed_total() -> &'static IntCounterVec {
    VIEWS_SUPPRESSED_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "arkiv_gateway_views_suppressed_total",
                    "Content requests not counted as views, by reason.",
                ),
                &["reason"],
            )
            .expect("create arkiv_gateway_views_suppressed_total"),
        )
    })
}

fn view_persist_failures_total() -> &'static IntCounter {
    VIEW_PERSIST_FAILURES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "arkiv_gateway_view_persist_failures_total",
                "View events dropped because the background write failed.",
            )
            .expect("create arkiv_gateway_view_persist_failures_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();
}

pub fn inc_view_recorded() {
    views_recorded_total().inc();
}

pub fn inc_view_suppressed(reason: &str) {
    views_suppressed_total().with_label_values(&[reason]).inc();
}

pub fn inc_view_persist_failure() {
    view_persist_failures_total().inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = views_recorded_total();
    let _ = views_suppressed_total();
    let _ = view_persist_failures_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
