//! Metrics definitions for the federation proxy.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with handler and status.",
};

pub const NODE_REQUEST_FAILURES: MetricDef = MetricDef {
    name: "node.request.failures",
    metric_type: MetricType::Counter,
    description: "Node requests that failed and were replaced by an empty response. Tagged with cluster.",
};

pub const ACTIVE_NODES: MetricDef = MetricDef {
    name: "health.active_nodes",
    metric_type: MetricType::Gauge,
    description: "Number of nodes that answered the last health check",
};

pub const HEALTH_CHECK_FAILURES: MetricDef = MetricDef {
    name: "health.check.failures",
    metric_type: MetricType::Counter,
    description: "Number of failed node health checks",
};

pub const HEALTH_CHECK_SKIPPED: MetricDef = MetricDef {
    name: "health.check.skipped",
    metric_type: MetricType::Counter,
    description: "Health check cycles skipped because the previous one was still running",
};

pub const UNKNOWN_REQUESTS: MetricDef = MetricDef {
    name: "requests.unknown",
    metric_type: MetricType::Counter,
    description: "Requests that matched no route",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    NODE_REQUEST_FAILURES,
    ACTIVE_NODES,
    HEALTH_CHECK_FAILURES,
    HEALTH_CHECK_SKIPPED,
    UNKNOWN_REQUESTS,
];
