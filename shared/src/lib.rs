pub mod admin_service;
pub mod http;
pub mod statsd;
pub mod metrics_defs;
