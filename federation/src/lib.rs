pub mod api;
pub mod config;
pub mod errors;
pub mod executor;
pub mod handler;
pub mod health;
pub mod http;
pub mod merger;
pub mod metrics_defs;
pub mod registry;
pub mod rewrite;
pub mod router;

#[cfg(test)]
mod testutils;

use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use shared::admin_service::AdminService;
use shared::http::{make_error_response, run_http_service};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::utils::json_response;
use crate::config::{Config, ValidationError};
use crate::errors::FederationError;
use crate::executor::Executor;
use crate::handler::{Context, FederatedRequest};
use crate::health::HealthTracker;
use crate::http::NodeClient;
use crate::metrics_defs::REQUEST_DURATION;
use crate::registry::{Registry, RegistryError};
use crate::router::Router;

/// Errors that prevent the proxy from starting or keep it from serving
#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid node configuration: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Federation(#[from] FederationError),
}

pub async fn run(config: Config) -> Result<(), StartupError> {
    config.validate()?;

    let registry = Registry::from_config(&config)?;
    let client = NodeClient::new(&config)?;
    let health = HealthTracker::new(registry.clone(), client.clone());
    let executor = Executor::new(
        client,
        registry.clone(),
        config
            .timeouts
            .scatter_timeout_secs
            .map(Duration::from_secs),
    );

    for cluster in registry.clusters() {
        if let Some(node) = registry.node_for(cluster) {
            tracing::info!(cluster = %cluster, node = %node, prefix = node.prefix(), "Configured node");
        }
    }

    // The first tick fires right away, so the first cycle runs at startup
    let _health_task = health.spawn(Duration::from_secs(config.health_check_interval_secs));

    let ctx = Context {
        registry,
        health: health.clone(),
        executor,
    };
    let federation_service = FederationService::new(ctx, api::router());
    let admin_service = AdminService::<_, FederationError>::new(health);

    let federation_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        federation_service,
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(federation_task, admin_task)?;
    Ok(())
}

/// Serves the federated search API on the main listener.
pub struct FederationService {
    ctx: Context,
    router: Arc<Router>,
}

impl FederationService {
    pub fn new(ctx: Context, router: Router) -> Self {
        Self {
            ctx,
            router: Arc::new(router),
        }
    }
}

impl Service<Request<Incoming>> for FederationService {
    type Response = Response<BoxBody<Bytes, FederationError>>;
    type Error = FederationError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let ctx = self.ctx.clone();
        let router = self.router.clone();

        Box::pin(async move {
            // Runs detached so node calls complete even if the client goes away
            let response = match tokio::spawn(async move { handle_request(&ctx, &router, req).await }).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!("Request task panicked: {}", e);
                    make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            };

            Ok(response.map(|body| Full::new(body).map_err(|e| match e {}).boxed()))
        })
    }
}

/// Routes one request, runs its handler and records the request duration.
async fn handle_request<B>(ctx: &Context, router: &Router, req: Request<B>) -> Response<Bytes>
where
    B: Body,
    B::Error: Display,
{
    let start = Instant::now();
    let (parts, body) = req.into_parts();
    let (handler, params) = router.find(&parts.method, parts.uri.path());

    let result = match body.collect().await {
        Ok(collected) => {
            let request = FederatedRequest::new(&parts, params, collected.to_bytes());
            handler.handle(ctx, request).await
        }
        Err(e) => Err(FederationError::RequestBodyError(e.to_string())),
    };

    let response = result.unwrap_or_else(|e| {
        tracing::warn!(
            handler = handler.name(),
            method = %parts.method,
            path = %parts.uri.path(),
            error = %e,
            "Request failed"
        );
        json_response(e.status_code(), &e.to_json())
            .unwrap_or_else(|_| make_error_response(e.status_code()))
    });

    shared::histogram!(
        REQUEST_DURATION,
        "handler" => handler.name(),
        "status" => response.status().as_str().to_string()
    )
    .record(start.elapsed().as_secs_f64());

    response
}
