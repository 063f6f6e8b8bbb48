use crate::config::{Config, Listener, Timeouts, TlsConfig};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A request received by a `MockNode`
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub path_and_query: String,
    pub body: Bytes,
    pub opaque_id: Option<String>,
}

impl RecordedRequest {
    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

type Responder = dyn Fn(&RecordedRequest) -> (StatusCode, String) + Send + Sync;

/// In-process search node answering every request with the supplied responder.
///
/// `HEAD` requests are answered directly and not recorded so health checks
/// do not show up in `requests()`. While unhealthy every request gets a 503.
pub struct MockNode {
    addr: SocketAddr,
    healthy: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl MockNode {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest) -> (StatusCode, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");
        let addr = listener.local_addr().unwrap();

        let healthy = Arc::new(AtomicBool::new(true));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responder: Arc<Responder> = Arc::new(responder);

        let handle = {
            let healthy = healthy.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let io = TokioIo::new(stream);
                    let healthy = healthy.clone();
                    let requests = requests.clone();
                    let responder = responder.clone();

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            respond(req, healthy.clone(), requests.clone(), responder.clone())
                        });
                        let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                            .serve_connection(io, service)
                            .await;
                    });
                }
            })
        };

        Self {
            addr,
            healthy,
            requests,
            handle,
        }
    }

    /// Node spec pointing at this mock, e.g. `127.0.0.1:41234`
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn respond(
    req: Request<Incoming>,
    healthy: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responder: Arc<Responder>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    if !healthy.load(Ordering::SeqCst) {
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
        return Ok(response);
    }

    if parts.method == Method::HEAD {
        return Ok(Response::new(Full::new(Bytes::new())));
    }

    let recorded = RecordedRequest {
        method: parts.method,
        path_and_query: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default(),
        body,
        opaque_id: parts
            .headers
            .get("x-opaque-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    };
    requests.lock().push(recorded.clone());

    let (status, body) = responder(&recorded);
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    Ok(response)
}

/// Configuration with short timeouts for the given node specs and aliases.
pub fn test_config(nodes: &[&str], clusters: &[&str]) -> Config {
    Config {
        listener: Listener {
            host: "127.0.0.1".into(),
            port: 8200,
        },
        admin_listener: Listener {
            host: "127.0.0.1".into(),
            port: 8201,
        },
        nodes: nodes.join(";"),
        clusters: clusters.join(";"),
        tls: TlsConfig::default(),
        timeouts: Timeouts {
            request_timeout_secs: 5,
            ping_timeout_secs: 1,
            scatter_timeout_secs: None,
            pool_idle_timeout_secs: 5,
        },
        health_check_interval_secs: 60,
        max_connections_per_scheme: 100,
    }
}
