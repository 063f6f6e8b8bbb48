use crate::http::make_boxed_error_response;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Source of the `/ready` answer.
pub trait Readiness: Send + Sync + 'static {
    fn is_ready(&self) -> bool;

    /// One line summary of the current state, sent as the `/ready` body.
    fn describe(&self) -> String;
}

/// Liveness and readiness endpoints served on the admin listener.
///
/// `/health` answers ok as long as the process is up. `/ready` answers 200
/// or 503 depending on the readiness check, with its summary as body.
pub struct AdminService<R, E> {
    readiness: Arc<R>,
    _error: PhantomData<fn() -> E>,
}

impl<R, E> AdminService<R, E>
where
    R: Readiness,
{
    pub fn new(readiness: R) -> Self {
        Self {
            readiness: Arc::new(readiness),
            _error: PhantomData,
        }
    }
}

fn route(path: &str, readiness: &dyn Readiness) -> Option<(StatusCode, String)> {
    match path {
        "/health" => Some((StatusCode::OK, "ok".to_string())),
        "/ready" => {
            let status = match readiness.is_ready() {
                true => StatusCode::OK,
                false => StatusCode::SERVICE_UNAVAILABLE,
            };
            Some((status, readiness.describe()))
        }
        _ => None,
    }
}

impl<R, E> Service<Request<Incoming>> for AdminService<R, E>
where
    R: Readiness,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let readiness = self.readiness.clone();

        Box::pin(async move {
            let res = match route(req.uri().path(), readiness.as_ref()) {
                Some((status, text)) => {
                    let body = Full::new(Bytes::from(format!("{text}\n")))
                        .map_err(|e| match e {})
                        .boxed();
                    let mut response = Response::new(body);
                    *response.status_mut() = status;
                    response
                }
                None => make_boxed_error_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);

    impl Readiness for Fixed {
        fn is_ready(&self) -> bool {
            self.0
        }

        fn describe(&self) -> String {
            format!("ready={}", self.0)
        }
    }

    #[test]
    fn test_routes() {
        assert_eq!(
            route("/health", &Fixed(false)),
            Some((StatusCode::OK, "ok".to_string()))
        );
        assert_eq!(
            route("/ready", &Fixed(true)),
            Some((StatusCode::OK, "ready=true".to_string()))
        );
        assert_eq!(
            route("/ready", &Fixed(false)),
            Some((StatusCode::SERVICE_UNAVAILABLE, "ready=false".to_string()))
        );
        assert_eq!(route("/metrics", &Fixed(true)), None);
    }
}
