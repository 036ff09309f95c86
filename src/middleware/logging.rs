//! Request logging tuned for a call-streaming service.
//!
//! Every request gets a short correlation id so the started and completed
//! lines of one request can be matched in interleaved logs. Health probes
//! log at debug (load balancers poll them constantly), and WebSocket
//! upgrades are tagged so their long-lived "durations" read as call
//! lifetimes rather than slow requests.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Requests slower than this get a warning line instead of info.
const SLOW_REQUEST_MS: u128 = 1_000;

pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

/// What a request looks like from the log's point of view.
struct RequestLine {
    id: String,
    method: String,
    path: String,
    remote_addr: String,
    websocket: bool,
    health_probe: bool,
}

impl RequestLine {
    fn from_request(req: &ServiceRequest) -> Self {
        let path = req.path().to_string();
        Self {
            // First uuid segment is plenty for correlating two log lines.
            id: Uuid::new_v4().to_string()[..8].to_string(),
            method: req.method().to_string(),
            remote_addr: req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string(),
            websocket: path.starts_with("/ws/"),
            health_probe: path.ends_with("/health"),
            path,
        }
    }
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let line = RequestLine::from_request(&req);

        if line.health_probe {
            debug!(request_id = %line.id, method = %line.method, path = %line.path, "Request started");
        } else {
            info!(
                request_id = %line.id,
                method = %line.method,
                path = %line.path,
                remote_addr = %line.remote_addr,
                websocket = line.websocket,
                "Request started"
            );
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = started.elapsed().as_millis();

            match &result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if line.health_probe {
                        debug!(request_id = %line.id, status, duration_ms, "Request completed");
                    } else if duration_ms >= SLOW_REQUEST_MS && !line.websocket {
                        warn!(
                            request_id = %line.id,
                            method = %line.method,
                            path = %line.path,
                            status,
                            duration_ms,
                            "Slow request completed"
                        );
                    } else {
                        info!(
                            request_id = %line.id,
                            method = %line.method,
                            path = %line.path,
                            status,
                            duration_ms,
                            websocket = line.websocket,
                            "Request completed"
                        );
                    }
                }
                Err(err) => {
                    error!(
                        request_id = %line.id,
                        method = %line.method,
                        path = %line.path,
                        remote_addr = %line.remote_addr,
                        duration_ms,
                        error = %err,
                        "Request failed"
                    );
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};

    async fn ok_handler() -> HttpResponse {
        HttpResponse::Ok().body("ok")
    }

    #[actix_web::test]
    async fn test_logged_requests_pass_through_unchanged() {
        let app = test::init_service(
            App::new()
                .wrap(RequestLogging)
                .route("/api/v1/health", web::get().to(ok_handler))
                .route("/api/v1/config", web::get().to(ok_handler)),
        )
        .await;

        // Probe path (debug level) and a regular path both reach the handler.
        for path in ["/api/v1/health", "/api/v1/config"] {
            let req = test::TestRequest::get().uri(path).to_request();
            let resp = test::call_service(&app, req).await;
            assert!(resp.status().is_success(), "{} should pass through", path);
        }
    }

    #[actix_web::test]
    async fn test_classifies_websocket_and_probe_paths() {
        let req = test::TestRequest::get().uri("/ws/call").to_srv_request();
        let line = RequestLine::from_request(&req);
        assert!(line.websocket);
        assert!(!line.health_probe);
        assert_eq!(line.id.len(), 8);

        let req = test::TestRequest::get().uri("/health").to_srv_request();
        let line = RequestLine::from_request(&req);
        assert!(line.health_probe);
        assert!(!line.websocket);
    }
}
