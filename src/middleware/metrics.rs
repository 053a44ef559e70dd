//! Request metrics middleware.
//!
//! Counts every request and records timing per endpoint. Endpoints are keyed
//! by route *pattern* (`GET /api/v1/calls/{call_id}`), not by the concrete
//! path, so the metrics table stays bounded however many calls exist.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

/// `"METHOD pattern"`, or `"METHOD <unmatched>"` when no route matched.
fn endpoint_key(method: &str, pattern: Option<&str>) -> String {
    format!("{} {}", method, pattern.unwrap_or("<unmatched>"))
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
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
        let start_time = Instant::now();
        let endpoint = endpoint_key(req.method().as_str(), req.match_pattern().as_deref());
        let app_state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(app_state) = &app_state {
            app_state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let is_error = match &result {
                Ok(response) => response.status().is_client_error() || response.status().is_server_error(),
                Err(_) => true,
            };

            if let Some(app_state) = app_state {
                app_state.record_endpoint_request(&endpoint, duration_ms, is_error);
                if is_error {
                    app_state.increment_error_count();
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::test_state;
    use actix_web::{test as actix_test, App, HttpResponse};

    #[test]
    fn test_endpoint_key() {
        assert_eq!(
            endpoint_key("GET", Some("/api/v1/calls/{call_id}")),
            "GET /api/v1/calls/{call_id}"
        );
        assert_eq!(endpoint_key("POST", None), "POST <unmatched>");
    }

    #[actix_web::test]
    async fn test_requests_are_keyed_by_pattern() {
        let state = web::Data::new(test_state(AppConfig::default()));
        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .wrap(MetricsMiddleware)
                .route("/items/{id}", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        for uri in ["/items/1", "/items/2", "/missing"] {
            actix_test::call_service(&app, actix_test::TestRequest::get().uri(uri).to_request()).await;
        }

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 3);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.endpoint_metrics["GET /items/{id}"].request_count, 2);
        assert_eq!(metrics.endpoint_metrics["GET <unmatched>"].error_count, 1);
    }
}
