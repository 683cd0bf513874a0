//! Panic recovery.
//!
//! A panic inside a handler or filter is logged and answered with a 500; the
//! listener and other requests carry on.

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response;

/// Outermost layer of the ingress stack
pub fn recovery_layer() -> CatchPanicLayer<PanicHandler> {
    CatchPanicLayer::custom(handle_panic as PanicHandler)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    error!(details = %details, "Recovered from panic in request handler");

    let body = serde_json::json!({
        "error": "internal server error",
        "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
    });
    let mut response = Response::new(Body::from(serde_json::to_vec(&body).unwrap_or_default()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};
    use tower::ServiceExt;

    async fn exploding() -> &'static str {
        panic!("sink exploded")
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let app = Router::new()
            .route("/", post(exploding))
            .layer(recovery_layer());

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
