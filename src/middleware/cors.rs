use axum::http::{header, Method};
use tower_http::cors::{Any, CorsLayer};

/// The API is read by browser front ends on other origins; it only needs
/// GET/POST with a bearer token and a JSON body.
pub fn api_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(Any)
}
