mod handlers;
pub mod middleware;

use axum::{
    http::{HeaderName, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::engine::Session;

pub use handlers::{status_for, ApiError, AppState, SESSION_HEADER};
use middleware::SecurityConfig;

fn api_routes() -> Router<AppState> {
    Router::new()
        // Sessions
        .route(
            "/sessions",
            post(handlers::open_session).delete(handlers::close_session),
        )
        .route("/status", get(handlers::status))
        // Current context
        .route(
            "/current-context",
            put(handlers::enter_context).delete(handlers::leave_context),
        )
        .route(
            "/search-path",
            get(handlers::get_search_path).put(handlers::set_search_path),
        )
        // Contexts
        .route("/contexts", post(handlers::create_context))
        .route("/contexts/status", get(handlers::context_status))
        .route("/contexts/current", axum::routing::delete(handlers::reset_context))
        .route("/contexts/current/freeze", post(handlers::freeze_context))
        // Resolution and entries
        .route("/resolve/{identity}", get(handlers::resolve))
        .route("/concepts", post(handlers::create_concept))
        .route("/concepts/{identity}", get(handlers::get_concept))
        .route("/instances", post(handlers::create_instance))
        .route("/instances/{identity}", get(handlers::get_instance))
        .route("/entries/find", post(handlers::find_entries))
        .route("/entries/{identity}", get(handlers::get_entry))
        // Health
        .route("/health", get(handlers::health))
}

/// Router with permissive CORS and no authentication, for local use and tests.
pub fn create_router(session: Session) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(session))
}

/// Router with bearer-key authentication, rate limiting and CORS taken from
/// `security`.
pub fn create_router_with_security(session: Session, security: SecurityConfig) -> Router {
    let mut api = api_routes();
    if let Some(limiter) = security.rate_limiter.clone() {
        api = api.layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }
    let api = api.layer(axum::middleware::from_fn_with_state(
        security.clone(),
        middleware::auth_middleware,
    ));

    Router::new()
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&security)),
        )
        .with_state(AppState::new(session))
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    let Some(origins) = &security.cors_origins else {
        return CorsLayer::permissive();
    };
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static(SESSION_HEADER),
        ])
}
