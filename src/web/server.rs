use axum::{routing::get, routing::post, Router};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::locator::StreamDefaults;
use crate::monitor::Monitor;

use super::api::location as location_handlers;
use super::api_doc::ApiDoc;
use super::auth::AppState;
use super::config::Config;

pub async fn run_server(config: Config) -> std::io::Result<()> {
    let bind_addr = config.web.bind.clone();
    let mut monitor = Monitor::new();

    if config.stream.autostart {
        let poll = config.stream.resolve(&StreamDefaults::default());
        if let Err(e) = monitor.start_http(
            poll,
            &config.stream.base_url,
            config.stream.request_timeout(),
        ) {
            log::warn!("Failed to autostart monitor: {}", e);
        }
    }

    let state = AppState {
        config: Arc::new(config),
        monitor: Arc::new(Mutex::new(monitor)),
    };

    let app = router(state);

    log::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/location/latest", get(location_handlers::latest))
        .route("/api/location/position", get(location_handlers::position))
        .route("/api/location/stats", get(location_handlers::stats))
        .route("/api/location/mode", get(location_handlers::mode))
        .route("/api/location/start", post(location_handlers::start))
        .route("/api/location/stop", post(location_handlers::stop))
        .route("/api/location/pause", post(location_handlers::pause))
        .route("/api/location/resume", post(location_handlers::resume))
        // OpenAPI / Swagger
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
