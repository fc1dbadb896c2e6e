use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

use super::api::error::ErrorResponse;
use super::api::location::{LatestResponse, PositionResponse, StartRequest};

#[derive(OpenApi)]
#[openapi(
    paths(
        super::api::location::latest,
        super::api::location::position,
        super::api::location::stats,
        super::api::location::mode,
        super::api::location::start,
        super::api::location::stop,
        super::api::location::pause,
        super::api::location::resume,
    ),
    components(
        schemas(
            LatestResponse,
            PositionResponse,
            StartRequest,
            ErrorResponse,
            crate::locator::RuntimeStats,
            crate::monitor::MonitorMode,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "sat-loc API",
        description = "Live satellite position polling",
        version = "0.1.0"
    ),
    tags(
        (name = "location", description = "Position stream status and control")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_location_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/location/latest",
            "/api/location/position",
            "/api/location/stats",
            "/api/location/mode",
            "/api/location/start",
            "/api/location/stop",
            "/api/location/pause",
            "/api/location/resume",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
