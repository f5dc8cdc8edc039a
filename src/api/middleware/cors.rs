use axum::Router;
use tower_http::cors::CorsLayer;

pub fn add_cors(router: Router) -> Router {
    router.layer(CorsLayer::permissive())
}
