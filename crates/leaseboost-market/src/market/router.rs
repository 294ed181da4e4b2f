use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;

use super::service::{MarketIntelligenceService, PositionRequest};

/// Router builder exposing the market position and dataset cache endpoints.
pub fn market_router(service: Arc<MarketIntelligenceService>) -> Router {
    Router::new()
        .route("/api/v1/market/position", post(position_handler))
        .route("/api/v1/market/status", get(status_handler))
        .route("/api/v1/market/refresh", post(refresh_handler))
        .with_state(service)
}

pub(crate) async fn position_handler(
    State(service): State<Arc<MarketIntelligenceService>>,
    axum::Json(request): axum::Json<PositionRequest>,
) -> Response {
    let position = service.position_for(&request).await;
    (StatusCode::OK, axum::Json(position)).into_response()
}

pub(crate) async fn status_handler(
    State(service): State<Arc<MarketIntelligenceService>>,
) -> Response {
    (StatusCode::OK, axum::Json(service.status())).into_response()
}

pub(crate) async fn refresh_handler(
    State(service): State<Arc<MarketIntelligenceService>>,
) -> Response {
    service.force_refresh();
    let payload = json!({
        "status": "refresh_scheduled",
    });
    (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::cache::DatasetCache;
    use crate::market::dataset::UnconfiguredSource;
    use crate::market::geocoding::GeocodingAdapter;
    use crate::market::normalizer::Normalizer;
    use crate::market::regions::RegionCatalog;
    use crate::market::resolver::ComparableResolver;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    fn service() -> Arc<MarketIntelligenceService> {
        let cache = DatasetCache::new(
            Arc::new(UnconfiguredSource),
            Normalizer::default(),
            chrono::Duration::days(3),
        );
        Arc::new(MarketIntelligenceService::new(
            Arc::new(cache),
            ComparableResolver::new(
                Arc::new(RegionCatalog::standard()),
                GeocodingAdapter::disabled(),
            ),
        ))
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn position_route_always_answers_ok() {
        let response = market_router(service())
            .oneshot(
                Request::post("/api/v1/market/position")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({ "city": "Nanterre", "surface": 120.0 }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["comparable_count"], 1);
        assert_eq!(body["comparables"][0]["source"], "emergency");
        assert_eq!(body["market_median_price"], 480.0);
    }

    #[tokio::test]
    async fn invalid_surface_returns_undetermined_position() {
        let response = market_router(service())
            .oneshot(
                Request::post("/api/v1/market/position")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({ "city": "Paris", "surface": -3.0 }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["percentile_position"], "Position non déterminée");
        assert_eq!(body["confidence_percentage"], 0);
    }

    #[tokio::test]
    async fn status_route_reports_empty_cache() {
        let response = market_router(service())
            .oneshot(
                Request::get("/api/v1/market/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["record_count"], 0);
        assert_eq!(body["data_available"], false);
        assert_eq!(body["summary"], "No data loaded");
    }

    #[tokio::test]
    async fn refresh_route_accepts_request() {
        let response = refresh_handler(State(service())).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["status"], "refresh_scheduled");
    }
}
