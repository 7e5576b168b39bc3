use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::HeaderName, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lapsel_core::errors::{ApplicationError, DomainError, InterfaceError};
use lapsel_core::selection::{RankedLaptop, SelectionRequest};
use lapsel_core::Engine;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct RoutesState {
    engine: Engine,
}

/// Envelope the front end expects on every response. `content` is null whenever `success` is
/// false.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub content: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(content: T) -> Self {
        Self { success: true, content: Some(content) }
    }

    fn failed() -> Self {
        Self { success: false, content: None }
    }
}

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/laptops/select", post(select_laptops))
        .route("/categories", get(list_categories))
        .with_state(RoutesState { engine })
}

async fn select_laptops(
    State(state): State<RoutesState>,
    headers: HeaderMap,
    payload: Result<Json<SelectionRequest>, JsonRejection>,
) -> Response {
    let correlation_id = correlation_id(&headers);

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let failure = ApplicationError::from(DomainError::InvalidSelection(
                rejection.body_text(),
            ))
            .into_interface(correlation_id.clone());
            return failure_response::<Vec<RankedLaptop>>(failure, "selection.rejected");
        }
    };

    match state.engine.selection.select(&request).await {
        Ok(laptops) => {
            info!(
                event_name = "http.selection.served",
                correlation_id = %correlation_id,
                categories = request.category_scores.len(),
                returned = laptops.len(),
                "selection served"
            );
            respond(StatusCode::OK, &correlation_id, ApiResponse::ok(laptops))
        }
        Err(failure) => failure_response::<Vec<RankedLaptop>>(
            failure.into_interface(correlation_id),
            "selection.failed",
        ),
    }
}

async fn list_categories(State(state): State<RoutesState>, headers: HeaderMap) -> Response {
    let correlation_id = correlation_id(&headers);
    match state.engine.selection.categories().await {
        Ok(categories) => respond(StatusCode::OK, &correlation_id, ApiResponse::ok(categories)),
        Err(failure) => failure_response::<Vec<String>>(
            failure.into_interface(correlation_id),
            "categories.failed",
        ),
    }
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn failure_response<T: Serialize>(failure: InterfaceError, event: &'static str) -> Response {
    let status = match &failure {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(
            event_name = event,
            correlation_id = %failure.correlation_id(),
            status = status.as_u16(),
            error = %failure,
            "request failed"
        );
    } else {
        warn!(
            event_name = event,
            correlation_id = %failure.correlation_id(),
            status = status.as_u16(),
            error = %failure,
            "request rejected"
        );
    }

    respond(status, failure.correlation_id(), ApiResponse::<T>::failed())
}

fn respond<T: Serialize>(
    status: StatusCode,
    correlation_id: &str,
    body: ApiResponse<T>,
) -> Response {
    let header = (HeaderName::from_static(CORRELATION_HEADER), correlation_id.to_string());
    (status, [header], Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use lapsel_core::domain::benchmark::BenchmarkResults;
    use lapsel_core::domain::category::{CategoryRules, RuleSet};
    use lapsel_core::domain::processing_unit::PuType;
    use lapsel_core::ingestion::{LaptopRecord, PuRecord};
    use lapsel_core::{Engine, InMemoryCatalogStore};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, CORRELATION_HEADER};

    fn pu(name: &str, benchmark: &str, average: f64) -> PuRecord {
        PuRecord {
            name: name.to_string(),
            benchmarks: BTreeMap::from([(
                benchmark.to_string(),
                BenchmarkResults { min: average, max: average, median: average, average },
            )]),
        }
    }

    fn laptop(name: &str, price: i64, cpu: PuRecord, gpu: PuRecord) -> LaptopRecord {
        LaptopRecord {
            name: name.to_string(),
            price: Decimal::from(price),
            cpu,
            gpu,
            url: Some(format!("https://shop.example/{name}")),
            image_urls: Vec::new(),
            ram_gigabytes: Some(16),
            weight_grams: None,
        }
    }

    async fn seeded() -> (Arc<InMemoryCatalogStore>, Router) {
        let store = Arc::new(InMemoryCatalogStore::default());
        let engine = Engine::new(store.clone(), Default::default(), 4);

        let mut rules = Vec::new();
        for category in ["dev", "gaming"] {
            for pu_type in PuType::ALL {
                rules.push(CategoryRules {
                    category: category.to_string(),
                    pu_type,
                    rule_set: RuleSet::from_authored(category, [("*".to_string(), 1.0)])
                        .expect("rules"),
                });
            }
        }
        engine.ingestor.load_rules(rules).await.expect("load rules");
        engine
            .ingestor
            .ingest_laptops(vec![
                laptop("Budget", 800, pu("i5", "geekbench", 50.0), pu("RTX 3050", "timespy", 40.0)),
                laptop(
                    "Flagship",
                    2_000,
                    pu("i9", "geekbench", 100.0),
                    pu("RTX 4090", "timespy", 80.0),
                ),
            ])
            .await
            .expect("ingest");

        (store, router(engine))
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header(CORRELATION_HEADER, "req-test")
            .body(Body::from(body))
            .expect("request")
    }

    async fn read_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn select_ranks_catalog_and_wraps_in_envelope() {
        let (_, app) = seeded().await;

        let response = app
            .oneshot(post_json(
                "/laptops/select",
                json!({"categoryScores": {"gaming": 3, "dev": 1}}).to_string(),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CORRELATION_HEADER).and_then(|v| v.to_str().ok()),
            Some("req-test")
        );
        let body = read_json(response).await;
        assert_eq!(body["success"], json!(true));
        let content = body["content"].as_array().expect("content array");
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["name"], json!("Flagship"));
        assert_eq!(content[0]["cpuName"], json!("i9"));
        assert_eq!(content[0]["gpuName"], json!("RTX 4090"));
        assert_eq!(content[0]["price"], json!(2000.0));
        assert_eq!(content[0]["score"], json!(2.0));
        assert_eq!(content[0]["scoresInCategories"]["gaming"], json!(100.0));
        assert_eq!(content[1]["name"], json!("Budget"));
        assert_eq!(content[1]["score"], json!(1.0));
    }

    #[tokio::test]
    async fn select_honours_price_ceiling_and_amount() {
        let (_, app) = seeded().await;

        let response = app
            .oneshot(post_json(
                "/laptops/select",
                json!({"categoryScores": {"dev": 1}, "maxPrice": 1000, "amount": 1}).to_string(),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        let content = body["content"].as_array().expect("content array");
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["name"], json!("Budget"));
    }

    #[tokio::test]
    async fn unknown_category_is_bad_request_with_null_content() {
        let (_, app) = seeded().await;

        let response = app
            .oneshot(post_json(
                "/laptops/select",
                json!({"categoryScores": {"cooking": 1}}).to_string(),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await, json!({"success": false, "content": null}));
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request_with_null_content() {
        let (_, app) = seeded().await;

        let response = app
            .oneshot(post_json("/laptops/select", "{\"categoryScores\": [1, 2]".to_string()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await, json!({"success": false, "content": null}));
    }

    #[tokio::test]
    async fn store_outage_is_service_unavailable() {
        let (store, app) = seeded().await;
        store.set_unavailable(true);

        let response = app
            .oneshot(post_json(
                "/laptops/select",
                json!({"categoryScores": {"dev": 1}}).to_string(),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(read_json(response).await, json!({"success": false, "content": null}));
    }

    #[tokio::test]
    async fn categories_lists_known_names() {
        let (_, app) = seeded().await;

        let response = app
            .oneshot(Request::builder().uri("/categories").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CORRELATION_HEADER));
        assert_eq!(
            read_json(response).await,
            json!({"success": true, "content": ["dev", "gaming"]})
        );
    }
}
