//! HTTP surface over the analysis engine.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::analysis::AnalysisContext;
use crate::cancel::CancellationToken;
use crate::config::HttpServerConfig;
use crate::error::{ImpactError, Result};
use crate::impact::ManualParty;
use crate::risk::{self, ChangeType, RiskAssessment, RiskLevel};

/// HTTP server wrapper
pub struct HttpServer {
    context: Arc<AnalysisContext>,
    allowed_origins: Vec<String>,
}

#[derive(Clone)]
struct AppState {
    context: Arc<AnalysisContext>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    seed_asset_ids: Vec<u64>,
    #[serde(default)]
    requester_id: Option<u64>,
    #[serde(default)]
    implementer_id: Option<u64>,
    /// People picked through `/v1/people/search`, applied after classification
    #[serde(default)]
    manual: Vec<ManualParty>,
}

#[derive(Debug, Deserialize)]
struct DecideRequest {
    change_type: String,
    #[serde(default)]
    answers: Option<Vec<u8>>,
    #[serde(default)]
    total_score: Option<u32>,
    /// Overrides the level banded from the score
    #[serde(default)]
    risk_level: Option<String>,
    #[serde(default)]
    selected_asset_count: usize,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

impl HttpServer {
    pub fn new(context: Arc<AnalysisContext>, config: &HttpServerConfig) -> Self {
        Self {
            context,
            allowed_origins: config.allowed_origins.clone(),
        }
    }

    /// Run the HTTP server
    pub async fn run(&self, port: u16) -> Result<()> {
        let addr = format!("127.0.0.1:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            ImpactError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind to {}: {} (set http_server.port in config.toml to use another port)", addr, e),
            ))
        })?;
        log::info!("Starting impactmap HTTP server on http://{}", addr);

        axum::serve(listener, self.router())
            .await
            .map_err(|e| ImpactError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("HTTP server error: {}", e))))?;
        Ok(())
    }

    /// Create the axum router
    pub fn router(&self) -> Router {
        // Any origin unless a list is configured.
        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> =
                self.allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/health", get(handle_health))
            .route("/v1/impact/analyze", post(handle_analyze))
            .route("/v1/risk/decide", post(handle_decide))
            .route("/v1/assets/search", get(handle_asset_search))
            .route("/v1/people/search", get(handle_people_search))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
            .with_state(AppState {
                context: Arc::clone(&self.context),
            })
    }
}

fn error_response(err: &ImpactError) -> Response {
    let status = match err {
        ImpactError::Validation(_) => StatusCode::BAD_REQUEST,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        log::error!("Request failed: {}", err);
    }
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "impactmap",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

async fn handle_analyze(State(state): State<AppState>, Json(request): Json<AnalyzeRequest>) -> Response {
    let token = CancellationToken::new();
    match state.context.run_for_ids(&request.seed_asset_ids, &token).await {
        Ok(mut report) => {
            state.context.add_manual_parties(&mut report, &request.manual).await;
            let reviewers = report.peer_reviewers(request.requester_id, request.implementer_id);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "report": report,
                    "peer_reviewers": reviewers,
                })),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

fn assessment_for(request: &DecideRequest) -> Result<RiskAssessment> {
    let mut assessment = match (&request.answers, request.total_score) {
        (Some(answers), _) => RiskAssessment::from_answers(answers)?,
        (None, Some(total)) => RiskAssessment::from_total(total),
        (None, None) => {
            return Err(ImpactError::Validation(
                "Provide either answers or total_score".to_string(),
            ))
        }
    };
    if let Some(level) = &request.risk_level {
        // unrecognised names fall back to the default mapping downstream
        assessment.level = RiskLevel::parse(level);
    }
    Ok(assessment)
}

async fn handle_decide(Json(request): Json<DecideRequest>) -> Response {
    let Some(change_type) = ChangeType::parse(&request.change_type) else {
        return error_response(&ImpactError::Validation(format!(
            "Unknown change_type '{}'",
            request.change_type
        )));
    };
    match assessment_for(&request) {
        Ok(assessment) => {
            let decision = risk::decide(&change_type, &assessment, request.selected_asset_count);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "decision": decision,
                    "priority_value": decision.priority.value(),
                    "impact_value": decision.impact.value(),
                    "assessment": assessment,
                })),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn handle_asset_search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    let assets = state.context.search_assets(&query.q).await;
    (StatusCode::OK, Json(serde_json::json!({ "assets": assets }))).into_response()
}

async fn handle_people_search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    let people = state.context.resolver().search_people(&query.q).await;
    (StatusCode::OK, Json(serde_json::json!({ "people": people }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, TtlCache};
    use crate::config::AnalysisConfig;
    use crate::directory::{MockDirectory, Person};
    use crate::fetch::RateLimitedFetcher;
    use crate::models::Asset;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn router() -> Router {
        let mut seed = Asset::new(1, "api gateway");
        seed.agent_id = Some(9);
        let dir = Arc::new(
            MockDirectory::new()
                .with_asset(seed)
                .with_agent(Person { id: 9, first_name: Some("Grace".into()), ..Default::default() })
                .with_requester(Person { id: 12, first_name: Some("Lin".into()), ..Default::default() }),
        );
        let cache = TtlCache::new(Arc::new(MemoryStore::new(64)));
        let fetcher = Arc::new(RateLimitedFetcher::new(dir.clone(), dir, cache));
        let context = Arc::new(AnalysisContext::with_fetcher(fetcher, &AnalysisConfig::default()));
        HttpServer::new(context, &HttpServerConfig::default()).router()
    }

    async fn call(method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call("GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "impactmap");
    }

    #[tokio::test]
    async fn test_analyze() {
        let body = serde_json::json!({ "seed_asset_ids": [1], "requester_id": 4 });
        let (status, body) = call("POST", "/v1/impact/analyze", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["parties"]["approvers"][0]["name"], "Grace");
        assert_eq!(body["peer_reviewers"]["status"], "reviewers");
        assert_eq!(body["peer_reviewers"]["reviewers"][0], 9);
    }

    #[tokio::test]
    async fn test_analyze_applies_manual_parties() {
        let body = serde_json::json!({
            "seed_asset_ids": [1],
            "manual": [
                { "id": 12, "role": "stakeholder" },
                { "id": 12, "role": "stakeholder" },
                { "id": 9, "role": "stakeholder" }
            ]
        });
        let (status, body) = call("POST", "/v1/impact/analyze", Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let parties = &body["report"]["parties"];
        assert_eq!(parties["approvers"].as_array().unwrap().len(), 1);
        assert_eq!(parties["stakeholders"].as_array().unwrap().len(), 1);
        assert_eq!(parties["stakeholders"][0]["id"], 12);
        assert_eq!(parties["stakeholders"][0]["source"], "Manually added");

        let warnings: Vec<&str> = body["report"]["warnings"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(warnings.contains(&"Lin is already listed as Stakeholder"));
        assert!(warnings.contains(&"Grace is already an Approver and cannot also be a Stakeholder"));
    }

    #[tokio::test]
    async fn test_analyze_rejects_unknown_manual_role() {
        let body = serde_json::json!({ "seed_asset_ids": [1], "manual": [{ "id": 12, "role": "owner" }] });
        let (status, _) = call("POST", "/v1/impact/analyze", Some(body)).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_analyze_without_seeds_is_bad_request() {
        let (status, body) = call("POST", "/v1/impact/analyze", Some(serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("at least one asset"));
    }

    #[tokio::test]
    async fn test_decide() {
        let body = serde_json::json!({
            "change_type": "emergency",
            "answers": [1, 1, 1, 1, 1],
            "selected_asset_count": 1
        });
        let (status, body) = call("POST", "/v1/risk/decide", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["decision"]["priority"], "urgent");
        assert_eq!(body["decision"]["peer_review_required"], false);
        assert_eq!(body["priority_value"], 4);
    }

    #[tokio::test]
    async fn test_decide_rejects_unknown_change_type() {
        let body = serde_json::json!({ "change_type": "whenever", "total_score": 9 });
        let (status, _) = call("POST", "/v1/risk/decide", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_people_search() {
        let (status, body) = call("GET", "/v1/people/search?q=grace", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["people"][0]["kind"], "agent");
    }
}
