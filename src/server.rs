use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};

use crate::client::{AnalyzerClient, ClientError};
use crate::config::split_comments;
use crate::relay::RelayError;
use crate::samples;
use crate::types::{AnalysisResult, CategoryResult, HistoryEntry, SentimentResult, Statistics};

#[derive(Clone)]
pub struct AppState {
    client: Arc<Mutex<AnalyzerClient>>,
    history: Arc<Mutex<Vec<HistoryEntry>>>,
}

impl AppState {
    pub fn new(client: AnalyzerClient) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Runs a blocking client call off the async workers; calls are serialized by the lock.
    async fn with_client<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut AnalyzerClient) -> Result<T, ClientError> + Send + 'static,
        T: Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            let mut client = client.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut client).map_err(ApiError::from)
        })
        .await
        .map_err(|e| ApiError::internal(format!("client task failed: {e}")))?
    }

    fn record(&self, results: &[AnalysisResult]) {
        let now = chrono::Utc::now();
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.extend(results.iter().map(|result| HistoryEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            analyzed_at: now,
            result: result.clone(),
        }));
    }

    fn history(&self) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        let status = if err.is_disconnected() {
            StatusCode::SERVICE_UNAVAILABLE
        } else if matches!(err, ClientError::Relay(RelayError::Io(_))) {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::BAD_GATEWAY
        };
        counter!("comment_analyzer_errors_total", "status" => status.as_str().to_string())
            .increment(1);
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub comment: String,
}

impl CommentRequest {
    fn validated(self) -> Result<String, ApiError> {
        let comment = self.comment.trim();
        if comment.is_empty() {
            return Err(ApiError::bad_request("Comment is required"));
        }
        Ok(comment.to_string())
    }
}

/// Either an explicit list or free text with one comment per line.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub id: String,
    pub results: Vec<AnalysisResult>,
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsRequest {
    #[serde(default)]
    pub results: Vec<AnalysisResult>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/analyze", post(analyze))
        .route("/classify", post(classify))
        .route("/sentiment", post(sentiment))
        .route("/batch", post(batch))
        .route("/statistics", post(statistics))
        .route("/history", get(history).delete(clear_history))
        .route("/history/statistics", get(history_statistics))
        .route("/samples/:set", get(sample_comments))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let client = state.client.clone();
    let (connected, relay_state) = tokio::task::spawn_blocking(move || {
        let client = client.lock().unwrap_or_else(PoisonError::into_inner);
        (client.is_connected(), client.state())
    })
    .await
    .unwrap_or((false, crate::relay::RelayState::Disconnected));

    Json(json!({ "connected": connected, "state": format!("{relay_state:?}") }))
}

#[tracing::instrument(skip(state))]
async fn connect(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let tools = state
        .with_client(|client| {
            client.connect()?;
            client.list_tools()
        })
        .await?;
    tracing::info!(tools = tools.len(), "Worker connected");
    Ok(Json(json!({ "connected": true, "tools": tools })))
}

async fn disconnect(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .with_client(|client| {
            client.disconnect();
            Ok(())
        })
        .await?;
    Ok(Json(json!({ "connected": false })))
}

#[tracing::instrument(skip(state, request))]
async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<CommentRequest>,
) -> Result<Json<AnalysisResult>, ApiError> {
    counter!("comment_analyzer_requests_total", "operation" => "analyze").increment(1);
    let comment = request.validated()?;
    let result = state.with_client(move |client| client.analyze(&comment)).await?;
    state.record(std::slice::from_ref(&result));
    Ok(Json(result))
}

async fn classify(
    State(state): State<AppState>,
    Json(request): Json<CommentRequest>,
) -> Result<Json<CategoryResult>, ApiError> {
    counter!("comment_analyzer_requests_total", "operation" => "classify").increment(1);
    let comment = request.validated()?;
    let result = state
        .with_client(move |client| {
            let category = client.classify_category(&comment)?;
            Ok(CategoryResult { comment, category })
        })
        .await?;
    Ok(Json(result))
}

async fn sentiment(
    State(state): State<AppState>,
    Json(request): Json<CommentRequest>,
) -> Result<Json<SentimentResult>, ApiError> {
    counter!("comment_analyzer_requests_total", "operation" => "sentiment").increment(1);
    let comment = request.validated()?;
    let result = state
        .with_client(move |client| {
            let sentiment = client.classify_sentiment(&comment)?;
            Ok(SentimentResult { comment, sentiment })
        })
        .await?;
    Ok(Json(result))
}

#[tracing::instrument(skip(state, request))]
async fn batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    counter!("comment_analyzer_requests_total", "operation" => "batch").increment(1);
    let mut comments = split_comments(&request.comments.join("\n"));
    if let Some(text) = &request.text {
        comments.extend(split_comments(text));
    }
    if comments.is_empty() {
        return Err(ApiError::bad_request("Comments array is required"));
    }

    let id = format!("batch-{}", uuid::Uuid::new_v4().simple());
    tracing::info!(%id, batch_size = comments.len(), "Analyzing batch");
    let results = state
        .with_client(move |client| client.analyze_batch(&comments))
        .await?;
    state.record(&results);

    let failed = results.iter().filter(|r| !r.is_complete()).count();
    Ok(Json(BatchResponse {
        id,
        results,
        failed,
    }))
}

async fn statistics(
    State(state): State<AppState>,
    Json(request): Json<StatisticsRequest>,
) -> Result<Json<Statistics>, ApiError> {
    if request.results.is_empty() {
        return Err(ApiError::bad_request("Results array is required"));
    }
    let stats = state
        .with_client(move |client| client.statistics(&request.results))
        .await?;
    Ok(Json(stats))
}

async fn history(State(state): State<AppState>) -> Json<Vec<HistoryEntry>> {
    Json(state.history())
}

async fn clear_history(State(state): State<AppState>) -> StatusCode {
    state
        .history
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    StatusCode::NO_CONTENT
}

async fn history_statistics(State(state): State<AppState>) -> Result<Json<Statistics>, ApiError> {
    let results: Vec<AnalysisResult> = state.history().into_iter().map(|e| e.result).collect();
    if results.is_empty() {
        return Ok(Json(Statistics::default()));
    }
    let stats = state
        .with_client(move |client| client.statistics(&results))
        .await?;
    Ok(Json(stats))
}

async fn sample_comments(Path(set): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let comments = samples::comments_for(&set).map_err(|e| ApiError {
        status: StatusCode::NOT_FOUND,
        message: e.to_string(),
    })?;
    Ok(Json(json!({ "set": set, "comments": comments })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState::new(AnalyzerClient::new(RelayConfig::new("true"))))
    }

    // Answers by tool name with canned payloads; anything unexpected is an error frame.
    const SCRIPTED_WORKER: &str = r#"
while read -r line; do
  case "$line" in
    *'"method":"initialize"'*)
      echo '{"protocol_version":"1","server":{"name":"scripted","version":"0"},"tools":[]}' ;;
    *'"method":"shutdown"'*)
      echo '{}'; exit 0 ;;
    *'"tool":"analyze_comment"'*'"comment":"Nice weather"'*)
      echo '{"comment":"Nice weather","category":"UNKNOWN","sentiment":"UNKNOWN","error":"AnalysisFailed: category: unrecognized reply"}' ;;
    *'"tool":"classify_comment"'*'"comment":"The pasta was undercooked"'*)
      echo '{"comment":"The pasta was undercooked","category":"FOOD"}' ;;
    *'"tool":"analyze_sentiment"'*'"comment":"The pasta was undercooked"'*)
      echo '{"comment":"The pasta was undercooked","sentiment":"NEGATIVE"}' ;;
    *'"tool":"analyze_batch"'*'"comments":["The pasta was undercooked","Lovely hotel room"]'*)
      echo '[{"comment":"The pasta was undercooked","category":"FOOD","sentiment":"NEGATIVE"},{"comment":"Lovely hotel room","category":"ACCOMMODATION","sentiment":"POSITIVE"}]' ;;
    *'"tool":"get_statistics"'*)
      echo '{"total_comments":3,"category_distribution":{"ACCOMMODATION":{"count":1,"percentage":33.3},"FOOD":{"count":1,"percentage":33.3},"UNKNOWN":{"count":1,"percentage":33.3}},"sentiment_distribution":{"NEGATIVE":{"count":1,"percentage":33.3},"POSITIVE":{"count":1,"percentage":33.3},"UNKNOWN":{"count":1,"percentage":33.3}}}' ;;
    *)
      echo '{"error":"unexpected request"}' ;;
  esac
done
"#;

    fn connected_app() -> Router {
        let config = RelayConfig::new("sh")
            .arg("-c")
            .arg(SCRIPTED_WORKER)
            .handshake_timeout(std::time::Duration::from_secs(5))
            .call_timeout(std::time::Duration::from_secs(5));
        router(AppState::new(AnalyzerClient::connected(config).unwrap()))
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn reports_disconnected_state() {
        let (status, body) = send(app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "connected": false, "state": "Disconnected" }));
    }

    #[tokio::test]
    async fn analysis_without_worker_is_unavailable() {
        let (status, body) = send(
            app(),
            "POST",
            "/analyze",
            Some(json!({ "comment": "The flight was delayed" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("not connected"));
    }

    #[tokio::test]
    async fn failed_connect_is_unavailable() {
        let (status, body) = send(app(), "POST", "/connect", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("worker exited"));
    }

    #[tokio::test]
    async fn empty_inputs_are_rejected_before_the_worker() {
        let app = app();
        let (status, body) =
            send(app.clone(), "POST", "/analyze", Some(json!({ "comment": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Comment is required");

        let (status, _) =
            send(app.clone(), "POST", "/batch", Some(json!({ "text": "\n \n" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app, "POST", "/statistics", Some(json!({ "results": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn serves_sample_sets() {
        let (status, body) = send(app(), "GET", "/samples/hotel", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["comments"].as_array().unwrap().len(), 10);

        let (status, _) = send(app(), "GET", "/samples/spa", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn single_comment_routes_return_results() {
        let app = connected_app();

        let (status, body) = send(app.clone(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "connected": true, "state": "Ready" }));

        let (status, body) = send(
            app.clone(),
            "POST",
            "/classify",
            Some(json!({ "comment": "The pasta was undercooked" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "comment": "The pasta was undercooked", "category": "FOOD" }));

        let (status, body) = send(
            app.clone(),
            "POST",
            "/sentiment",
            Some(json!({ "comment": "  The pasta was undercooked " })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sentiment"], "NEGATIVE");

        // classify/sentiment don't go into history
        let (_, body) = send(app, "GET", "/history", None).await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn unclassified_comment_is_still_a_result() {
        let app = connected_app();
        let (status, body) = send(
            app.clone(),
            "POST",
            "/analyze",
            Some(json!({ "comment": "Nice weather" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["category"], "UNKNOWN");
        assert_eq!(body["sentiment"], "UNKNOWN");
        assert!(body["error"].as_str().unwrap().starts_with("AnalysisFailed"));

        let (_, body) = send(app, "GET", "/health", None).await;
        assert_eq!(body["connected"], true);
    }

    #[tokio::test]
    async fn analyses_are_recorded_in_history() {
        let app = connected_app();

        let (status, _) = send(
            app.clone(),
            "POST",
            "/analyze",
            Some(json!({ "comment": "Nice weather" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            app.clone(),
            "POST",
            "/batch",
            Some(json!({ "text": "The pasta was undercooked\n\n  Lovely hotel room  \n" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["id"].as_str().unwrap().starts_with("batch-"));
        assert_eq!(body["failed"], 0);
        assert_eq!(body["results"][1]["category"], "ACCOMMODATION");

        let (_, body) = send(app.clone(), "GET", "/history", None).await;
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["comment"], "Nice weather");
        assert_eq!(entries[2]["comment"], "Lovely hotel room");
        assert!(entries.iter().all(|e| e["id"].is_string() && e["analyzed_at"].is_string()));

        let (status, body) = send(app.clone(), "GET", "/history/statistics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_comments"], 3);
        assert_eq!(body["category_distribution"]["FOOD"]["count"], 1);

        let (status, _) = send(app.clone(), "DELETE", "/history", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = send(app, "GET", "/history", None).await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn batch_accepts_an_explicit_list() {
        let app = connected_app();
        let (status, body) = send(
            app,
            "POST",
            "/batch",
            Some(json!({ "comments": ["The pasta was undercooked", "  ", "Lovely hotel room"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
        assert_eq!(body["results"][0]["sentiment"], "NEGATIVE");
    }

    #[tokio::test]
    async fn empty_history_has_empty_statistics() {
        let app = app();
        let (status, body) = send(app.clone(), "GET", "/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (_, body) = send(app.clone(), "GET", "/history/statistics", None).await;
        assert_eq!(body["total_comments"], 0);

        let (status, _) = send(app, "DELETE", "/history", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
