use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::config::{DEFAULT_MAX_ITERATIONS, DEFAULT_MODEL, RunConfig};
use crate::errors::{ErrorClass, OrchestratorError};
use crate::orchestrator::{Decision, Orchestrator, Run, RunStatus};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payload types ──────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub goal: String,
    pub cwd: Option<PathBuf>,
    pub model: Option<String>,
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub hitl_enabled: bool,
}

impl CreateRunRequest {
    fn into_config(self) -> RunConfig {
        RunConfig::new(&self.goal)
            .with_cwd(self.cwd.unwrap_or_else(|| PathBuf::from(".")))
            .with_model(self.model.as_deref().unwrap_or(DEFAULT_MODEL))
            .with_max_iterations(self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS))
            .with_hitl(self.hitl_enabled)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRunResponse {
    pub run_id: String,
    pub status: RunStatus,
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub decision: String,
}

// ── Error handling ────────────────────────────────────────────────────

/// An orchestrator error rendered as `{"error", "reason"}`.
pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match (self.0.class(), &self.0) {
            (_, OrchestratorError::NoSuchRun(_)) => StatusCode::NOT_FOUND,
            (ErrorClass::Configuration, _) => StatusCode::BAD_REQUEST,
            (ErrorClass::SuspensionProtocol, _) => StatusCode::CONFLICT,
            (ErrorClass::Internal, _) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(serde_json::json!({
                "error": self.0.to_string(),
                "reason": self.0.reason(),
            })),
        )
            .into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/runs", get(list_runs).post(create_run))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/resume", post(resume_run))
        .route("/api/goals", get(list_goals))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_run(
    State(state): State<SharedState>,
    Json(req): Json<CreateRunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = state.orchestrator.start(req.into_config())?;
    Ok((
        StatusCode::CREATED,
        Json(CreateRunResponse {
            run_id,
            status: RunStatus::Running,
        }),
    ))
}

async fn list_runs(State(state): State<SharedState>) -> Json<Vec<Run>> {
    Json(state.orchestrator.list())
}

async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(state.orchestrator.get(&id)?))
}

async fn resume_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ResumeRequest>,
) -> Result<StatusCode, ApiError> {
    let decision = Decision::from_str(&req.decision)?;
    state.orchestrator.resume(&id, decision).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_goals(State(state): State<SharedState>) -> Json<Vec<String>> {
    Json(state.orchestrator.goals().names())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goals::GoalRegistry;
    use crate::testing::{RecordingTools, ScriptedProvider, StaticGoal};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn orchestrator(goal: StaticGoal) -> Orchestrator {
        let mut goals = GoalRegistry::new();
        goals.register(Arc::new(goal.named("static")));
        Orchestrator::builder(Arc::new(ScriptedProvider::new()))
            .goals(goals)
            .tools(Arc::new(RecordingTools::new()))
            .build()
    }

    fn test_app(orchestrator: Orchestrator) -> Router {
        api_router().with_state(Arc::new(AppState { orchestrator }))
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app(orchestrator(StaticGoal::always()));
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_create_run_returns_created_running() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(StaticGoal::always());
        let app = test_app(orch.clone());

        let response = app
            .oneshot(post_json(
                "/api/runs",
                json!({"goal": "static", "cwd": dir.path(), "max_iterations": 3}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: CreateRunResponse = body_json(response.into_body()).await;
        assert_eq!(created.status, RunStatus::Running);

        let run = orch.settled(&created.run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Achieved);
        assert_eq!(run.max_iterations, 3);
    }

    #[tokio::test]
    async fn test_create_run_unknown_goal_is_bad_request() {
        let app = test_app(orchestrator(StaticGoal::always()));
        let response = app
            .oneshot(post_json("/api/runs", json!({"goal": "nope"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["reason"], "invalid_goal");
        assert!(body["error"].as_str().unwrap().contains("static"));
    }

    #[tokio::test]
    async fn test_create_run_zero_iterations_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(orchestrator(StaticGoal::always()));
        let response = app
            .oneshot(post_json(
                "/api/runs",
                json!({"goal": "static", "cwd": dir.path(), "max_iterations": 0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["reason"], "invalid_config");
    }

    #[tokio::test]
    async fn test_get_unknown_run_is_not_found() {
        let app = test_app(orchestrator(StaticGoal::always()));
        let response = app.oneshot(get("/api/runs/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["reason"], "no_such_run");
    }

    #[tokio::test]
    async fn test_get_and_list_runs() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(StaticGoal::always());
        let run_id = orch
            .start(RunConfig::new("static").with_cwd(dir.path()))
            .unwrap();
        orch.settled(&run_id).await.unwrap();

        let app = test_app(orch);
        let response = app
            .clone()
            .oneshot(get(&format!("/api/runs/{}", run_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let run: Value = body_json(response.into_body()).await;
        assert_eq!(run["status"], "achieved");
        assert_eq!(run["final_state"]["achieved"], true);

        let response = app.oneshot(get("/api/runs")).await.unwrap();
        let runs: Vec<Value> = body_json(response.into_body()).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0]["run_id"], run_id.as_str());
    }

    #[tokio::test]
    async fn test_resume_approve_then_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(StaticGoal::achieved_on(2));
        let run_id = orch
            .start(RunConfig::new("static").with_cwd(dir.path()).with_hitl(true))
            .unwrap();
        assert_eq!(orch.settled(&run_id).await.unwrap().status, RunStatus::Suspended);

        let app = test_app(orch.clone());
        let uri = format!("/api/runs/{}/resume", run_id);
        let response = app
            .clone()
            .oneshot(post_json(&uri, json!({"decision": "approve"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let run = orch.settled(&run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Achieved);

        let response = app
            .oneshot(post_json(&uri, json!({"decision": "approve"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["reason"], "not_suspended");
    }

    #[tokio::test]
    async fn test_resume_invalid_decision_is_bad_request() {
        let app = test_app(orchestrator(StaticGoal::always()));
        let response = app
            .oneshot(post_json("/api/runs/any/resume", json!({"decision": "maybe"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["reason"], "invalid_decision");
    }

    #[tokio::test]
    async fn test_resume_unknown_run_is_not_found() {
        let app = test_app(orchestrator(StaticGoal::always()));
        let response = app
            .oneshot(post_json("/api/runs/ghost/resume", json!({"decision": "abort"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_goals() {
        let app = test_app(orchestrator(StaticGoal::always()));
        let response = app.oneshot(get("/api/goals")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let goals: Vec<String> = body_json(response.into_body()).await;
        assert_eq!(goals, vec!["static".to_string()]);
    }

    #[test]
    fn test_internal_error_maps_to_500() {
        let err = ApiError::from(OrchestratorError::Internal("boom".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let err = ApiError::from(OrchestratorError::AlreadyResuming("r".into()));
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
