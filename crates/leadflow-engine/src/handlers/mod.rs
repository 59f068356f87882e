//! HTTP handlers for the Leadflow API.
//!
//! The surface is operational only: event intake, trigger dry-runs, run
//! control and inspection. Workflow and trigger authoring happen elsewhere.

pub mod health;
pub mod runs;
pub mod triggers;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub use health::{api_health, health_check};

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(api_health))
        .route(
            "/api/triggers/{trigger_id}/events",
            post(triggers::enqueue_event),
        )
        .route("/api/triggers/{trigger_id}/test", post(triggers::test_trigger))
        .route(
            "/api/triggers/{trigger_id}/metrics",
            get(triggers::get_metrics),
        )
        .route("/api/workflows/{workflow_id}", get(runs::get_workflow))
        .route("/api/workflows/{workflow_id}/runs", post(runs::start_run))
        .route("/api/runs/{run_id}", get(runs::get_run))
        .route("/api/runs/{run_id}/cancel", post(runs::cancel_run))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::config::AppConfig;
    use crate::db::models::{Trigger, TriggerType, Workflow, WorkflowStatus, WorkflowStep};
    use crate::store::{MemoryStore, RunStore};

    struct Fixture {
        state: AppState,
        workflow_id: Uuid,
        trigger_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());

        let mut workflow = Workflow::new("Lead intake");
        workflow.status = WorkflowStatus::Active;
        store.save_workflow(&workflow).await.unwrap();

        let step = WorkflowStep::new(
            workflow.id,
            "announce",
            "action",
            json!({"action_type": "log", "message": "new lead"}),
        );
        store.save_step(&step).await.unwrap();

        let mut trigger = Trigger::new(workflow.id, "Web form", TriggerType::Webhook);
        trigger.conditions = json!([{"field": "status", "operator": "equals", "value": "new"}]);
        store.save_trigger(&trigger).await.unwrap();

        let config = AppConfig {
            detached_runs: false,
            ..AppConfig::default()
        };
        let state = AppState::new(
            store,
            leadflow_actions::create_default_registry(),
            config,
            None,
        );

        Fixture {
            state,
            workflow_id: workflow.id,
            trigger_id: trigger.id,
        }
    }

    async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_api_health_without_database() {
        let fx = fixture().await;
        let (status, body) = send(&fx.state, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], "not_configured");
    }

    #[tokio::test]
    async fn test_manual_run_and_inspection() {
        let fx = fixture().await;
        let uri = format!("/api/workflows/{}/runs", fx.workflow_id);
        let (status, run) = send(&fx.state, "POST", &uri, Some(json!({"input": {"email": "a@b.com"}}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(run["status"], "completed");
        assert_eq!(run["context_data"]["step_announce"]["logged"], true);

        let run_id = run["id"].as_str().unwrap();
        let (status, detail) = send(&fx.state, "GET", &format!("/api/runs/{}", run_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["steps"].as_array().unwrap().len(), 1);

        let (_, workflow) =
            send(&fx.state, "GET", &format!("/api/workflows/{}", fx.workflow_id), None).await;
        assert_eq!(workflow["total_runs"], 1);
        assert_eq!(workflow["success_runs"], 1);

        let (status, body) =
            send(&fx.state, "POST", &format!("/api/runs/{}/cancel", run_id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], 409);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let fx = fixture().await;
        let (status, _) = send(&fx.state, "GET", &format!("/api/runs/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_event_intake_then_metrics() {
        let fx = fixture().await;
        let uri = format!("/api/triggers/{}/events", fx.trigger_id);
        let (status, body) = send(&fx.state, "POST", &uri, Some(json!({"status": "new"}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "triggered");

        let report = fx.state.gateway.process_pending(10).await.unwrap();
        assert_eq!(report.processed, 1);

        let uri = format!("/api/triggers/{}/metrics", fx.trigger_id);
        let (status, metric) = send(&fx.state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(metric["total_events"], 1);
        assert_eq!(metric["successful_triggers"], 1);
    }

    #[tokio::test]
    async fn test_metrics_for_quiet_day_are_zero() {
        let fx = fixture().await;
        let uri = format!("/api/triggers/{}/metrics?date=2026-01-05", fx.trigger_id);
        let (status, metric) = send(&fx.state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(metric["metric_date"], "2026-01-05");
        assert_eq!(metric["total_events"], 0);
    }

    #[tokio::test]
    async fn test_event_payload_must_be_object() {
        let fx = fixture().await;
        let uri = format!("/api/triggers/{}/events", fx.trigger_id);
        let (status, _) = send(&fx.state, "POST", &uri, Some(json!([1, 2]))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_dry_run_reports_conditions() {
        let fx = fixture().await;
        let uri = format!("/api/triggers/{}/test", fx.trigger_id);
        let (status, result) = send(&fx.state, "POST", &uri, Some(json!({"status": "contacted"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["conditions_met"], false);
        assert_eq!(result["would_fire"], false);
        assert_eq!(result["reason"], "Trigger conditions not met");
    }
}
