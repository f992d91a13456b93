//! HTTP surface over the Controller.
//!
//! Every endpoint maps onto exactly one Controller operation; the API
//! adds no semantics of its own.

use crate::{
    config::ApiConfig,
    controller::{Controller, SystemStatus},
    models::{AgentDescriptor, Capability, Task, TaskStatus, ValueMap},
    FabricError, Result,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

const ROUTE_HEALTH: &str = "/health";
const ROUTE_TASKS: &str = "/tasks";
const ROUTE_TASK_BY_ID: &str = "/tasks/{task_id}";
const ROUTE_AGENTS: &str = "/agents";
const ROUTE_AGENTS_BY_CAPABILITY: &str = "/agents/{capability}";
const ROUTE_SYSTEM_STATUS: &str = "/system/status";

#[derive(Clone)]
pub struct ApiServer {
    config: ApiConfig,
    controller: Arc<Controller>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub description: String,
    #[serde(default = "default_creator")]
    pub creator_id: String,
    #[serde(default)]
    pub required_capabilities: Vec<Capability>,
    pub priority: Option<i32>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: ValueMap,
}

fn default_creator() -> String {
    "api".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub description: String,
    pub creator_id: String,
    pub status: TaskStatus,
    pub assigned_agent_id: Option<String>,
    pub priority: i32,
    pub result: Option<ValueMap>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            description: task.description,
            creator_id: task.creator_id,
            status: task.status,
            assigned_agent_id: task.assigned_agent_id,
            priority: task.priority,
            result: task.result,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ApiServer {
    pub fn new(config: ApiConfig, controller: Arc<Controller>) -> Self {
        Self { config, controller }
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();
        let listener =
            tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
                .await
                .map_err(|e| FabricError::Internal(e.into()))?;

        info!(
            "API server listening on {}:{}",
            self.config.host, self.config.port
        );

        axum::serve(listener, app)
            .await
            .map_err(|e| FabricError::Internal(e.into()))?;
        Ok(())
    }

    pub fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(
                self.config
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE]);

        Router::new()
            .route(ROUTE_HEALTH, get(health))
            .route(ROUTE_TASKS, post(create_task))
            .route(ROUTE_TASK_BY_ID, get(get_task))
            .route(ROUTE_AGENTS, get(list_agents))
            .route(ROUTE_AGENTS_BY_CAPABILITY, get(agents_by_capability))
            .route(ROUTE_SYSTEM_STATUS, get(system_status))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.controller.clone())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_task(
    State(controller): State<Arc<Controller>>,
    Json(request): Json<CreateTaskRequest>,
) -> std::result::Result<Json<CreateTaskResponse>, (StatusCode, Json<ErrorResponse>)> {
    let task_id = controller
        .create_task(
            &request.description,
            &request.creator_id,
            request.required_capabilities,
            request.priority.unwrap_or(crate::constants::DEFAULT_TASK_PRIORITY),
            request.deadline,
            request.metadata,
        )
        .await
        .map_err(|e| {
            let status = match e {
                FabricError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })?;

    let status = controller
        .get_task_status(&task_id)
        .await
        .unwrap_or(TaskStatus::Pending);
    Ok(Json(CreateTaskResponse { task_id, status }))
}

async fn get_task(
    State(controller): State<Arc<Controller>>,
    Path(task_id): Path<String>,
) -> std::result::Result<Json<TaskResponse>, (StatusCode, Json<ErrorResponse>)> {
    match controller.get_task(&task_id).await {
        Some(task) => Ok(Json(task.into())),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("unknown task: {task_id}"),
            }),
        )),
    }
}

async fn list_agents(State(controller): State<Arc<Controller>>) -> Json<Vec<AgentDescriptor>> {
    Json(controller.list_agents().await)
}

async fn agents_by_capability(
    State(controller): State<Arc<Controller>>,
    Path(capability): Path<String>,
) -> std::result::Result<Json<Vec<AgentDescriptor>>, (StatusCode, Json<ErrorResponse>)> {
    let capability: Capability = capability.parse().map_err(|e: String| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: e }),
        )
    })?;
    Ok(Json(controller.get_agents_by_capability(capability).await))
}

async fn system_status(State(controller): State<Arc<Controller>>) -> Json<SystemStatus> {
    Json(controller.system_status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::MessageBus,
        config::{BusConfig, ControllerConfig},
        sink::MemorySink,
    };
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn test_server() -> (ApiServer, Arc<Controller>) {
        let bus = MessageBus::new(BusConfig::default(), Arc::new(MemorySink::new()));
        let controller = Arc::new(Controller::new(ControllerConfig::default(), bus));
        let config = ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            allowed_origins: vec![],
        };
        (ApiServer::new(config, controller.clone()), controller)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let (server, controller) = test_server();
        let response = server
            .build_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn create_and_fetch_a_task() {
        let (server, controller) = test_server();
        controller
            .register_agent(
                "a1",
                "Worker",
                vec![Capability::TextProcessing],
                ValueMap::new(),
            )
            .await;

        let request = Request::post("/tasks")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "description": "hello",
                    "creator_id": "u1",
                    "required_capabilities": ["text_processing"]
                })
                .to_string(),
            ))
            .unwrap();
        let response = server.build_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["status"], "assigned");

        let task_id = created["task_id"].as_str().unwrap();
        let response = server
            .build_router()
            .oneshot(
                Request::get(format!("/tasks/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let fetched = body_json(response).await;
        assert_eq!(fetched["assigned_agent_id"], "a1");
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn unknown_task_is_404_and_bad_capability_is_400() {
        let (server, controller) = test_server();

        let response = server
            .build_router()
            .oneshot(Request::get("/tasks/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = server
            .build_router()
            .oneshot(
                Request::get("/agents/time_travel")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        controller.bus().shutdown().await;
    }

    #[tokio::test]
    async fn system_status_reports_counts() {
        let (server, controller) = test_server();
        controller
            .register_agent("a1", "Worker", vec![Capability::Planning], ValueMap::new())
            .await;

        let response = server
            .build_router()
            .oneshot(Request::get("/system/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["agents"]["active"], 1);
        controller.bus().shutdown().await;
    }
}
