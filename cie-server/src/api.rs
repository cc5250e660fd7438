//! RESTful API接口
//!
//! 所有业务路由挂载在 `/api/v1` 下，`/metrics` 输出Prometheus文本格式。

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use cie_core::{
    BatchResult, CreateWorkflowRequest, ExternalSystem, FhirResource, Hl7Message,
    IngestFhirRequest, IngestHl7Request, IntegrationError, IntegrationEvent, IntegrationHealth,
    IntegrationWorkflow, MessageFilter, RegisterSystemRequest, ResourceFilter,
    UpdateSystemRequest, WorkflowExecution,
};
use serde::Deserialize;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};

use crate::error::ApiResult;
use crate::state::AppState;

const DEFAULT_EVENT_LIMIT: usize = 100;

/// 构建完整应用路由
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

/// API v1 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/systems", post(register_system).get(list_systems))
        .route(
            "/systems/:id",
            get(get_system).put(update_system).delete(delete_system),
        )
        .route("/hl7/messages", post(ingest_hl7).get(list_messages))
        .route("/hl7/messages/batch", post(ingest_hl7_batch))
        .route("/hl7/messages/:id", get(get_message))
        .route("/hl7/messages/:id/ack", get(acknowledge))
        .route("/fhir/resources", post(ingest_fhir).get(list_resources))
        .route("/fhir/resources/batch", post(ingest_fhir_batch))
        .route("/fhir/resources/:id", get(get_resource))
        .route("/health", get(check_all))
        .route("/health/:system_id", get(check_one))
        .route("/workflows", post(create_workflow).get(list_workflows))
        .route("/workflows/:id", get(get_workflow).delete(delete_workflow))
        .route("/workflows/:id/activate", post(activate_workflow))
        .route("/workflows/:id/deactivate", post(deactivate_workflow))
        .route("/workflows/:id/execute", post(execute_workflow))
        .route("/events", get(list_events))
}

async fn register_system(
    State(state): State<AppState>,
    Json(request): Json<RegisterSystemRequest>,
) -> ApiResult<(StatusCode, Json<ExternalSystem>)> {
    let system = state.registry.register(request).await?;
    Ok((StatusCode::CREATED, Json(system)))
}

async fn list_systems(State(state): State<AppState>) -> ApiResult<Json<Vec<ExternalSystem>>> {
    Ok(Json(state.registry.list().await?))
}

async fn get_system(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExternalSystem>> {
    Ok(Json(state.registry.get(&id).await?))
}

async fn update_system(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateSystemRequest>,
) -> ApiResult<Json<ExternalSystem>> {
    Ok(Json(state.registry.update(&id, request).await?))
}

async fn delete_system(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.delete(&id).await?;
    state.metrics.forget_system(&id);
    Ok(StatusCode::NO_CONTENT)
}

async fn ingest_hl7(
    State(state): State<AppState>,
    Json(request): Json<IngestHl7Request>,
) -> ApiResult<(StatusCode, Json<Hl7Message>)> {
    let message = state.service.ingest_hl7(request).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn ingest_hl7_batch(
    State(state): State<AppState>,
    Json(requests): Json<Vec<IngestHl7Request>>,
) -> Json<BatchResult<Hl7Message>> {
    Json(state.service.ingest_hl7_batch(requests).await)
}

async fn list_messages(
    State(state): State<AppState>,
    Query(filter): Query<MessageFilter>,
) -> ApiResult<Json<Vec<Hl7Message>>> {
    debug!("Listing HL7 messages with {:?}", filter);
    Ok(Json(state.service.list_messages(filter).await?))
}

async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Hl7Message>> {
    Ok(Json(state.service.get_message(&id).await?))
}

async fn acknowledge(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let ack = state.service.acknowledge(&id).await?;
    Ok(([(header::CONTENT_TYPE, "x-application/hl7-v2+er7")], ack))
}

async fn ingest_fhir(
    State(state): State<AppState>,
    Json(request): Json<IngestFhirRequest>,
) -> ApiResult<(StatusCode, Json<FhirResource>)> {
    let resource = state.service.ingest_fhir(request).await?;
    Ok((StatusCode::CREATED, Json(resource)))
}

async fn ingest_fhir_batch(
    State(state): State<AppState>,
    Json(requests): Json<Vec<IngestFhirRequest>>,
) -> Json<BatchResult<FhirResource>> {
    Json(state.service.ingest_fhir_batch(requests).await)
}

async fn list_resources(
    State(state): State<AppState>,
    Query(filter): Query<ResourceFilter>,
) -> ApiResult<Json<Vec<FhirResource>>> {
    Ok(Json(state.service.list_resources(filter).await?))
}

async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<FhirResource>> {
    Ok(Json(state.service.get_resource(&id).await?))
}

async fn check_all(State(state): State<AppState>) -> ApiResult<Json<Vec<IntegrationHealth>>> {
    let reports = state.health.check(None).await?;
    state.metrics.observe_health(&reports);
    Ok(Json(reports))
}

async fn check_one(
    State(state): State<AppState>,
    Path(system_id): Path<String>,
) -> ApiResult<Json<IntegrationHealth>> {
    let reports = state.health.check(Some(&system_id)).await?;
    state.metrics.observe_health(&reports);
    let report = reports
        .into_iter()
        .next()
        .ok_or_else(|| IntegrationError::not_found("ExternalSystem", system_id))?;
    Ok(Json(report))
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(request): Json<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<IntegrationWorkflow>)> {
    let workflow = state.workflows.create_workflow(request).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn list_workflows(State(state): State<AppState>) -> ApiResult<Json<Vec<IntegrationWorkflow>>> {
    Ok(Json(state.workflows.list_workflows().await?))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<IntegrationWorkflow>> {
    Ok(Json(state.workflows.get_workflow(&id).await?))
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.workflows.delete_workflow(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<IntegrationWorkflow>> {
    Ok(Json(state.workflows.activate(&id).await?))
}

async fn deactivate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<IntegrationWorkflow>> {
    Ok(Json(state.workflows.deactivate(&id).await?))
}

/// 请求体可选，作为执行输入
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<Value>>,
) -> ApiResult<Json<WorkflowExecution>> {
    let payload = payload.map(|Json(value)| value).unwrap_or(Value::Null);
    info!("Execution of workflow {} requested", id);
    Ok(Json(state.workflows.execute_with_payload(&id, payload).await?))
}

#[derive(Debug, Deserialize)]
struct EventQuery {
    limit: Option<usize>,
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Json<Vec<IntegrationEvent>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    Json(state.recent_events.recent(limit).await)
}

async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state.metrics.render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
