// Virtual sensor HTTP handlers
use crate::application::virtual_sensor_service::VirtualSensorService;
use crate::domain::virtual_sensor::{
    CreatedAtOrder, VirtualSensorDraft, VirtualSensorRecord, VirtualSensorSpec,
};
use crate::presentation::api_error::ApiError;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub id_machine: String,
    #[serde(default)]
    pub order: CreatedAtOrder,
}

/// One page of the list plus the order its column header toggles to.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualSensorList {
    pub order: CreatedAtOrder,
    pub next_order: CreatedAtOrder,
    pub records: Vec<VirtualSensorRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckQuery {
    pub sensor_id: String,
    pub id_enterprise: String,
}

#[derive(Deserialize)]
pub struct PreviewRequest {
    pub algorithm: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub algorithm: String,
    pub sensors_in: Vec<String>,
}

pub async fn list_virtual_sensors(
    Query(query): Query<ListQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<VirtualSensorList>, ApiError> {
    let records = state
        .virtual_sensor_service
        .list(&query.id_machine, query.order)
        .await?;
    Ok(Json(VirtualSensorList {
        order: query.order,
        next_order: query.order.toggled(),
        records,
    }))
}

/// 204 when the identifier is free, 409 when taken.
pub async fn check_sensor_id(
    Query(query): Query<CheckQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state
        .virtual_sensor_service
        .validate_sensor_id(&query.sensor_id, &query.id_enterprise)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn preview_algorithm(
    Json(request): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let template = VirtualSensorService::preview(&request.algorithm)?;
    Ok(Json(PreviewResponse {
        algorithm: template.positional_template,
        sensors_in: template.sensors_in,
    }))
}

pub async fn create_virtual_sensor(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<VirtualSensorDraft>,
) -> Result<(StatusCode, Json<VirtualSensorSpec>), ApiError> {
    let spec = state.virtual_sensor_service.create(draft).await?;
    Ok((StatusCode::CREATED, Json(spec)))
}

pub async fn update_virtual_sensor(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<VirtualSensorDraft>,
) -> Result<Json<VirtualSensorSpec>, ApiError> {
    Ok(Json(state.virtual_sensor_service.update(draft).await?))
}

pub async fn delete_virtual_sensor(
    Path(sensor_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.virtual_sensor_service.delete(&sensor_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Named form of a stored sensor, for the edit form.
pub async fn edit_view(Json(spec): Json<VirtualSensorSpec>) -> Json<VirtualSensorDraft> {
    Json(VirtualSensorService::edit_view(&spec))
}
