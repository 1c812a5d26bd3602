// HTTP request handlers
use crate::application::hub::DiagramStatus;
use crate::application::slot_binding_store::DiagramEdit;
use crate::domain::diagram::{DiagramModel, DiagramType};
use crate::domain::marker::{DisplayOptions, MachineDetails, Marker, MarkerSensors};
use crate::domain::reading::RawRecord;
use crate::domain::render::RenderModel;
use crate::domain::topic::ChannelTopic;
use crate::presentation::api_error::ApiError;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRequest {
    #[serde(rename = "idMachine")]
    pub machine_id: String,
    #[serde(rename = "typeIHM")]
    pub diagram_type: DiagramType,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(flatten)]
    pub sensors: MarkerSensors,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub machine_id: Option<String>,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Inbound push for one topic, newest record first.
pub async fn push_readings(
    Path(topic): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(records): Json<Vec<RawRecord>>,
) -> Result<StatusCode, ApiError> {
    let topic = ChannelTopic::parse(&topic)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid topic {:?}", topic)))?;
    state.hub.push(topic, records)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn mount_diagram(
    Path(instance): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<MountRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .diagram_service
        .mount(&instance, &request.machine_id, request.diagram_type)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unmount_diagram(
    Path(instance): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    if state.diagram_service.unmount(&instance).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("diagram instance {:?} is not mounted", instance)))
    }
}

/// Latest mounted frame; `null` between a clear and the next mount.
pub async fn get_render(
    Path(instance): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Option<RenderModel>>, ApiError> {
    state.diagram_service.status(&instance).await?;
    Ok(Json(state.render_board.frame(&instance)))
}

pub async fn get_model(
    Path(instance): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<DiagramStatus>, ApiError> {
    Ok(Json(state.diagram_service.status(&instance).await?))
}

/// Server-sent `mount`/`clear` events for one instance.
pub async fn stream_diagram(
    Path(instance): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut updates = state.render_board.subscribe();
    let initial = state.render_board.frame(&instance);

    let stream = async_stream::stream! {
        if let Some(frame) = initial {
            if let Ok(event) = Event::default().event("mount").json_data(&frame) {
                yield Ok::<_, Infallible>(event);
            }
        }
        loop {
            match updates.recv().await {
                Ok(update) if update.instance_id == instance => {
                    let event = match &update.frame {
                        Some(frame) => Event::default().event("mount").json_data(frame),
                        None => Ok(Event::default().event("clear").data(&instance)),
                    };
                    match event {
                        Ok(event) => yield Ok(event),
                        Err(e) => tracing::warn!("Failed to encode frame of {}: {}", instance, e),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Stream of {} lagged by {} updates", instance, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn enter_edit(
    Path(instance): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.diagram_service.enter_edit(&instance).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Persist, reload and go back to live refresh.
pub async fn resume_live(
    Path(instance): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<DiagramStatus>, ApiError> {
    Ok(Json(state.diagram_service.finish_edit(&instance).await?))
}

pub async fn edit_slots(
    Path(instance): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(edit): Json<DiagramEdit>,
) -> Result<Json<DiagramModel>, ApiError> {
    match edit {
        DiagramEdit::Bind { .. }
        | DiagramEdit::Unbind { .. }
        | DiagramEdit::AddSlot { .. }
        | DiagramEdit::RemoveSlot { .. } => apply_edit(&state, &instance, edit).await,
        _ => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "group operations belong on /groups",
        )),
    }
}

pub async fn edit_groups(
    Path(instance): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(edit): Json<DiagramEdit>,
) -> Result<Json<DiagramModel>, ApiError> {
    match edit {
        DiagramEdit::AddGroup | DiagramEdit::RenameGroup { .. } | DiagramEdit::RemoveGroup { .. } => {
            apply_edit(&state, &instance, edit).await
        }
        _ => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "slot operations belong on /slots",
        )),
    }
}

async fn apply_edit(
    state: &AppState,
    instance: &str,
    edit: DiagramEdit,
) -> Result<Json<DiagramModel>, ApiError> {
    Ok(Json(state.diagram_service.edit(instance, edit).await?))
}

pub async fn list_markers(State(state): State<Arc<AppState>>) -> Json<Vec<Marker>> {
    Json(state.marker_board.markers())
}

pub async fn attach_machine(
    Path(machine_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<AttachRequest>,
) -> Result<StatusCode, ApiError> {
    let machine = MachineDetails {
        id: machine_id,
        code: request.code,
        name: request.name,
        icon_url: request.icon_url,
        color: request.color,
    };
    state.map_service.attach(machine, request.sensors).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn detach_machine(
    Path(machine_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    if state.map_service.detach(&machine_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("machine {:?} is not on the map", machine_id)))
    }
}

pub async fn set_display_options(
    State(state): State<Arc<AppState>>,
    Json(options): Json<DisplayOptions>,
) -> Result<StatusCode, ApiError> {
    state.map_service.set_display_options(options).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn select_machine(
    Path(machine_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    if state.map_service.select(&machine_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("machine {:?} is not on the map", machine_id)))
    }
}

pub async fn get_selection(State(state): State<Arc<AppState>>) -> Json<Selection> {
    Json(Selection {
        machine_id: state.map_service.selected_machine(),
    })
}
