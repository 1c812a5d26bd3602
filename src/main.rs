// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use anyhow::Context;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::diagram_service::DiagramService;
use crate::application::hub::TelemetryHub;
use crate::application::map_events::MapEventBus;
use crate::application::map_service::MapService;
use crate::application::virtual_sensor_service::VirtualSensorService;
use crate::infrastructure::channel_sink::ChannelSink;
use crate::infrastructure::config::load_app_config;
use crate::infrastructure::marker_board::MarkerBoard;
use crate::infrastructure::render_board::RenderBoard;
use crate::infrastructure::rest_repository::RestRepository;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    attach_machine, detach_machine, edit_groups, edit_slots, enter_edit, get_model, get_render,
    get_selection, health_check, list_markers, mount_diagram, push_readings, resume_live,
    select_machine, set_display_options, stream_diagram, unmount_diagram,
};
use crate::presentation::virtual_sensor_handlers::{
    check_sensor_id, create_virtual_sensor, delete_virtual_sensor, edit_view,
    list_virtual_sensors, preview_algorithm, update_virtual_sensor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let app_config = load_app_config().context("Failed to load configuration")?;

    // Create repository (infrastructure layer)
    let repository = Arc::new(RestRepository::new(
        app_config.api.host.clone(),
        app_config.api.token.clone(),
        app_config.api.id_enterprise.clone(),
    ));

    // Outbound join/leave frames go to the pub/sub bridge
    let (channel_sink, mut frames) = ChannelSink::new();
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            tracing::info!("channel <- {}", frame);
        }
    });

    let render_board = Arc::new(RenderBoard::new(256));
    let marker_board = Arc::new(MarkerBoard::new());
    let bus = MapEventBus::new(app_config.map.event_capacity);

    // Start the hub that owns all live state
    let (hub, hub_handle) = TelemetryHub::new(
        Arc::new(channel_sink),
        render_board.clone(),
        marker_board.clone(),
        bus.clone(),
        app_config.refresh.hub_settings(),
    );
    let hub_task = tokio::spawn(hub.run());

    // Create services (application layer)
    let diagram_service = DiagramService::new(hub_handle.clone(), repository.clone(), repository.clone());
    let map_service = MapService::new(hub_handle.clone(), repository.clone(), &bus);
    let virtual_sensor_service = VirtualSensorService::new(repository.clone());

    // Create application state
    let state = Arc::new(AppState {
        hub: hub_handle.clone(),
        diagram_service,
        map_service,
        virtual_sensor_service,
        render_board,
        marker_board,
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/channels/:topic/push", post(push_readings))
        .route(
            "/diagrams/:instance",
            post(mount_diagram).get(get_render).delete(unmount_diagram),
        )
        .route("/diagrams/:instance/model", get(get_model))
        .route("/diagrams/:instance/stream", get(stream_diagram))
        .route("/diagrams/:instance/edit", post(enter_edit))
        .route("/diagrams/:instance/live", post(resume_live))
        .route("/diagrams/:instance/slots", post(edit_slots))
        .route("/diagrams/:instance/groups", post(edit_groups))
        .route("/map/markers", get(list_markers))
        .route("/map/markers/:id/select", post(select_machine))
        .route("/map/machines/:id", put(attach_machine).delete(detach_machine))
        .route("/map/options", post(set_display_options))
        .route("/map/selection", get(get_selection))
        .route(
            "/virtual-sensors",
            get(list_virtual_sensors)
                .post(create_virtual_sensor)
                .put(update_virtual_sensor),
        )
        .route("/virtual-sensors/check", get(check_sensor_id))
        .route("/virtual-sensors/preview", post(preview_algorithm))
        .route("/virtual-sensors/edit-view", post(edit_view))
        .route("/virtual-sensors/:sensor_id", delete(delete_virtual_sensor))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = app_config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", app_config.server.bind))?;
    tracing::info!("Starting vessel-telemetry service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    hub_handle.shutdown();
    hub_task.await?;
    Ok(())
}
