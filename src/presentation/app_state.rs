// Application state for HTTP handlers
use crate::application::diagram_service::DiagramService;
use crate::application::hub::HubHandle;
use crate::application::map_service::MapService;
use crate::application::virtual_sensor_service::VirtualSensorService;
use crate::infrastructure::marker_board::MarkerBoard;
use crate::infrastructure::render_board::RenderBoard;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub diagram_service: DiagramService,
    pub map_service: MapService,
    pub virtual_sensor_service: VirtualSensorService,
    pub render_board: Arc<RenderBoard>,
    pub marker_board: Arc<MarkerBoard>,
}
