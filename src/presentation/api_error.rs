// HTTP error mapping
use crate::application::diagram_service::DiagramError;
use crate::application::hub::HubError;
use crate::domain::errors::{AlgorithmError, BindingError, VirtualSensorError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!("{} {}", self.status, self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<BindingError> for ApiError {
    fn from(error: BindingError) -> Self {
        let status = match error {
            BindingError::UnknownInstance(_)
            | BindingError::UnknownGroup(_)
            | BindingError::UnknownSlot { .. } => StatusCode::NOT_FOUND,
            BindingError::NotEditing | BindingError::FixedSlot { .. } => StatusCode::CONFLICT,
        };
        Self::new(status, error.to_string())
    }
}

impl From<HubError> for ApiError {
    fn from(error: HubError) -> Self {
        match error {
            HubError::Binding(binding) => binding.into(),
            HubError::Stopped => Self::new(StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
        }
    }
}

impl From<DiagramError> for ApiError {
    fn from(error: DiagramError) -> Self {
        match error {
            DiagramError::Hub(hub) => hub.into(),
            DiagramError::Persistence(_) => {
                Self::new(StatusCode::BAD_GATEWAY, format!("{:#}", anyhow::Error::from(error)))
            }
        }
    }
}

impl From<AlgorithmError> for ApiError {
    fn from(error: AlgorithmError) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, error.to_string())
    }
}

impl From<VirtualSensorError> for ApiError {
    fn from(error: VirtualSensorError) -> Self {
        match error {
            VirtualSensorError::Algorithm(algorithm) => algorithm.into(),
            VirtualSensorError::SensorIdConflict { .. } => {
                Self::new(StatusCode::CONFLICT, error.to_string())
            }
            VirtualSensorError::Transport(_) => {
                Self::new(StatusCode::BAD_GATEWAY, format!("{:#}", anyhow::Error::from(error)))
            }
        }
    }
}
