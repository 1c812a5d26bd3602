// Application layer - Use cases and the live telemetry hub
pub mod diagram_reconciler;
pub mod diagram_service;
pub mod hub;
pub mod map_events;
pub mod map_service;
pub mod marker_manager;
pub mod ports;
pub mod reading_normalizer;
pub mod slot_binding_store;
pub mod template_codec;
pub mod timers;
pub mod topic_registry;
pub mod virtual_sensor_service;
