// Infrastructure layer - External dependencies and adapters
pub mod channel_sink;
pub mod config;
pub mod marker_board;
pub mod render_board;
pub mod rest_repository;
