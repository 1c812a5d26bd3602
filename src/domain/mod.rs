// Domain layer - Plain data types shared by every component
pub mod diagram;
pub mod errors;
pub mod marker;
pub mod reading;
pub mod render;
pub mod topic;
pub mod virtual_sensor;
