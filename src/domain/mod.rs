pub mod haptics;
pub mod models;
pub mod settings;
