pub mod quality;
pub mod telemetry;
