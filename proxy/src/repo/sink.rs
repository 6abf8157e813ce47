pub mod base;
pub mod logger;
pub mod mqtt;
