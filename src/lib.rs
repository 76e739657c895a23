pub mod chart;
pub mod config;
pub mod dashboard;
pub mod models;
pub mod monitor;
pub mod probe;
pub mod readme;
pub mod report;
pub mod store;
pub mod version;
