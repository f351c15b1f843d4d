// Core library of the SQL exporter: configuration, database handles, value
// sink and the job scheduling engine

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod errors;
pub mod exposition;
pub mod models;
pub mod scheduler;
pub mod sink;
pub mod telemetry;
