// Public API - the runner and HTTP server plus the building blocks they
// are assembled from (descriptors, the batch loader, reports)
pub mod api;
pub mod config;
pub mod db;
pub mod io;
pub mod loader;
pub mod reports;
pub mod runner;
pub mod schema;
pub mod telemetry;
