//! Configuration constants for the loader and the API surface
//!
//! This module centralizes all tunable parameters and constants used
//! throughout the application, plus the environment-derived database
//! settings.

use std::time::Duration;

use anyhow::{Context, Result};

// ============================================================================
// Connection Pool Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub const MAX_POOL_CONNECTIONS: u32 = 10;

// ============================================================================
// Loader Configuration
// ============================================================================

/// Default number of records per transactional batch
///
/// Sized so a batch stays well under the destination's bind-parameter limit
/// for the widest historical table (five columns) while keeping round trips
/// low. A failed batch rolls back this many rows at most.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

// ============================================================================
// API Configuration
// ============================================================================

/// Upper bound on rows accepted by the direct batch-insert endpoint
///
/// Requests above this are rejected before any mapping or insertion happens,
/// keeping a single request's transaction bounded the same way the loader's
/// batches are.
pub const MAX_REQUEST_ROWS: usize = 1000;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

// ============================================================================
// Database Settings
// ============================================================================

/// Destination database settings, read from the process environment.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    /// Read `DB_HOST`, `DB_PORT` (default 5432), `DB_NAME`, `DB_USER` and
    /// `DB_PASSWORD` from the environment.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("DB_HOST").context("DB_HOST is not set")?;
        let port = std::env::var("DB_PORT")
            .unwrap_or_else(|_| "5432".to_string())
            .parse::<u16>()
            .context("DB_PORT must be a port number")?;
        let database = std::env::var("DB_NAME").context("DB_NAME is not set")?;
        let username = std::env::var("DB_USER").context("DB_USER is not set")?;
        let password = std::env::var("DB_PASSWORD").context("DB_PASSWORD is not set")?;

        Ok(Self {
            host,
            port,
            database,
            username,
            password,
        })
    }
}
