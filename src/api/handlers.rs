//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.
//!
//! Cache calls do blocking file I/O, so each one runs on tokio's blocking
//! pool rather than on the async workers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::cache::FileSystemCache;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    AddResponse, ClearResponse, DeleteResponse, GetResponse, HasResponse, HealthResponse,
    SetRequest, SetResponse, StatsResponse,
};

/// Application state shared across all handlers.
///
/// The cache needs no lock: every operation takes `&self`, and other
/// processes may be using the same directory anyway.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<FileSystemCache>,
}

impl AppState {
    /// Creates a new AppState around an opened cache.
    pub fn new(cache: FileSystemCache) -> Self {
        Self {
            cache: Arc::new(cache),
        }
    }

    /// Opens the cache described by the configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = FileSystemCache::new(config.cache.clone())?;
        Ok(Self::new(cache))
    }

    /// Runs `op` against the cache on the blocking thread pool.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&FileSystemCache) -> T + Send + 'static,
        T: Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || op(&cache))
            .await
            .map_err(|e| CacheError::Internal(format!("cache task failed: {}", e)))
    }
}

/// Handler for PUT /set
///
/// Stores a key-value pair in the cache with optional TTL.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let SetRequest { key, value, ttl } = req;
    let stored = {
        let key = key.clone();
        state.run(move |cache| cache.set(&key, &value, ttl)).await?
    };
    if !stored {
        return Err(CacheError::Internal(format!("Failed to store key '{}'", key)));
    }

    Ok(Json(SetResponse::new(key)))
}

/// Handler for POST /add
///
/// Stores a key-value pair only if the key has no live value.
pub async fn add_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<AddResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let SetRequest { key, value, ttl } = req;
    let added = {
        let key = key.clone();
        state.run(move |cache| cache.add(&key, &value, ttl)).await?
    };

    Ok(Json(AddResponse::new(key, added)))
}

/// Handler for GET /get/:key
///
/// Retrieves a value from the cache by key.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let value = {
        let key = key.clone();
        state.run(move |cache| cache.get::<Value>(&key)).await?
    };

    match value {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for GET /has/:key
pub async fn has_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<HasResponse>> {
    let exists = {
        let key = key.clone();
        state.run(move |cache| cache.has(&key)).await?
    };

    Ok(Json(HasResponse::new(key, exists)))
}

/// Handler for DELETE /del/:key
///
/// Deletes a key from the cache.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let removed = {
        let key = key.clone();
        state.run(move |cache| cache.delete(&key)).await?
    };

    if !removed {
        return Err(CacheError::NotFound(key));
    }
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    if !state.run(|cache| cache.clear()).await? {
        return Err(CacheError::Internal(
            "Failed to clear every entry".to_string(),
        ));
    }
    Ok(Json(ClearResponse::cleared()))
}

/// Handler for GET /stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let response = state
        .run(|cache| StatsResponse::new(&cache.stats(), cache.threshold()))
        .await?;
    Ok(Json(response))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
