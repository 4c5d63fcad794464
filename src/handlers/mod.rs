// src/handlers/mod.rs
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::services::dispatch_service::DispatchOutcome;

pub mod admin_handler;
pub mod driver_handler;
pub mod extract;
pub mod passenger_handler;
pub mod rating_handler;
pub mod route_handler;

/// Body of every mutation response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub warnings: Vec<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            data,
            warnings: Vec::new(),
        })
    }
}

impl<T> From<DispatchOutcome<T>> for ApiResponse<T> {
    fn from(outcome: DispatchOutcome<T>) -> Self {
        Self {
            data: outcome.data,
            warnings: outcome.warnings,
        }
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
