//! Stock read and catalog intake endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::Sku;
use inventory::{CatalogEvent, InventoryError, InventoryRecord};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub quantity_on_hand: i64,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub sku: Sku,
    pub quantity_available: i64,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub sku: Sku,
    pub quantity_on_hand: i64,
    pub quantity_reserved: i64,
    pub quantity_available: i64,
    pub version: i64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<InventoryRecord> for RecordResponse {
    fn from(record: InventoryRecord) -> Self {
        Self {
            quantity_available: record.quantity_available(),
            version: record.version.as_i64(),
            sku: record.sku,
            quantity_on_hand: record.quantity_on_hand,
            quantity_reserved: record.quantity_reserved,
            updated_at: record.updated_at,
        }
    }
}

/// `GET /inventory/{sku}/availability`
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<Sku>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let quantity_available = state.reservations.get_availability(&sku).await?;
    Ok(Json(AvailabilityResponse {
        sku,
        quantity_available,
    }))
}

/// `GET /inventory/{sku}`
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<Sku>,
) -> Result<Json<RecordResponse>, ApiError> {
    let record = state.reservations.get_record(&sku).await?;
    Ok(Json(record.into()))
}

/// `PUT /inventory/{sku}`: registers the SKU, or adjusts its on-hand stock.
pub async fn put(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<Sku>,
    Json(req): Json<SetStockRequest>,
) -> Result<(StatusCode, Json<RecordResponse>), ApiError> {
    let (status, event) = match state.reservations.get_record(&sku).await {
        Ok(_) => (
            StatusCode::OK,
            CatalogEvent::StockAdjusted {
                sku,
                quantity_on_hand: req.quantity_on_hand,
            },
        ),
        Err(InventoryError::UnknownSku(_)) => (
            StatusCode::CREATED,
            CatalogEvent::SkuRegistered {
                sku,
                quantity_on_hand: req.quantity_on_hand,
            },
        ),
        Err(err) => return Err(err.into()),
    };

    let record = state.reservations.apply_catalog_event(event).await?;
    Ok((status, Json(record.into())))
}
