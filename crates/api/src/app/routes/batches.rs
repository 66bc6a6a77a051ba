use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;

use dispensary_inventory::{BatchId, ReceiveBatch};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/batches", post(receive_batch))
        .route("/batches/:id/expire", post(expire_batch))
}

/// Inbound receipt; the only way a batch comes into existence.
pub async fn receive_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ReceiveBatchRequest>,
) -> Response {
    let cmd = ReceiveBatch {
        batch_id: BatchId::generate(),
        medication_id: body.medication_id,
        lot_number: body.lot_number,
        expiration_date: body.expiration_date,
        manufacturing_date: body.manufacturing_date,
        quantity: body.quantity,
        occurred_at: Utc::now(),
    };

    match services.blocking(move |engine| engine.inventory.receive_batch(cmd)).await {
        Ok(Ok(snapshot)) => (StatusCode::CREATED, Json(snapshot)).into_response(),
        Ok(Err(e)) => errors::inventory_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn expire_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Option<Json<dto::ExpireBatchRequest>>,
) -> Response {
    let batch_id: BatchId = match errors::parse_id(&id, "batch") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);

    match services
        .blocking(move |engine| engine.inventory.expire_batch(batch_id, reason, Utc::now()))
        .await
    {
        Ok(Ok(snapshot)) => Json(snapshot).into_response(),
        Ok(Err(e)) => errors::inventory_error_to_response(e),
        Err(resp) => resp,
    }
}
