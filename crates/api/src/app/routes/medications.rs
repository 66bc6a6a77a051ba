use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::{IntoResponse, Response},
    routing::get,
};

use dispensary_core::MedicationId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/medications/:id/batches", get(list_available_batches))
}

/// Dispensable batches for a medication as of today, FEFO ordered.
pub async fn list_available_batches(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let medication_id: MedicationId = match errors::parse_id(&id, "medication") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let listed = services
        .blocking(move |engine| engine.orchestrator.available_batches(medication_id))
        .await;
    match listed {
        Ok(Ok(batches)) => Json(dto::BatchListResponse {
            medication_id,
            total_available: batches.total_available(),
            batches: batches.into_vec(),
        })
        .into_response(),
        Ok(Err(e)) => errors::dispense_error_to_response(e),
        Err(resp) => resp,
    }
}
