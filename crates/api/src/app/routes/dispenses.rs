use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::{IntoResponse, Response},
    routing::get,
};

use dispensary_dispensing::DispenseId;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/dispenses/:id/reconciliation", get(reconcile))
}

/// Dispensed-vs-required statistics, computed against the current prescription.
pub async fn reconcile(Extension(services): Extension<Arc<AppServices>>, Path(id): Path<String>) -> Response {
    let dispense_id: DispenseId = match errors::parse_id(&id, "dispense") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .blocking(move |engine| engine.orchestrator.reconcile(dispense_id))
        .await
    {
        Ok(Ok(stats)) => Json(stats).into_response(),
        Ok(Err(e)) => errors::dispense_error_to_response(e),
        Err(resp) => resp,
    }
}
