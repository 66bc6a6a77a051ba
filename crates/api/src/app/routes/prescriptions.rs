use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{post, put},
};
use tracing::info;

use dispensary_dispensing::PrescriptionId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/prescriptions/:id", put(upsert_prescription))
        .route("/prescriptions/:id/proposal", post(propose_allocation))
        .route("/prescriptions/:id/dispenses", post(confirm_dispense).get(list_dispenses))
        .route("/prescriptions/:id/cancellation", post(cancel_dispense))
}

fn parse_prescription_id(raw: &str) -> Result<PrescriptionId, Response> {
    errors::parse_id(raw, "prescription")
}

/// Mirror the current version of a prescription from the prescription system.
pub async fn upsert_prescription(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpsertPrescriptionRequest>,
) -> Response {
    let prescription_id = match parse_prescription_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let prescription = match body.into_prescription(prescription_id) {
        Ok(p) => p,
        Err(e) => return errors::validation_error(e),
    };

    let stored = prescription.clone();
    match services.blocking(move |engine| engine.prescriptions.upsert(stored)).await {
        Ok(Ok(())) => Json(prescription).into_response(),
        Ok(Err(e)) => errors::dispense_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn propose_allocation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let prescription_id = match parse_prescription_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .blocking(move |engine| engine.orchestrator.propose(prescription_id))
        .await
    {
        Ok(Ok(draft)) => Json(dto::ProposalResponse::new(prescription_id, draft)).into_response(),
        Ok(Err(e)) => errors::dispense_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn confirm_dispense(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ConfirmDispenseRequest>,
) -> Response {
    let prescription_id = match parse_prescription_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let confirmed = services
        .blocking(move |engine| {
            engine
                .orchestrator
                .confirm(prescription_id, body.mode, body.lines, body.notes, body.performed_by)
        })
        .await;
    match confirmed {
        Ok(Ok(record)) => {
            info!(dispense_id = %record.id_typed(), mode = %record.mode(), "dispense confirmed");
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Ok(Err(e)) => errors::dispense_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn cancel_dispense(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelDispenseRequest>,
) -> Response {
    let prescription_id = match parse_prescription_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cancelled = services
        .blocking(move |engine| {
            engine
                .orchestrator
                .cancel(prescription_id, &body.reason, body.notes, body.performed_by)
        })
        .await;
    match cancelled {
        Ok(Ok(record)) => (StatusCode::CREATED, Json(record)).into_response(),
        Ok(Err(e)) => errors::dispense_error_to_response(e),
        Err(resp) => resp,
    }
}

/// Every dispense recorded for the prescription, oldest first.
pub async fn list_dispenses(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let prescription_id = match parse_prescription_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .blocking(move |engine| engine.orchestrator.history(prescription_id))
        .await
    {
        Ok(Ok(records)) => Json(records).into_response(),
        Ok(Err(e)) => errors::dispense_error_to_response(e),
        Err(resp) => resp,
    }
}
