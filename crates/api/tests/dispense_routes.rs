use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::{Duration, NaiveDate, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use dispensary_api::app::{build_app, services::AppServices};
use dispensary_core::{MedicationId, UserId};
use dispensary_dispensing::PrescriptionId;
use dispensary_infra::RetryPolicy;

fn app() -> Router {
    build_app(Arc::new(AppServices::new(RetryPolicy::default())))
}

fn days_from_today(days: i64) -> NaiveDate {
    Utc::now().date_naive() + Duration::days(days)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn receive(app: &Router, medication_id: MedicationId, lot: &str, expires_in_days: i64, quantity: u64) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/batches",
        Some(json!({
            "medication_id": medication_id,
            "lot_number": lot,
            "expiration_date": days_from_today(expires_in_days),
            "manufacturing_date": days_from_today(-365),
            "quantity": quantity,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["batch_id"].as_str().unwrap().to_string()
}

/// Returns the prescription id and the generated line ids.
async fn prescribe(app: &Router, lines: &[(MedicationId, u64)]) -> (PrescriptionId, Vec<String>) {
    let id = PrescriptionId::generate();
    let lines: Vec<Value> = lines
        .iter()
        .map(|(m, q)| json!({ "medication_id": m, "required_quantity": q }))
        .collect();
    let (status, body) = send(
        app,
        Method::PUT,
        &format!("/prescriptions/{id}"),
        Some(json!({ "lines": lines })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let line_ids = body["lines"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["id"].as_str().unwrap().to_string())
        .collect();
    (id, line_ids)
}

#[tokio::test]
async fn health_is_ok() {
    let (status, _) = send(&app(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn propose_confirm_and_reconcile_a_complete_dispense() {
    let app = app();
    let medication_id = MedicationId::new();
    let late = receive(&app, medication_id, "Lot2", 180, 25).await;
    let early = receive(&app, medication_id, "Lot1", 30, 10).await;
    let (rx, _) = prescribe(&app, &[(medication_id, 30)]).await;

    let (status, listing) = send(&app, Method::GET, &format!("/medications/{medication_id}/batches"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total_available"], 35);
    assert_eq!(listing["batches"][0]["batch_id"], early.as_str());

    let (status, proposal) = send(&app, Method::POST, &format!("/prescriptions/{rx}/proposal"), None).await;
    assert_eq!(status, StatusCode::OK, "{proposal}");
    assert_eq!(proposal["quantity_allocated"], 30);
    assert_eq!(proposal["lines"][0]["batch_id"], early.as_str());
    assert_eq!(proposal["lines"][0]["allocated_quantity"], 10);
    assert_eq!(proposal["lines"][1]["batch_id"], late.as_str());
    assert_eq!(proposal["lines"][1]["allocated_quantity"], 20);

    let (status, record) = send(
        &app,
        Method::POST,
        &format!("/prescriptions/{rx}/dispenses"),
        Some(json!({
            "mode": "complete",
            "lines": proposal["lines"],
            "notes": "counter 2",
            "performed_by": UserId::new(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{record}");
    assert_eq!(record["mode"], "complete");

    let dispense_id = record["id"].as_str().unwrap();
    let (status, stats) = send(&app, Method::GET, &format!("/dispenses/{dispense_id}/reconciliation"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["quantity_dispensed"], 30);
    assert_eq!(stats["quantity_missing"], 0);
    assert_eq!(stats["completion_percentage"], 100);

    let (_, listing) = send(&app, Method::GET, &format!("/medications/{medication_id}/batches"), None).await;
    assert_eq!(listing["batches"].as_array().unwrap().len(), 1);
    assert_eq!(listing["batches"][0]["available_quantity"], 5);

    let (status, history) = send(&app, Method::GET, &format!("/prescriptions/{rx}/dispenses"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn proposal_without_enough_stock_is_a_conflict() {
    let app = app();
    let medication_id = MedicationId::new();
    receive(&app, medication_id, "Small", 30, 5).await;
    let (rx, _) = prescribe(&app, &[(medication_id, 30)]).await;

    let (status, body) = send(&app, Method::POST, &format!("/prescriptions/{rx}/proposal"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "insufficient_stock");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn short_complete_dispense_is_rejected_and_partial_is_accepted() {
    let app = app();
    let medication_id = MedicationId::new();
    let batch = receive(&app, medication_id, "L", 30, 10).await;
    let (rx, line_ids) = prescribe(&app, &[(medication_id, 30)]).await;
    let lines = json!([{
        "prescription_line_id": line_ids[0],
        "medication_id": medication_id,
        "batch_id": batch,
        "allocated_quantity": 10,
    }]);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/prescriptions/{rx}/dispenses"),
        Some(json!({ "mode": "complete", "lines": lines, "performed_by": UserId::new() })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "incomplete_allocation");

    let (status, record) = send(
        &app,
        Method::POST,
        &format!("/prescriptions/{rx}/dispenses"),
        Some(json!({ "mode": "partial", "lines": lines, "performed_by": UserId::new() })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{record}");

    let dispense_id = record["id"].as_str().unwrap();
    let (_, stats) = send(&app, Method::GET, &format!("/dispenses/{dispense_id}/reconciliation"), None).await;
    assert_eq!(stats["quantity_missing"], 20);
    assert_eq!(stats["completion_percentage"], 33);
}

#[tokio::test]
async fn completed_prescription_cannot_be_dispensed_or_cancelled_again() {
    let app = app();
    let medication_id = MedicationId::new();
    receive(&app, medication_id, "L", 30, 100).await;
    let (rx, _) = prescribe(&app, &[(medication_id, 30)]).await;
    let (_, proposal) = send(&app, Method::POST, &format!("/prescriptions/{rx}/proposal"), None).await;
    let confirm = json!({ "mode": "complete", "lines": proposal["lines"], "performed_by": UserId::new() });

    let (status, _) = send(&app, Method::POST, &format!("/prescriptions/{rx}/dispenses"), Some(confirm.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, Method::POST, &format!("/prescriptions/{rx}/dispenses"), Some(confirm)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_allocation");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/prescriptions/{rx}/cancellation"),
        Some(json!({ "reason": "duplicate", "performed_by": UserId::new() })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, history) = send(&app, Method::GET, &format!("/prescriptions/{rx}/dispenses"), None).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    let (_, listing) = send(&app, Method::GET, &format!("/medications/{medication_id}/batches"), None).await;
    assert_eq!(listing["total_available"], 70);
}

#[tokio::test]
async fn cancellation_requires_a_reason() {
    let app = app();
    let medication_id = MedicationId::new();
    let (rx, _) = prescribe(&app, &[(medication_id, 30)]).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/prescriptions/{rx}/cancellation"),
        Some(json!({ "reason": "   ", "performed_by": UserId::new() })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_allocation");

    let (status, record) = send(
        &app,
        Method::POST,
        &format!("/prescriptions/{rx}/cancellation"),
        Some(json!({ "reason": "sin stock", "notes": "patient informed", "performed_by": UserId::new() })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(record["mode"], "cancelled");

    let dispense_id = record["id"].as_str().unwrap();
    let (_, stats) = send(&app, Method::GET, &format!("/dispenses/{dispense_id}/reconciliation"), None).await;
    assert_eq!(stats["quantity_dispensed"], 0);
    assert_eq!(stats["quantity_missing"], 30);
    assert_eq!(stats["completion_percentage"], 0);
}

#[tokio::test]
async fn expired_batches_drop_out_of_the_listing() {
    let app = app();
    let medication_id = MedicationId::new();
    let recalled = receive(&app, medication_id, "Recalled", 30, 10).await;
    receive(&app, medication_id, "Good", 60, 10).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/batches/{recalled}/expire"),
        Some(json!({ "reason": "recall" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "expired");

    let (_, listing) = send(&app, Method::GET, &format!("/medications/{medication_id}/batches"), None).await;
    assert_eq!(listing["batches"].as_array().unwrap().len(), 1);
    assert_ne!(listing["batches"][0]["batch_id"], recalled.as_str());
}

#[tokio::test]
async fn bad_input_and_unknown_ids() {
    let app = app();

    let (status, body) = send(&app, Method::POST, "/prescriptions/not-a-uuid/proposal", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");

    let unknown = PrescriptionId::generate();
    let (status, body) = send(&app, Method::POST, &format!("/prescriptions/{unknown}/proposal"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let line_id = PrescriptionId::generate();
    let medication_id = MedicationId::new();
    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/prescriptions/{unknown}"),
        Some(json!({ "lines": [
            { "id": line_id, "medication_id": medication_id, "required_quantity": 1 },
            { "id": line_id, "medication_id": medication_id, "required_quantity": 2 },
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}
