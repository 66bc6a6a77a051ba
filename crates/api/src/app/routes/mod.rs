use axum::Router;

pub mod batches;
pub mod dispenses;
pub mod medications;
pub mod prescriptions;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .merge(batches::router())
        .merge(medications::router())
        .merge(prescriptions::router())
        .merge(dispenses::router())
}
