use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;

use dispensary_core::Clock;
use dispensary_infra::{InMemoryEngine, RetryPolicy};

use crate::app::errors;

/// Engine shared by every handler.
pub struct AppServices {
    engine: InMemoryEngine,
}

impl AppServices {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            engine: InMemoryEngine::new(retry),
        }
    }

    pub fn with_clock(retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine: InMemoryEngine::with_clock(retry, clock),
        }
    }

    pub fn engine(&self) -> &InMemoryEngine {
        &self.engine
    }

    /// Run engine work off the async executor; reservation retries sleep.
    pub async fn blocking<T, F>(self: &Arc<Self>, work: F) -> Result<T, Response>
    where
        T: Send + 'static,
        F: FnOnce(&InMemoryEngine) -> T + Send + 'static,
    {
        let services = Arc::clone(self);
        tokio::task::spawn_blocking(move || work(&services.engine))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "engine task failed");
                errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "engine task failed")
            })
    }
}
