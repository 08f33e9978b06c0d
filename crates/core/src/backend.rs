//! Backend client abstraction and routing pool.

use crate::query::{BackendQuery, Priority, ResultSet, Route};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend '{endpoint}' timed out after {seconds}s")]
    Timeout { endpoint: String, seconds: u64 },

    #[error("backend '{endpoint}' failed: {message}")]
    Execution { endpoint: String, message: String },

    #[error("backend '{endpoint}' is unavailable")]
    Unavailable { endpoint: String },
}

impl BackendError {
    pub fn endpoint(&self) -> &str {
        match self {
            BackendError::Timeout { endpoint, .. }
            | BackendError::Execution { endpoint, .. }
            | BackendError::Unavailable { endpoint } => endpoint,
        }
    }
}

/// A connection to one query-serving backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, query: &BackendQuery) -> Result<ResultSet, BackendError>;
}

/// The set of backend clients a gateway dispatches to.
///
/// `default` always exists; the low-priority and SQL pools are optional
/// and fall back to `default` when absent.
pub struct BackendPool {
    default: Arc<dyn BackendClient>,
    low_priority: Option<Arc<dyn BackendClient>>,
    sql: Option<Arc<dyn BackendClient>>,
}

impl BackendPool {
    pub fn new(default: Arc<dyn BackendClient>) -> Self {
        Self {
            default,
            low_priority: None,
            sql: None,
        }
    }

    pub fn with_low_priority(mut self, client: Arc<dyn BackendClient>) -> Self {
        self.low_priority = Some(client);
        self
    }

    pub fn with_sql(mut self, client: Arc<dyn BackendClient>) -> Self {
        self.sql = Some(client);
        self
    }

    /// Pick the client for a resolved route and priority. A missing pool
    /// falls back to the default with a warning rather than failing.
    pub fn select(&self, route: Route, priority: Priority) -> Arc<dyn BackendClient> {
        match route {
            Route::Sql => match &self.sql {
                Some(client) => client.clone(),
                None => {
                    warn!(target: "chain", "no sql backend configured, using default");
                    self.default.clone()
                }
            },
            Route::Native => match (priority, &self.low_priority) {
                (Priority::Low, Some(client)) => client.clone(),
                (Priority::Low, None) => {
                    warn!(
                        target: "chain",
                        "no low-priority backend configured, using default"
                    );
                    self.default.clone()
                }
                (Priority::Normal, _) => self.default.clone(),
            },
        }
    }
}
