//! # Error Contexts
//!
//! Structured metadata for errors to enable programmatic analysis.

use serde::{Deserialize, Serialize};

/// Structured context attached to a [`crate::MeridianError`].
///
/// Each variant provides the fields relevant to that error type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// Context for MERIDIAN-1001 (TableNotFound)
    TableNotFound {
        table: String,
        available_tables: Vec<String>,
    },

    /// Context for MERIDIAN-1005 (UnknownColumn)
    UnknownColumn {
        column: String,
        table: String,
        available_columns: Vec<String>,
    },

    /// Context for MERIDIAN-1003/1004 (pagination and top-N validation)
    Paging {
        page: Option<u64>,
        per_page: Option<u64>,
        top_n: Option<u64>,
    },

    /// Context for MERIDIAN-2001 (WeightExceeded)
    WeightExceeded {
        estimated_weight: u64,
        limit: u64,
        grouping_dimensions: Vec<String>,
    },

    /// Context for MERIDIAN-4001/4002 (backend failures)
    Backend {
        endpoint: String,
        data_source: String,
    },

    /// Context for MERIDIAN-5001 (JobFieldMissing)
    Job {
        ticket: Option<String>,
        missing_field: String,
    },

    /// Generic key-value context for extensibility
    Generic {
        #[serde(flatten)]
        data: std::collections::HashMap<String, serde_json::Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_context_serde_roundtrip() {
        let ctx = ErrorContext::WeightExceeded {
            estimated_weight: 500_000,
            limit: 100_000,
            grouping_dimensions: vec!["page".to_string(), "country".to_string()],
        };

        let json = serde_json::to_string(&ctx).unwrap();
        let de: ErrorContext = serde_json::from_str(&json).unwrap();

        match de {
            ErrorContext::WeightExceeded { estimated_weight, .. } => {
                assert_eq!(estimated_weight, 500_000);
            }
            _ => panic!("Wrong variant"),
        }
    }
}
