use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following MERIDIAN-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Client request errors (malformed sorts, counts, intervals)
/// - **2000-2999**: Admission/weight rejections
/// - **3000-3999**: Cache and store errors
/// - **4000-4999**: Backend execution errors
/// - **5000-5999**: Internal/job errors
///
/// Codes are stable across versions (semver contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Client Request Errors (1000-1999) ===
    /// MERIDIAN-1001: Logical table not found in the registry
    TableNotFound = 1001,
    /// MERIDIAN-1002: Requested interval is empty or inverted
    InvalidInterval = 1002,
    /// MERIDIAN-1003: Pagination count is zero or out of range
    InvalidPagination = 1003,
    /// MERIDIAN-1004: Top-N requested without a sort specification
    TopNWithoutSort = 1004,
    /// MERIDIAN-1005: Requested column is not declared by the table
    UnknownColumn = 1005,
    /// MERIDIAN-1006: Malformed filter or sort specification
    MalformedRequest = 1006,

    // === Admission Errors (2000-2999) ===
    /// MERIDIAN-2001: Estimated query weight exceeds the configured threshold
    WeightExceeded = 2001,
    /// MERIDIAN-2002: Query cancelled by the client
    QueryCancelled = 2002,

    // === Cache/Store Errors (3000-3999) ===
    /// MERIDIAN-3001: Notification channel publish after close
    ChannelClosed = 3001,
    /// MERIDIAN-3002: Result store save failed
    StoreSaveFailed = 3002,

    // === Backend Errors (4000-4999) ===
    /// MERIDIAN-4001: Backend execution failed
    BackendFailed = 4001,
    /// MERIDIAN-4002: Backend request timed out
    BackendTimeout = 4002,
    /// MERIDIAN-4003: No backend is registered for the routed dialect
    BackendUnavailable = 4003,

    // === Internal/Job Errors (5000-5999) ===
    /// MERIDIAN-5001: Required job field missing while building client payload
    JobFieldMissing = 5001,
    /// MERIDIAN-5002: Serialization/deserialization failed
    SerializationFailed = 5002,
    /// MERIDIAN-5003: Unexpected internal state
    InternalPanic = 5003,
    /// MERIDIAN-5004: Ticket not found in the job store
    TicketNotFound = 5004,

    /// MERIDIAN-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "MERIDIAN-2001")
    pub fn as_str(&self) -> String {
        format!("MERIDIAN-{:04}", self.as_u16())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            1000..=1999 => ErrorCategory::ClientRequest,
            2000..=2999 => ErrorCategory::Admission,
            3000..=3999 => ErrorCategory::Store,
            4000..=4999 => ErrorCategory::Backend,
            5000..=5999 => ErrorCategory::Internal,
            _ => ErrorCategory::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        // Parse "MERIDIAN-XXXX" format
        let num: u16 = s
            .strip_prefix("MERIDIAN-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| "Invalid format".to_string())?;
        Self::try_from(num).map_err(|_| "Unknown code".to_string())
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            1001 => Ok(Self::TableNotFound),
            1002 => Ok(Self::InvalidInterval),
            1003 => Ok(Self::InvalidPagination),
            1004 => Ok(Self::TopNWithoutSort),
            1005 => Ok(Self::UnknownColumn),
            1006 => Ok(Self::MalformedRequest),
            2001 => Ok(Self::WeightExceeded),
            2002 => Ok(Self::QueryCancelled),
            3001 => Ok(Self::ChannelClosed),
            3002 => Ok(Self::StoreSaveFailed),
            4001 => Ok(Self::BackendFailed),
            4002 => Ok(Self::BackendTimeout),
            4003 => Ok(Self::BackendUnavailable),
            5001 => Ok(Self::JobFieldMissing),
            5002 => Ok(Self::SerializationFailed),
            5003 => Ok(Self::InternalPanic),
            5004 => Ok(Self::TicketNotFound),
            9999 => Ok(Self::Unknown),
            _ => Err(format!("Unknown error code: {}", n)),
        }
    }
}

/// High-level error category for HTTP-class response mapping.
///
/// `ClientRequest` and `Admission` map to 4xx-equivalent rejections;
/// `Backend`, `Store` and `Internal` to 5xx-equivalent failures. Partial
/// data is deliberately absent: it is a degraded success, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCategory {
    ClientRequest,
    Admission,
    Store,
    Backend,
    Internal,
}

impl ErrorCategory {
    /// Whether the error is the caller's fault (4xx-equivalent).
    pub fn is_client_fault(&self) -> bool {
        matches!(self, ErrorCategory::ClientRequest | ErrorCategory::Admission)
    }
}
