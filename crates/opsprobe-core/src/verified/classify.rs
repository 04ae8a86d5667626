//! Pure retriable/permanent classification of cloud and backend failures.
//!
//! The provisioning CLI only reports failures as text, so most rules are
//! substring matches. Backend APIs report a status code, mapped to
//! [`RpcCode`] by the client before classification. Anything not recognised
//! is permanent.

/// Outcome of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt after backoff.
    Retriable,
    /// Retrying cannot help; surface immediately.
    Permanent,
}

impl ErrorClass {
    pub fn is_retriable(self) -> bool {
        matches!(self, ErrorClass::Retriable)
    }

    fn from_bool(retriable: bool) -> Self {
        if retriable { ErrorClass::Retriable } else { ErrorClass::Permanent }
    }
}

/// Canonical status codes reported by Google-style APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    Cancelled,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    Unimplemented,
    Internal,
    Unavailable,
    Unauthenticated,
    Unknown,
}

impl RpcCode {
    /// Map the `error.status` string of a JSON error body.
    pub fn from_status(status: &str) -> Option<Self> {
        let code = match status {
            "CANCELLED" => RpcCode::Cancelled,
            "INVALID_ARGUMENT" => RpcCode::InvalidArgument,
            "DEADLINE_EXCEEDED" => RpcCode::DeadlineExceeded,
            "NOT_FOUND" => RpcCode::NotFound,
            "ALREADY_EXISTS" => RpcCode::AlreadyExists,
            "PERMISSION_DENIED" => RpcCode::PermissionDenied,
            "RESOURCE_EXHAUSTED" => RpcCode::ResourceExhausted,
            "FAILED_PRECONDITION" => RpcCode::FailedPrecondition,
            "ABORTED" => RpcCode::Aborted,
            "UNIMPLEMENTED" => RpcCode::Unimplemented,
            "INTERNAL" => RpcCode::Internal,
            "UNAVAILABLE" => RpcCode::Unavailable,
            "UNAUTHENTICATED" => RpcCode::Unauthenticated,
            "UNKNOWN" => RpcCode::Unknown,
            _ => return None,
        };
        Some(code)
    }

    /// Fallback mapping from an HTTP status when the body carries no status.
    pub fn from_http(status: u16) -> Self {
        match status {
            400 => RpcCode::InvalidArgument,
            401 => RpcCode::Unauthenticated,
            403 => RpcCode::PermissionDenied,
            404 => RpcCode::NotFound,
            409 => RpcCode::Aborted,
            429 => RpcCode::ResourceExhausted,
            499 => RpcCode::Cancelled,
            500 => RpcCode::Internal,
            501 => RpcCode::Unimplemented,
            503 => RpcCode::Unavailable,
            504 => RpcCode::DeadlineExceeded,
            _ => RpcCode::Unknown,
        }
    }
}

/// Quota failures are reported with this word in every API.
pub const QUOTA: &str = "Quota";
pub const INTERNAL_ERROR: &str = "Internal error";
pub const CURRENTLY_UNAVAILABLE: &str = "currently unavailable";
pub const DATABASE_LOCKED: &str = "database is locked";
pub const MIG_NOT_STABLE: &str = "Timeout while waiting for group to become stable.";
pub const SERVER_ERROR_PREFIX: &str = "Error 50";
pub const NOT_FOUND: &str = "not found";
pub const INTERNAL_ERROR_ENCOUNTERED: &str = "Internal error encountered";

/// Transient messages from `gcloud compute instances create`.
pub fn classify_provisioning_message(message: &str) -> ErrorClass {
    ErrorClass::from_bool(
        message.contains(QUOTA)
            || message.contains(INTERNAL_ERROR)
            || message.contains(CURRENTLY_UNAVAILABLE)
            || message.contains(DATABASE_LOCKED),
    )
}

/// Managed instance groups add a stabilization timeout to the provisioning rules.
pub fn classify_mig_provisioning_message(message: &str) -> ErrorClass {
    if message.contains(MIG_NOT_STABLE) {
        return ErrorClass::Retriable;
    }
    classify_provisioning_message(message)
}

/// Deletion retries quota and 5xx server errors.
pub fn classify_deletion_message(message: &str) -> ErrorClass {
    ErrorClass::from_bool(message.contains(QUOTA) || message.contains(SERVER_ERROR_PREFIX))
}

/// A "not found" answer means a previous attempt already deleted the
/// resource, but only when there was a previous attempt.
pub fn is_already_deleted(message: &str, attempt: u32) -> bool {
    attempt > 1 && message.contains(NOT_FOUND)
}

/// Starting a stopped instance only retries quota.
pub fn classify_start_message(message: &str) -> ErrorClass {
    ErrorClass::from_bool(message.contains(QUOTA))
}

/// Metric and trace lookups retry eventual-consistency and capacity codes.
pub fn classify_lookup_code(code: RpcCode) -> ErrorClass {
    ErrorClass::from_bool(matches!(
        code,
        RpcCode::NotFound | RpcCode::Internal | RpcCode::ResourceExhausted
    ))
}

/// Log queries retry internal errors and quota.
pub fn classify_log_query_message(message: &str) -> ErrorClass {
    ErrorClass::from_bool(message.contains(INTERNAL_ERROR_ENCOUNTERED) || message.contains(QUOTA))
}

/// Absence checks on logs only retry internal errors.
pub fn classify_log_missing_message(message: &str) -> ErrorClass {
    ErrorClass::from_bool(message.contains(INTERNAL_ERROR_ENCOUNTERED))
}
