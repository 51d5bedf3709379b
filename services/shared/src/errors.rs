/// Shared error types for the wagering services
///
/// Design Philosophy:
/// - Standardized error codes so calling surfaces can choose retry vs. display
/// - Categorized by fault class (Validation, Funds, State, Integrity, Unavailable)
/// - Implements both Display and std::error::Error for compatibility
/// - Includes context fields for debugging (error_code, message, context)
///
/// Usage:
/// - Engine and driver errors are converted into ServiceError at the edge
/// - Error codes are stable strings: BET_LIMIT, GAME_ENDED, ...
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fault classes that map to HTTP status codes and logging severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Rejected before any balance effect; safe to retry after correcting input
    Validation,

    /// Rejected atomically by the ledger; no partial debit
    Funds,

    /// The requested transition is no longer legal (already resolved)
    State,

    /// Lock or transaction conflict that survived internal retries
    Integrity,

    /// Storage or another dependency is down; new bets are refused
    Unavailable,

    /// Missing or malformed caller identity
    Unauthorized,

    /// Unexpected failures, programming errors
    Internal,
}

impl ErrorCategory {
    /// Map error category to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCategory::Validation => 400,
            ErrorCategory::Funds => 400,
            ErrorCategory::State => 409,
            ErrorCategory::Integrity => 503,
            ErrorCategory::Unavailable => 503,
            ErrorCategory::Unauthorized => 401,
            ErrorCategory::Internal => 500,
        }
    }

    /// Map error category to log level
    pub fn log_level(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "warn",
            ErrorCategory::Funds => "info",
            ErrorCategory::State => "info",
            ErrorCategory::Integrity => "warn",
            ErrorCategory::Unavailable => "error",
            ErrorCategory::Unauthorized => "warn",
            ErrorCategory::Internal => "error",
        }
    }

    /// Whether repeating the identical request later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCategory::Integrity | ErrorCategory::Unavailable)
    }
}

/// Standard error codes used across all services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode(pub &'static str);

impl ErrorCode {
    // Validation faults
    pub const BET_LIMIT: ErrorCode = ErrorCode("BET_LIMIT");
    pub const RATE_LIMITED: ErrorCode = ErrorCode("RATE_LIMITED");
    pub const GAME_DISABLED: ErrorCode = ErrorCode("GAME_DISABLED");
    pub const INVALID_REQUEST: ErrorCode = ErrorCode("INVALID_REQUEST");

    // Funds faults
    pub const INSUFFICIENT_FUNDS: ErrorCode = ErrorCode("INSUFFICIENT_FUNDS");

    // State faults
    pub const GAME_NOT_FOUND: ErrorCode = ErrorCode("GAME_NOT_FOUND");
    pub const GAME_ENDED: ErrorCode = ErrorCode("GAME_ENDED");
    pub const ALREADY_CASHED: ErrorCode = ErrorCode("ALREADY_CASHED");
    pub const ROUND_NOT_OPEN: ErrorCode = ErrorCode("ROUND_NOT_OPEN");
    pub const REVEAL_BEFORE_RESOLUTION: ErrorCode = ErrorCode("REVEAL_BEFORE_RESOLUTION");

    // Integrity faults
    pub const TRANSIENT: ErrorCode = ErrorCode("TRANSIENT");

    // Unavailable
    pub const STORAGE_UNAVAILABLE: ErrorCode = ErrorCode("STORAGE_UNAVAILABLE");
    pub const ROUND_STALLED: ErrorCode = ErrorCode("ROUND_STALLED");

    // Identity
    pub const MISSING_USER: ErrorCode = ErrorCode("MISSING_USER");
    pub const ADMIN_REQUIRED: ErrorCode = ErrorCode("ADMIN_REQUIRED");

    // Internal errors
    pub const INTERNAL_UNEXPECTED: ErrorCode = ErrorCode("INTERNAL_UNEXPECTED");
    pub const INTERNAL_SERIALIZATION: ErrorCode = ErrorCode("INTERNAL_SERIALIZATION");

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Standardized error structure used across all services
///
/// This provides consistent error reporting with:
/// - Structured error codes for programmatic handling
/// - Human-readable messages
/// - Optional context for debugging
/// - Category-based classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceError {
    /// Error category (determines status code and log level)
    pub category: ErrorCategory,

    /// Structured error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context (e.g., the final state of a settled bet)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ServiceError {
    /// Create a new ServiceError
    pub fn new(category: ErrorCategory, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.as_str().to_string(),
            message: message.into(),
            context: None,
        }
    }

    /// Add context to an error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// HTTP status, with a few codes refined beyond their category
    pub fn status_code(&self) -> u16 {
        match self.code.as_str() {
            "RATE_LIMITED" => 429,
            "GAME_NOT_FOUND" => 404,
            _ => self.category.status_code(),
        }
    }

    pub fn bet_limit(stake: impl fmt::Display, min: impl fmt::Display, max: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Validation,
            ErrorCode::BET_LIMIT,
            format!("Stake {} outside limits", stake),
        )
        .with_context(format!("min: {}, max: {}", min, max))
    }

    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::new(
            ErrorCategory::Validation,
            ErrorCode::RATE_LIMITED,
            "Too many wagers",
        )
        .with_context(format!("retry_after_ms: {}", retry_after_ms))
    }

    pub fn insufficient_funds(required: impl fmt::Display, available: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Funds,
            ErrorCode::INSUFFICIENT_FUNDS,
            "Insufficient funds",
        )
        .with_context(format!("required: {}, available: {}", required, available))
    }

    pub fn game_not_found(target: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::State,
            ErrorCode::GAME_NOT_FOUND,
            format!("Game not found: {}", target),
        )
    }

    pub fn game_ended(target: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::State,
            ErrorCode::GAME_ENDED,
            format!("Game already ended: {}", target),
        )
    }

    pub fn already_cashed(target: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::State,
            ErrorCode::ALREADY_CASHED,
            format!("Already cashed out: {}", target),
        )
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Integrity, ErrorCode::TRANSIENT, message)
    }

    pub fn storage_unavailable(error: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Unavailable,
            ErrorCode::STORAGE_UNAVAILABLE,
            "Storage unavailable",
        )
        .with_context(error.to_string())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Internal,
            ErrorCode::INTERNAL_UNEXPECTED,
            message,
        )
    }

    pub fn serialization_error(error: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Internal,
            ErrorCode::INTERNAL_SERIALIZATION,
            "Serialization error",
        )
        .with_context(error.to_string())
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "[{}] {}: {}", self.code, self.message, context)
        } else {
            write!(f, "[{}] {}", self.code, self.message)
        }
    }
}

impl std::error::Error for ServiceError {}

// Convenience type alias
pub type Result<T> = std::result::Result<T, ServiceError>;
