//! Unified error handling for the reconciliation engine
//!
//! Every failure that can reach an HTTP caller is expressed as an [`AppError`]
//! with an HTTP status, a machine-readable [`ErrorCode`], a user-facing
//! message and a retry hint. Fulfilment failures never travel this path: they
//! are written onto the transaction record itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "AGENT_NOT_FOUND")]
    AgentNotFound,
    #[serde(rename = "AGENT_INACTIVE")]
    AgentInactive,
    #[serde(rename = "INSUFFICIENT_BALANCE")]
    InsufficientBalance,
    #[serde(rename = "INSUFFICIENT_CASHBACK")]
    InsufficientCashback,
    #[serde(rename = "INVALID_PIN")]
    InvalidPin,
    #[serde(rename = "DUPLICATE_TRANSACTION")]
    DuplicateTransaction,
    #[serde(rename = "DUPLICATE_AGENT")]
    DuplicateAgent,
    #[serde(rename = "DELIVERY_NOT_RESETTABLE")]
    DeliveryNotResettable,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,
    #[serde(rename = "VENDING_PROVIDER_ERROR")]
    VendingProviderError,
    #[serde(rename = "CIRCUIT_OPEN")]
    CircuitOpen,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Security errors (401, 403, 429)
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "RATE_LIMITED")]
    RateLimited,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    TransactionNotFound { tx_ref: String },
    AgentNotFound { agent: String },
    /// Suspended agents cannot spend or redeem
    AgentInactive { agent_id: String },
    InsufficientBalance { available: String, required: String },
    InsufficientCashback { available: String, required: String },
    /// PIN did not match the stored hash
    InvalidPin,
    DuplicateTransaction { tx_ref: String },
    DuplicateAgent { phone: String },
    /// Only a failed delivery on a paid transaction can be reset
    DeliveryNotResettable { tx_ref: String, state: String },
}

/// Infrastructure-level errors (database, cache, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Cache { message: String },
    Configuration { message: String },
}

/// Upstream errors (payment gateway, vending provider)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentGateway {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    VendingProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// The vending circuit breaker rejected the call without touching the network
    CircuitOpen { service: String },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidPhone { phone: String, reason: String },
    UnknownPlan { plan_id: String },
    InvalidAmount { amount: String, reason: String },
    InvalidPinFormat,
    MissingField { field: String },
}

/// Authentication and abuse-prevention failures
#[derive(Debug, Clone)]
pub enum SecurityError {
    InvalidWebhookSignature,
    MissingAdminKey,
    InvalidAdminKey,
    RateLimited { action: String, retry_after_secs: u64 },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
    Security(SecurityError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn security(err: SecurityError) -> Self {
        Self::new(AppErrorKind::Security(err))
    }

    pub fn external(err: ExternalError) -> Self {
        Self::new(AppErrorKind::External(err))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::AgentNotFound { .. } => 404,
                DomainError::AgentInactive { .. } => 403,
                DomainError::InsufficientBalance { .. } => 422,
                DomainError::InsufficientCashback { .. } => 422,
                DomainError::InvalidPin => 401,
                DomainError::DuplicateTransaction { .. } => 409,
                DomainError::DuplicateAgent { .. } => 409,
                DomainError::DeliveryNotResettable { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => 502,
                ExternalError::VendingProvider { .. } => 502,
                ExternalError::CircuitOpen { .. } => 503,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::Security(err) => match err {
                SecurityError::InvalidWebhookSignature => 401,
                SecurityError::MissingAdminKey => 401,
                SecurityError::InvalidAdminKey => 403,
                SecurityError::RateLimited { .. } => 429,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::AgentNotFound { .. } => ErrorCode::AgentNotFound,
                DomainError::AgentInactive { .. } => ErrorCode::AgentInactive,
                DomainError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
                DomainError::InsufficientCashback { .. } => ErrorCode::InsufficientCashback,
                DomainError::InvalidPin => ErrorCode::InvalidPin,
                DomainError::DuplicateTransaction { .. } => ErrorCode::DuplicateTransaction,
                DomainError::DuplicateAgent { .. } => ErrorCode::DuplicateAgent,
                DomainError::DeliveryNotResettable { .. } => ErrorCode::DeliveryNotResettable,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::VendingProvider { .. } => ErrorCode::VendingProviderError,
                ExternalError::CircuitOpen { .. } => ErrorCode::CircuitOpen,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
            AppErrorKind::Security(err) => match err {
                SecurityError::InvalidWebhookSignature | SecurityError::MissingAdminKey => {
                    ErrorCode::Unauthorized
                }
                SecurityError::InvalidAdminKey => ErrorCode::Forbidden,
                SecurityError::RateLimited { .. } => ErrorCode::RateLimited,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { tx_ref } => {
                    format!("Transaction '{}' not found", tx_ref)
                }
                DomainError::AgentNotFound { agent } => format!("Agent '{}' not found", agent),
                DomainError::AgentInactive { .. } => {
                    "This agent account is suspended. Please contact support".to_string()
                }
                DomainError::InsufficientBalance {
                    available,
                    required,
                } => format!(
                    "Insufficient wallet balance. Available: {}, Required: {}",
                    available, required
                ),
                DomainError::InsufficientCashback {
                    available,
                    required,
                } => format!(
                    "Insufficient cashback balance. Available: {}, Requested: {}",
                    available, required
                ),
                DomainError::InvalidPin => "Incorrect PIN".to_string(),
                DomainError::DuplicateTransaction { tx_ref } => {
                    format!("Transaction '{}' already exists", tx_ref)
                }
                DomainError::DuplicateAgent { phone } => {
                    format!("An agent is already registered with phone {}", phone)
                }
                DomainError::DeliveryNotResettable { tx_ref, state } => format!(
                    "Delivery for '{}' cannot be reset from state '{}'",
                    tx_ref, state
                ),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment verification failed. Please contact support".to_string()
                    }
                }
                ExternalError::VendingProvider { is_retryable, .. } => {
                    if *is_retryable {
                        "Data delivery is temporarily unavailable. Please try again".to_string()
                    } else {
                        "Data delivery failed. Please contact support".to_string()
                    }
                }
                ExternalError::CircuitOpen { service } => format!(
                    "{} is temporarily unavailable. Please try again shortly",
                    service
                ),
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidPhone { phone, reason } => {
                    format!("Invalid phone number '{}': {}", phone, reason)
                }
                ValidationError::UnknownPlan { plan_id } => {
                    format!("Unknown data plan '{}'", plan_id)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidPinFormat => "PIN must be exactly 4 digits".to_string(),
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
            },
            AppErrorKind::Security(err) => match err {
                SecurityError::InvalidWebhookSignature => "Invalid signature".to_string(),
                SecurityError::MissingAdminKey => "Admin credentials required".to_string(),
                SecurityError::InvalidAdminKey => "Admin credentials rejected".to_string(),
                SecurityError::RateLimited {
                    action,
                    retry_after_secs,
                } => format!(
                    "Too many {} attempts. Please try again in {} seconds",
                    action, retry_after_secs
                ),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::VendingProvider { is_retryable, .. } => *is_retryable,
                ExternalError::CircuitOpen { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
            AppErrorKind::Security(err) => matches!(err, SecurityError::RateLimited { .. }),
        }
    }

    /// Seconds a client should wait before retrying, when known
    pub fn retry_after(&self) -> Option<u64> {
        match &self.kind {
            AppErrorKind::Security(SecurityError::RateLimited {
                retry_after_secs, ..
            }) => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Conversions from module errors live next to those errors
// (database/error.rs, payments/error.rs, vending/types.rs, services/*).

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_error() {
        let error = AppError::domain(DomainError::InsufficientBalance {
            available: "1000".to_string(),
            required: "1500".to_string(),
        });

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::InsufficientBalance);
        assert!(error.user_message().contains("Available: 1000"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_rate_limited_error_exposes_retry_after() {
        let error = AppError::security(SecurityError::RateLimited {
            action: "login".to_string(),
            retry_after_secs: 42,
        });

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimited);
        assert_eq!(error.retry_after(), Some(42));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_admin_key_errors() {
        assert_eq!(
            AppError::security(SecurityError::MissingAdminKey).status_code(),
            401
        );
        assert_eq!(
            AppError::security(SecurityError::InvalidAdminKey).status_code(),
            403
        );
    }

    #[test]
    fn test_circuit_open_is_retryable() {
        let error = AppError::external(ExternalError::CircuitOpen {
            service: "Vending provider".to_string(),
        });
        assert_eq!(error.status_code(), 503);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount must be positive".to_string(),
        });

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }
}
