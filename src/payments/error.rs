use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, ExternalError, SecurityError};

        match err {
            PaymentError::WebhookVerificationError { .. } => {
                AppError::security(SecurityError::InvalidWebhookSignature)
            }
            other => AppError::external(ExternalError::PaymentGateway {
                provider: "flutterwave".to_string(),
                message: other.to_string(),
                is_retryable: other.is_retryable(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn webhook_failure_becomes_unauthorized() {
        let app: AppError = PaymentError::WebhookVerificationError {
            message: "bad hash".to_string(),
        }
        .into();
        assert_eq!(app.status_code(), 401);
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::ProviderError {
            provider: "flutterwave".to_string(),
            message: "no transaction was found".to_string(),
            provider_code: Some("400".to_string()),
            retryable: false,
        }
        .is_retryable());
    }
}
