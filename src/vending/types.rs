use crate::error::{AppError, ExternalError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

/// Mobile networks the vendor can deliver to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Network {
    Mtn,
    Glo,
    #[serde(rename = "9MOBILE")]
    NineMobile,
    Airtel,
}

impl Network {
    /// Numeric network id in the vendor's API
    pub fn provider_id(&self) -> u8 {
        match self {
            Network::Mtn => 1,
            Network::Glo => 2,
            Network::NineMobile => 3,
            Network::Airtel => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mtn => "MTN",
            Network::Glo => "GLO",
            Network::NineMobile => "9MOBILE",
            Network::Airtel => "AIRTEL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "MTN" => Some(Network::Mtn),
            "GLO" => Some(Network::Glo),
            "9MOBILE" | "ETISALAT" => Some(Network::NineMobile),
            "AIRTEL" => Some(Network::Airtel),
            _ => None,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One delivery to perform, keyed by the transaction that paid for it
#[derive(Debug, Clone)]
pub struct VendRequest {
    pub tx_ref: String,
    pub network: Network,
    pub mobile_number: String,
    /// Vendor-side plan identifier
    pub plan: String,
    pub ported: bool,
}

impl VendRequest {
    /// Stable per transaction, so every retry carries the same key.
    pub fn idempotency_key(&self) -> String {
        idempotency_key(&self.tx_ref)
    }

    pub fn to_payload(&self) -> JsonValue {
        serde_json::json!({
            "network": self.network.provider_id(),
            "mobile_number": self.mobile_number,
            "plan": self.plan,
            "Ported_number": self.ported,
            "request_id": self.idempotency_key(),
        })
    }
}

pub fn idempotency_key(tx_ref: &str) -> String {
    let digest = hex::encode(Sha256::digest(tx_ref.as_bytes()));
    format!("vend_{}", &digest[..32])
}

#[derive(Debug, Clone, Serialize)]
pub struct VendResponse {
    /// A success marker was present
    pub success: bool,
    pub status_code: u16,
    pub payload: JsonValue,
}

#[derive(Debug, Clone, Error)]
pub enum VendError {
    #[error("vending request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("vending provider unreachable: {message}")]
    Connect { message: String },

    #[error("vending provider returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("vending provider rejected request with {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("circuit breaker for {service} is open")]
    CircuitOpen { service: String },

    #[error("vending client misconfigured: {message}")]
    Configuration { message: String },
}

impl VendError {
    /// Connect failures, timeouts and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VendError::Timeout { .. } | VendError::Connect { .. } | VendError::Server { .. }
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            VendError::Server { status, .. } | VendError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Compact form stored on the transaction's failure record
    pub fn to_failure_payload(&self) -> JsonValue {
        serde_json::json!({
            "error": self.to_string(),
            "transient": self.is_transient(),
            "status_code": self.status_code(),
        })
    }
}

impl From<VendError> for AppError {
    fn from(err: VendError) -> Self {
        match err {
            VendError::CircuitOpen { service } => {
                AppError::external(ExternalError::CircuitOpen { service })
            }
            VendError::Timeout { after } => AppError::external(ExternalError::Timeout {
                service: "Vending provider".to_string(),
                timeout_secs: after.as_secs(),
            }),
            VendError::Configuration { message } => AppError::configuration(message),
            other => AppError::external(ExternalError::VendingProvider {
                provider: "vending".to_string(),
                message: other.to_string(),
                is_retryable: other.is_transient(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> VendRequest {
        VendRequest {
            tx_ref: "SAUKI-COM-1".to_string(),
            network: Network::Mtn,
            mobile_number: "08031234567".to_string(),
            plan: "1001".to_string(),
            ported: false,
        }
    }

    #[test]
    fn idempotency_key_is_stable_and_prefixed() {
        let key = request().idempotency_key();
        assert!(key.starts_with("vend_"));
        assert_eq!(key.len(), 5 + 32);
        assert_eq!(key, idempotency_key("SAUKI-COM-1"));
        assert_ne!(key, idempotency_key("SAUKI-COM-2"));
    }

    #[test]
    fn payload_uses_vendor_field_names() {
        let payload = request().to_payload();
        assert_eq!(payload["network"], 1);
        assert_eq!(payload["mobile_number"], "08031234567");
        assert_eq!(payload["plan"], "1001");
        assert_eq!(payload["Ported_number"], false);
        assert_eq!(payload["request_id"], request().idempotency_key());
    }

    #[test]
    fn network_ids() {
        assert_eq!(Network::from_name("mtn").map(|n| n.provider_id()), Some(1));
        assert_eq!(Network::from_name("GLO").map(|n| n.provider_id()), Some(2));
        assert_eq!(Network::from_name("9mobile").map(|n| n.provider_id()), Some(3));
        assert_eq!(Network::from_name("Airtel").map(|n| n.provider_id()), Some(4));
        assert_eq!(Network::from_name("smile"), None);
    }

    #[test]
    fn only_network_and_5xx_errors_are_transient() {
        assert!(VendError::Timeout { after: Duration::from_secs(60) }.is_transient());
        assert!(VendError::Server { status: 503, body: String::new() }.is_transient());
        assert!(!VendError::Upstream { status: 400, body: String::new() }.is_transient());
        assert!(!VendError::CircuitOpen { service: "v".to_string() }.is_transient());
    }
}
