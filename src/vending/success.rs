//! Recognising a successful vend in the provider's response body.
//!
//! The provider has used several shapes over time, so success is an explicit
//! list of markers. Anything else from a 2xx is a business rejection.

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessPredicate {
    /// `field` is the JSON boolean `true`
    BoolTrue { field: &'static str },
    /// `field` is a string equal to `value`, ignoring ASCII case
    StringEquals {
        field: &'static str,
        value: &'static str,
    },
}

pub const DEFAULT_SUCCESS_MARKERS: &[SuccessPredicate] = &[
    SuccessPredicate::BoolTrue { field: "success" },
    SuccessPredicate::StringEquals {
        field: "Status",
        value: "successful",
    },
    SuccessPredicate::StringEquals {
        field: "status",
        value: "delivered",
    },
    SuccessPredicate::StringEquals {
        field: "status",
        value: "successful",
    },
];

impl SuccessPredicate {
    pub fn matches(&self, payload: &JsonValue) -> bool {
        match self {
            SuccessPredicate::BoolTrue { field } => {
                payload.get(field).and_then(JsonValue::as_bool) == Some(true)
            }
            SuccessPredicate::StringEquals { field, value } => payload
                .get(field)
                .and_then(JsonValue::as_str)
                .map(|s| s.trim().eq_ignore_ascii_case(value))
                .unwrap_or(false),
        }
    }
}

/// True when any default marker matches
pub fn is_success(payload: &JsonValue) -> bool {
    DEFAULT_SUCCESS_MARKERS.iter().any(|p| p.matches(payload))
}
