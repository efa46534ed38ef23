//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod ratelimit {
    use super::*;

    pub const NAMESPACE: &str = "ratelimit";

    /// Attempt counter for one action by one caller (phone, IP, agent id)
    #[derive(Debug, Clone)]
    pub struct CounterKey {
        pub action: String,
        pub identifier: String,
    }

    impl CounterKey {
        pub fn new(action: impl Into<String>, identifier: impl Into<String>) -> Self {
            Self {
                action: action.into(),
                identifier: identifier.into(),
            }
        }
    }

    impl fmt::Display for CounterKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{}:{}:{}",
                VERSION, NAMESPACE, self.action, self.identifier
            )
        }
    }
}
