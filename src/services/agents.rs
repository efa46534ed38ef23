use std::sync::Arc;
use tracing::{info, warn};

use crate::database::models::{Agent, NewAgent};
use crate::database::repository::LedgerStore;
use crate::error::{AppError, DomainError, ValidationError};
use crate::services::security::{hash_pin, validate_phone, validate_pin_format, verify_pin};

#[derive(Debug, Clone)]
pub struct AgentRegistration {
    pub phone: String,
    pub name: String,
    pub pin: String,
    pub account_number: Option<String>,
}

/// Agent onboarding and PIN login
pub struct AgentService {
    store: Arc<dyn LedgerStore>,
}

impl AgentService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn register(&self, registration: AgentRegistration) -> Result<Agent, AppError> {
        let phone = validate_phone(&registration.phone)?;
        validate_pin_format(&registration.pin)?;
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "name".to_string(),
            }));
        }

        let pin_hash = hash_pin(&registration.pin)?;
        let agent = self
            .store
            .create_agent(NewAgent {
                phone: phone.clone(),
                name: name.to_string(),
                account_number: registration
                    .account_number
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty()),
                pin_hash,
            })
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    AppError::domain(DomainError::DuplicateAgent { phone: phone.clone() })
                } else {
                    e.into()
                }
            })?;

        info!(agent_id = %agent.id, "Agent registered");
        Ok(agent)
    }

    /// Unknown phone and wrong PIN look the same to the caller.
    pub async fn login(&self, phone: &str, pin: &str) -> Result<Agent, AppError> {
        let phone = validate_phone(phone)?;
        let agent = match self.store.find_agent_by_phone(&phone).await? {
            Some(agent) if verify_pin(pin, &agent.pin_hash) => agent,
            _ => {
                warn!(phone = %phone, "Agent login failed");
                return Err(AppError::domain(DomainError::InvalidPin));
            }
        };
        if !agent.is_active {
            return Err(AppError::domain(DomainError::AgentInactive {
                agent_id: agent.id.to_string(),
            }));
        }
        info!(agent_id = %agent.id, "Agent logged in");
        Ok(agent)
    }
}
