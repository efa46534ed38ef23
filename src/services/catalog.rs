//! Data plan lookup. Pricing is owned by the catalog; the engine only reads
//! a plan's price once, when the purchase is created.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;

use crate::config::WalletConfig;
use crate::error::AppError;
use crate::vending::Network;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataPlan {
    pub id: String,
    pub network: Network,
    /// Plan identifier in the vendor's API
    pub vendor_plan: String,
    pub price: BigDecimal,
    pub name: String,
}

pub trait PlanCatalog: Send + Sync {
    fn find(&self, plan_id: &str) -> Option<DataPlan>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticPlanCatalog {
    plans: HashMap<String, DataPlan>,
}

impl StaticPlanCatalog {
    pub fn new(plans: Vec<DataPlan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Plans from `DATA_PLANS_FILE` when set, the built-in list otherwise.
    pub fn from_config(config: &WalletConfig) -> Result<Self, AppError> {
        match &config.plans_file {
            Some(path) => Self::from_file(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn from_file(path: &str) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::configuration(format!("cannot read plans file {}: {}", path, e))
        })?;
        let plans: Vec<DataPlan> = serde_json::from_str(&raw).map_err(|e| {
            AppError::configuration(format!("invalid plans file {}: {}", path, e))
        })?;
        info!(path = %path, plans = plans.len(), "Loaded data plans");
        Ok(Self::new(plans))
    }

    pub fn builtin() -> Self {
        let plan = |id: &str, network: Network, vendor_plan: &str, price: &str, name: &str| {
            DataPlan {
                id: id.to_string(),
                network,
                vendor_plan: vendor_plan.to_string(),
                price: BigDecimal::from_str(price).unwrap_or_default(),
                name: name.to_string(),
            }
        };
        Self::new(vec![
            plan("mtn-1gb", Network::Mtn, "208", "300", "MTN 1GB SME 30 days"),
            plan("mtn-2gb", Network::Mtn, "209", "600", "MTN 2GB SME 30 days"),
            plan("mtn-5gb", Network::Mtn, "212", "1500", "MTN 5GB SME 30 days"),
            plan("glo-1gb", Network::Glo, "261", "280", "GLO 1GB CG 30 days"),
            plan("glo-5gb", Network::Glo, "265", "1400", "GLO 5GB CG 30 days"),
            plan("airtel-1gb", Network::Airtel, "221", "300", "Airtel 1GB CG 30 days"),
            plan("airtel-5gb", Network::Airtel, "225", "1500", "Airtel 5GB CG 30 days"),
            plan("9mobile-1gb", Network::NineMobile, "183", "250", "9mobile 1GB 30 days"),
        ])
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl PlanCatalog for StaticPlanCatalog {
    fn find(&self, plan_id: &str) -> Option<DataPlan> {
        self.plans.get(plan_id).cloned()
    }
}
