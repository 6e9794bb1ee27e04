use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::audiences::Audience;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanTier {
    Free,
    Basic,
    Pro,
    Premium,
    Starter,
    Business,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "FREE",
            PlanTier::Basic => "BASIC",
            PlanTier::Pro => "PRO",
            PlanTier::Premium => "PREMIUM",
            PlanTier::Starter => "STARTER",
            PlanTier::Business => "BUSINESS",
            PlanTier::Enterprise => "ENTERPRISE",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FREE" => Some(PlanTier::Free),
            "BASIC" => Some(PlanTier::Basic),
            "PRO" => Some(PlanTier::Pro),
            "PREMIUM" => Some(PlanTier::Premium),
            "STARTER" => Some(PlanTier::Starter),
            "BUSINESS" => Some(PlanTier::Business),
            "ENTERPRISE" => Some(PlanTier::Enterprise),
            _ => None,
        }
    }

    /// Company tiers mirror the talent ladder; FREE is shared by both sides.
    pub fn audience(&self) -> Option<Audience> {
        match self {
            PlanTier::Free => None,
            PlanTier::Basic | PlanTier::Pro | PlanTier::Premium => Some(Audience::Talent),
            PlanTier::Starter | PlanTier::Business | PlanTier::Enterprise => {
                Some(Audience::Company)
            }
        }
    }
}

impl Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
