use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Boolean capability granted by a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanFeature {
    ProfileViewsEnabled,
    FeaturedProfile,
    VerifiedBadge,
    AnalyticsDashboard,
    AiProfileAutofill,
    AiJobMatching,
}

impl PlanFeature {
    pub const ALL: [PlanFeature; 6] = [
        PlanFeature::ProfileViewsEnabled,
        PlanFeature::FeaturedProfile,
        PlanFeature::VerifiedBadge,
        PlanFeature::AnalyticsDashboard,
        PlanFeature::AiProfileAutofill,
        PlanFeature::AiJobMatching,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanFeature::ProfileViewsEnabled => "profile_views_enabled",
            PlanFeature::FeaturedProfile => "featured_profile",
            PlanFeature::VerifiedBadge => "verified_badge",
            PlanFeature::AnalyticsDashboard => "analytics_dashboard",
            PlanFeature::AiProfileAutofill => "ai_profile_autofill",
            PlanFeature::AiJobMatching => "ai_job_matching",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|feature| feature.as_str() == value.trim())
    }
}

impl Display for PlanFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
