use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// A metered resource whose consumption is counted per billing period.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum UsageCounter {
    Applications,
    Skills,
    Certifications,
    CvUploads,
    ProfileHighlights,
    AiMatches,
    JobPostings,
}

impl UsageCounter {
    pub const ALL: [UsageCounter; 7] = [
        UsageCounter::Applications,
        UsageCounter::Skills,
        UsageCounter::Certifications,
        UsageCounter::CvUploads,
        UsageCounter::ProfileHighlights,
        UsageCounter::AiMatches,
        UsageCounter::JobPostings,
    ];

    /// Key under which the counter is stored in `period_usage`.
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageCounter::Applications => "applications",
            UsageCounter::Skills => "skills",
            UsageCounter::Certifications => "certifications",
            UsageCounter::CvUploads => "cv_uploads",
            UsageCounter::ProfileHighlights => "profile_highlights",
            UsageCounter::AiMatches => "ai_matches",
            UsageCounter::JobPostings => "job_postings",
        }
    }

    /// Key of the plan limit this counter is checked against.
    pub fn limit_key(&self) -> &'static str {
        match self {
            UsageCounter::Applications => "application_limit",
            UsageCounter::Skills => "skill_limit",
            UsageCounter::Certifications => "certification_limit",
            UsageCounter::CvUploads => "cv_upload_limit",
            UsageCounter::ProfileHighlights => "profile_highlights_limit",
            UsageCounter::AiMatches => "ai_match_limit",
            UsageCounter::JobPostings => "job_posting_limit",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|counter| counter.as_str() == value.trim())
    }
}

impl Display for UsageCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
