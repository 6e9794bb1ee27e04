use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Which side of the marketplace a plan is sold to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Talent,
    Company,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Talent => "talent",
            Audience::Company => "company",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "talent" => Some(Audience::Talent),
            "company" => Some(Audience::Company),
            _ => None,
        }
    }
}

impl Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
