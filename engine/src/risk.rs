use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    const MODERATE_FROM: f64 = 0.3;
    const HIGH_FROM: f64 = 0.7;

    /// Band edges belong to the higher band.
    pub fn from_probability(probability: f64) -> Self {
        if probability < Self::MODERATE_FROM {
            RiskLevel::Low
        } else if probability < Self::HIGH_FROM {
            RiskLevel::Moderate
        } else {
            RiskLevel::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
        }
    }
}
