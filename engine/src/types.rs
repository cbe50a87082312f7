use crate::risk::RiskLevel;
use chrono::{DateTime, Utc};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub features: HashMap<String, Option<f64>>,
}

/// Per-feature attribution values, kept in the order they were produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributions(Vec<(String, f64)>);

impl Attributions {
    pub fn zeros<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self(names.into_iter().map(|n| (n.to_string(), 0.0)).collect())
    }

    pub fn from_values<'a>(names: impl IntoIterator<Item = &'a str>, values: &[f64]) -> Self {
        Self(
            names
                .into_iter()
                .zip(values.iter().copied())
                .map(|(n, v)| (n.to_string(), v))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().map(|(_, v)| *v)
    }

    /// Sorted by descending absolute value, truncated to `n` when given.
    /// Ties keep their original order.
    pub fn top(&self, n: Option<usize>) -> Self {
        let mut ranked = self.0.clone();
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        if let Some(n) = n {
            ranked.truncate(n);
        }
        Self(ranked)
    }
}

// A JSON object whose key order is the vector order.
impl Serialize for Attributions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResponse {
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub percentage: f64,
}

impl PredictionResponse {
    pub fn from_probability(probability: f64) -> Self {
        Self {
            probability,
            risk_level: RiskLevel::from_probability(probability),
            percentage: probability * 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplainedPredictionResponse {
    #[serde(flatten)]
    pub prediction: PredictionResponse,
    pub shap_values: Attributions,
    pub top_contributors: Attributions,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub models_loaded: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoosterSummary {
    pub features: Vec<String>,
    pub trees: usize,
    pub expected_value: f64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScalerSummary {
    pub features: Vec<String>,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleSummary {
    pub full: BoosterSummary,
    pub top20: BoosterSummary,
    pub scaler: ScalerSummary,
    pub full_bypass: Vec<String>,
    pub top20_bypass: Vec<String>,
}
