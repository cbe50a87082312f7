//! Feature vocabularies and engineered feature derivation.
//!
//! Callers send sparse, string-keyed measurements. Everything downstream
//! works against one of the fixed vocabularies below, each turned into a
//! [`Vocabulary`] (ordered names plus a name -> index table) once.

use std::collections::HashMap;

/// Sparse name -> value mapping. Missing keys read as 0.0.
pub type FeatureMap = HashMap<String, f64>;

/// Every feature the full model family knows about, in training column order.
pub const FULL_FEATURES: [&str; 59] = [
    "access_pressure",
    "blood_flow",
    "citrate",
    "current_goal",
    "dialysate_rate",
    "effluent_pressure",
    "filter_pressure",
    "heparin_dose",
    "hourly_patient_fluid_removal",
    "prefilter_replacement_rate",
    "postfilter_replacement_rate",
    "replacement_rate",
    "return_pressure",
    "ultrafiltrate_output",
    "hematocrit",
    "hemoglobin",
    "platelet",
    "rbc",
    "wbc",
    "fibrinogen",
    "inr",
    "pt",
    "ptt",
    "aniongap",
    "bicarbonate",
    "bun",
    "calcium",
    "chloride",
    "creatinine",
    "glucose",
    "sodium",
    "potassium",
    "lactate",
    "ph",
    "pco2",
    "magnesium",
    "phosphate",
    "ldh",
    "high_pressure",
    "bun_creatinine_ratio",
    "platelet_ptt_interaction",
    "hct_bloodflow_interaction",
    "wbc_rbc_ratio",
    "platelet_wbc_ratio",
    "flow_pressure_ratio",
    "ptt_squared",
    "platelets_squared",
    "hour_of_day",
    "day_of_week",
    "is_weekend",
    "is_night_shift",
    "platelet_change",
    "platelet_change_rate",
    "ptt_change",
    "ptt_change_rate",
    "creatinine_change",
    "creatinine_change_rate",
    "hematocrit_change",
    "hematocrit_change_rate",
];

/// The ten features the reduced model was advertised with.
pub const TOP10_FEATURES: [&str; 10] = [
    "blood_flow",
    "citrate",
    "heparin_dose",
    "phosphate",
    "fibrinogen",
    "effluent_pressure",
    "filter_pressure",
    "prefilter_replacement_rate",
    "creatinine",
    "replacement_rate",
];

/// The twenty features the reduced model actually consumes.
pub const TOP20_FEATURES: [&str; 20] = [
    "blood_flow",
    "citrate",
    "heparin_dose",
    "phosphate",
    "fibrinogen",
    "effluent_pressure",
    "filter_pressure",
    "prefilter_replacement_rate",
    "creatinine",
    "replacement_rate",
    "platelet",
    "ptt",
    "hematocrit",
    "inr",
    "return_pressure",
    "access_pressure",
    "ultrafiltrate_output",
    "bun_creatinine_ratio",
    "platelet_ptt_interaction",
    "flow_pressure_ratio",
];

pub const DERIVED_FEATURES: [&str; 8] = [
    "bun_creatinine_ratio",
    "platelet_ptt_interaction",
    "hct_bloodflow_interaction",
    "wbc_rbc_ratio",
    "platelet_wbc_ratio",
    "flow_pressure_ratio",
    "ptt_squared",
    "platelets_squared",
];

pub const CHANGE_DERIVED: [&str; 4] = [
    "platelet_change_rate",
    "ptt_change_rate",
    "creatinine_change_rate",
    "hematocrit_change_rate",
];

/// Dose fields the full model receives in raw units.
pub const DOSE_BYPASS_FEATURES: [&str; 2] = ["citrate", "heparin_dose"];

/// Example request body for the reduced model, as shipped with the API docs.
pub const SAMPLE_TOP10_INPUT: [(&str, f64); 10] = [
    ("blood_flow", 200.0),
    ("citrate", 200.0),
    ("heparin_dose", 800.0),
    ("phosphate", 3.5),
    ("fibrinogen", 350.0),
    ("effluent_pressure", 75.0),
    ("filter_pressure", 125.0),
    ("prefilter_replacement_rate", 500.0),
    ("creatinine", 2.5),
    ("replacement_rate", 700.0),
];

pub fn sample_input() -> FeatureMap {
    SAMPLE_TOP10_INPUT
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect()
}

/// Ordered feature names with constant-time name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Vocabulary {
    pub fn new<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(format!("duplicate feature name '{}'", name));
            }
        }
        Ok(Self { names, index })
    }

    pub fn full() -> Self {
        Self::from_static(&FULL_FEATURES)
    }

    fn from_static(names: &[&'static str]) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        Self {
            names: names.iter().map(|s| s.to_string()).collect(),
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Names present here but absent from `other`, in this vocabulary's order.
    pub fn difference(&self, other: &Vocabulary) -> Vec<String> {
        self.iter()
            .filter(|name| !other.contains(name))
            .map(str::to_string)
            .collect()
    }

    /// Ordered vector for this vocabulary; absent names become 0.0.
    pub fn gather(&self, features: &FeatureMap) -> Vec<f64> {
        self.iter()
            .map(|name| features.get(name).copied().unwrap_or(0.0))
            .collect()
    }

    /// Re-associates an ordered vector with the names it was gathered for.
    pub fn scatter(&self, values: &[f64]) -> FeatureMap {
        self.names
            .iter()
            .cloned()
            .zip(values.iter().copied())
            .collect()
    }
}

/// Converts caller input into a feature map. Nulls become 0.0.
pub fn from_nullable(raw: HashMap<String, Option<f64>>) -> FeatureMap {
    raw.into_iter()
        .map(|(name, value)| (name, value.unwrap_or(0.0)))
        .collect()
}

/// Replaces an exact-zero denominator with 1.
fn safe(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        x
    }
}

/// Returns a copy of `features` with the twelve engineered features
/// (re)computed. Caller-supplied values for derived names are overwritten.
pub fn derive_features(features: &FeatureMap) -> FeatureMap {
    let get = |name: &str| features.get(name).copied().unwrap_or(0.0);

    let bun = get("bun");
    let creatinine = get("creatinine");
    let platelet = get("platelet");
    let ptt = get("ptt");
    let hematocrit = get("hematocrit");
    let blood_flow = get("blood_flow");
    let wbc = get("wbc");
    let rbc = get("rbc");
    let return_pressure = get("return_pressure");

    let mut d = features.clone();
    let mut set = |name: &str, value: f64| {
        d.insert(name.to_string(), value);
    };

    set("bun_creatinine_ratio", bun / safe(creatinine));
    set("platelet_ptt_interaction", platelet * ptt);
    set("hct_bloodflow_interaction", hematocrit * blood_flow);
    set("wbc_rbc_ratio", wbc / safe(rbc));
    set("platelet_wbc_ratio", platelet / safe(wbc));
    set("flow_pressure_ratio", blood_flow / safe(return_pressure));
    set("ptt_squared", ptt.powi(2));
    set("platelets_squared", platelet.powi(2));

    set("platelet_change_rate", get("platelet_change") / safe(platelet));
    set("ptt_change_rate", get("ptt_change") / safe(ptt));
    set("creatinine_change_rate", get("creatinine_change") / safe(creatinine));
    set("hematocrit_change_rate", get("hematocrit_change") / safe(hematocrit));

    d
}
