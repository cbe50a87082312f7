//! Artifact fixtures shared by the unit tests.

use crate::{
    bundle::{ArtifactPaths, ModelBundle},
    features::{DOSE_BYPASS_FEATURES, FULL_FEATURES, TOP20_FEATURES},
};
use metrics_util::debugging::{DebugValue, Snapshotter};
use serde_json::{json, Value};
use std::path::Path;

/// Tree from `(left, right, split feature, condition, cover)` rows.
/// Leaves use `-1` children and carry their value in the condition column.
pub(crate) fn tree_json(nodes: &[(i32, i32, u32, f64, f64)]) -> Value {
    json!({
        "left_children": nodes.iter().map(|n| n.0).collect::<Vec<_>>(),
        "right_children": nodes.iter().map(|n| n.1).collect::<Vec<_>>(),
        "split_indices": nodes.iter().map(|n| n.2).collect::<Vec<_>>(),
        "split_conditions": nodes.iter().map(|n| n.3).collect::<Vec<_>>(),
        "default_left": nodes.iter().map(|n| i32::from(n.0 != -1)).collect::<Vec<_>>(),
        "sum_hessian": nodes.iter().map(|n| n.4).collect::<Vec<_>>(),
    })
}

/// `x[feature] < threshold ? left : right`, equal covers.
pub(crate) fn stump(feature: u32, threshold: f64, left: f64, right: f64) -> Value {
    tree_json(&[
        (1, 2, feature, threshold, 2.0),
        (-1, -1, 0, left, 1.0),
        (-1, -1, 0, right, 1.0),
    ])
}

pub(crate) fn model_json(names: &[&str], trees: Vec<Value>) -> Value {
    json!({
        "learner": {
            "feature_names": names,
            "feature_types": names.iter().map(|_| "float").collect::<Vec<_>>(),
            "gradient_booster": {
                "name": "gbtree",
                "model": {
                    "gbtree_model_param": {
                        "num_trees": trees.len().to_string(),
                    },
                    "trees": trees,
                },
            },
            "learner_model_param": {
                "base_score": "5E-1",
                "num_class": "0",
                "num_feature": names.len().to_string(),
            },
            "objective": {"name": "binary:logistic"},
        },
        "version": [2, 0, 3],
    })
}

fn position(names: &[&str], name: &str) -> u32 {
    names.iter().position(|n| *n == name).unwrap() as u32
}

/// Scaler fitted on the full vocabulary minus the dose fields.
pub(crate) fn scaler_json() -> Value {
    let names: Vec<&str> = FULL_FEATURES
        .iter()
        .copied()
        .filter(|n| !DOSE_BYPASS_FEATURES.contains(n))
        .collect();
    let mean: Vec<f64> = (0..names.len()).map(|i| i as f64 * 0.5).collect();
    let scale: Vec<f64> = (0..names.len()).map(|i| 1.0 + (i % 4) as f64).collect();
    json!({
        "feature_names_in": names,
        "n_features_in": names.len(),
        "mean": mean,
        "scale": scale,
    })
}

pub(crate) fn full_model_json() -> Value {
    let names = &FULL_FEATURES[..];
    let f = |name: &str| position(names, name);
    model_json(
        names,
        vec![
            // Raw dose units.
            stump(f("citrate"), 150.0, -0.4, 0.6),
            tree_json(&[
                (1, 2, f("platelet"), 0.0, 8.0),
                (3, 4, f("ptt"), 0.5, 5.0),
                (-1, -1, 0, 0.3, 3.0),
                (-1, -1, 0, -0.2, 2.0),
                (-1, -1, 0, 0.5, 3.0),
            ]),
            stump(f("bun_creatinine_ratio"), 1.0, 0.1, -0.25),
            stump(f("heparin_dose"), 500.0, 0.2, -0.35),
        ],
    )
}

pub(crate) fn top20_model_json() -> Value {
    let names = &TOP20_FEATURES[..];
    let f = |name: &str| position(names, name);
    model_json(
        names,
        vec![
            stump(f("heparin_dose"), 1000.0, 0.45, -0.3),
            tree_json(&[
                (1, 2, f("blood_flow"), 0.0, 10.0),
                (3, 4, f("fibrinogen"), 1.0, 4.0),
                (5, 6, f("blood_flow"), 2.0, 6.0),
                (-1, -1, 0, -0.5, 1.0),
                (-1, -1, 0, 0.2, 3.0),
                (-1, -1, 0, 0.35, 4.0),
                (-1, -1, 0, -0.15, 2.0),
            ]),
            stump(f("flow_pressure_ratio"), 10.0, -0.1, 0.3),
            stump(f("citrate"), 100.0, 0.05, 0.25),
        ],
    )
}

pub(crate) fn write_artifacts(dir: &Path) -> ArtifactPaths {
    let paths = ArtifactPaths {
        full_model: dir.join("xgb_full.json"),
        top20_model: dir.join("xgb_top20.json"),
        scaler: dir.join("scaler_full.json"),
    };
    std::fs::write(&paths.full_model, full_model_json().to_string()).unwrap();
    std::fs::write(&paths.top20_model, top20_model_json().to_string()).unwrap();
    std::fs::write(&paths.scaler, scaler_json().to_string()).unwrap();
    paths
}

pub(crate) fn bundle() -> ModelBundle {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_artifacts(dir.path());
    ModelBundle::load(&paths).unwrap()
}

/// Current value of the counter `name` carrying all of `labels`, if it was
/// ever incremented.
pub(crate) fn counter_value(snapshotter: &Snapshotter, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(composite, _, _, value)| {
            let key = composite.key();
            let matches = key.name() == name
                && labels
                    .iter()
                    .all(|(k, v)| key.labels().any(|l| l.key() == *k && l.value() == *v));
            match value {
                DebugValue::Counter(n) if matches => Some(n),
                _ => None,
            }
        })
}
