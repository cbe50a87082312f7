//! Maps sparse feature mappings onto the exact ordered vectors the scaler
//! and the boosters were trained on.

use crate::{
    error::AppError,
    features::{FeatureMap, Vocabulary},
    scaler::StandardScaler,
};
use tracing::warn;

/// Which tier supplied a model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Bypass,
    Scaled,
    Raw,
    Fallback,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Bypass => "raw (bypass)",
            Source::Scaled => "scaled",
            Source::Raw => "raw",
            Source::Fallback => "fallback",
        }
    }
}

/// Scales every name the scaler knows about. Names it does not know are
/// left out of the result; absent inputs are scaled from 0.0.
pub fn align_to_scaler(
    scaler: &StandardScaler,
    features: &FeatureMap,
) -> Result<FeatureMap, AppError> {
    let vocabulary = scaler.vocabulary();
    let row = vocabulary.gather(features);
    let scaled = scaler.transform(&row)?;
    Ok(vocabulary.scatter(&scaled))
}

/// Resolves a single model input. Bypass overrides win over the scaled
/// value, which wins over the raw derived value.
pub fn resolve(
    name: &str,
    overrides: &FeatureMap,
    scaled: &FeatureMap,
    raw: &FeatureMap,
) -> (f64, Source) {
    if let Some(v) = overrides.get(name) {
        (*v, Source::Bypass)
    } else if let Some(v) = scaled.get(name) {
        (*v, Source::Scaled)
    } else if let Some(v) = raw.get(name) {
        (*v, Source::Raw)
    } else {
        (0.0, Source::Fallback)
    }
}

/// Builds the model's input vector in vocabulary order, each value tagged
/// with the tier that supplied it. Fallbacks are logged and counted.
pub fn align_to_model(
    vocabulary: &Vocabulary,
    overrides: &FeatureMap,
    scaled: &FeatureMap,
    raw: &FeatureMap,
    variant: &'static str,
) -> Vec<(f64, Source)> {
    vocabulary
        .iter()
        .map(|name| {
            let resolved = resolve(name, overrides, scaled, raw);
            if resolved.1 == Source::Fallback {
                warn!(variant, feature = name, "feature not resolvable, using 0.0");
                metrics::counter!(
                    "feature_fallback_total",
                    "variant" => variant,
                    "feature" => name.to_string()
                )
                .increment(1);
            }
            resolved
        })
        .collect()
}

/// Raw values for the bypass names, read from the derived mapping.
pub fn bypass_overrides(bypass: &[String], raw: &FeatureMap) -> FeatureMap {
    bypass
        .iter()
        .map(|name| (name.clone(), raw.get(name).copied().unwrap_or(0.0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::counter_value;
    use metrics_util::debugging::DebuggingRecorder;
    use serde_json::json;

    fn map(pairs: &[(&str, f64)]) -> FeatureMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn scaler() -> StandardScaler {
        let artifact = json!({
            "feature_names_in": ["a", "b"],
            "mean": [1.0, 10.0],
            "scale": [2.0, 5.0]
        });
        StandardScaler::from_slice(artifact.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn scaler_alignment_fills_missing_before_scaling() {
        let scaled = align_to_scaler(&scaler(), &map(&[("a", 5.0), ("ignored", 1.0)])).unwrap();
        assert_eq!(scaled.len(), 2);
        assert_eq!(scaled["a"], 2.0);
        assert_eq!(scaled["b"], -2.0);
    }

    #[test]
    fn bypass_wins_over_scaled_value() {
        let overrides = map(&[("citrate", 3.2)]);
        let scaled = map(&[("citrate", -0.4)]);
        let raw = map(&[("citrate", 3.2)]);
        assert_eq!(
            resolve("citrate", &overrides, &scaled, &raw),
            (3.2, Source::Bypass)
        );
    }

    #[test]
    fn tiers_resolve_in_order() {
        let overrides = FeatureMap::new();
        let scaled = map(&[("a", 0.5)]);
        let raw = map(&[("a", 9.0), ("ratio", 4.0)]);

        assert_eq!(resolve("a", &overrides, &scaled, &raw), (0.5, Source::Scaled));
        assert_eq!(resolve("ratio", &overrides, &scaled, &raw), (4.0, Source::Raw));
        assert_eq!(resolve("nowhere", &overrides, &scaled, &raw), (0.0, Source::Fallback));
    }

    #[test]
    fn model_vector_follows_vocabulary_order() {
        let vocabulary = Vocabulary::new(["dose", "a", "ratio", "nowhere"]).unwrap();
        let raw = map(&[("dose", 7.0), ("a", 9.0), ("ratio", 4.0)]);
        let overrides = bypass_overrides(&["dose".to_string()], &raw);
        let scaled = map(&[("a", 0.5)]);

        let x: Vec<f64> = align_to_model(&vocabulary, &overrides, &scaled, &raw, "test")
            .into_iter()
            .map(|(value, _)| value)
            .collect();
        assert_eq!(x, vec![7.0, 0.5, 4.0, 0.0]);
    }

    #[test]
    fn overrides_default_to_zero() {
        let overrides = bypass_overrides(&["heparin_dose".to_string()], &FeatureMap::new());
        assert_eq!(overrides["heparin_dose"], 0.0);
    }

    #[test]
    fn sources_are_reported_per_position() {
        let vocabulary = Vocabulary::new(["dose", "a", "ratio", "nowhere"]).unwrap();
        let raw = map(&[("dose", 7.0), ("a", 9.0), ("ratio", 4.0)]);
        let overrides = bypass_overrides(&["dose".to_string()], &raw);
        let scaled = map(&[("a", 0.5)]);

        let sources: Vec<Source> = align_to_model(&vocabulary, &overrides, &scaled, &raw, "test")
            .into_iter()
            .map(|(_, source)| source)
            .collect();
        assert_eq!(
            sources,
            vec![Source::Bypass, Source::Scaled, Source::Raw, Source::Fallback]
        );
    }

    #[test]
    fn fallback_is_counted_per_feature() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let vocabulary = Vocabulary::new(["a", "nowhere"]).unwrap();
        let scaled = map(&[("a", 0.5)]);

        metrics::with_local_recorder(&recorder, || {
            align_to_model(&vocabulary, &FeatureMap::new(), &scaled, &FeatureMap::new(), "top20");
        });

        let labels = [("variant", "top20"), ("feature", "nowhere")];
        assert_eq!(counter_value(&snapshotter, "feature_fallback_total", &labels), Some(1));
        let resolved = [("variant", "top20"), ("feature", "a")];
        assert_eq!(counter_value(&snapshotter, "feature_fallback_total", &resolved), None);
    }
}
