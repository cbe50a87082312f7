//! Fitted standard scaler, loaded from the JSON export of the training
//! pipeline: `{"feature_names_in": [...], "mean": [...], "scale": [...]}`.
//! `mean` / `scale` may be null when the scaler was fitted with
//! `with_mean=False` / `with_std=False`.

use crate::{
    error::{schema_error, AppError},
    features::Vocabulary,
};
use nalgebra::DVector;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ScalerArtifact {
    feature_names_in: Vec<String>,
    #[serde(default)]
    n_features_in: Option<usize>,
    #[serde(default)]
    mean: Option<Vec<f64>>,
    #[serde(default)]
    scale: Option<Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct StandardScaler {
    vocabulary: Vocabulary,
    mean: DVector<f64>,
    scale: DVector<f64>,
}

impl StandardScaler {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AppError> {
        let artifact: ScalerArtifact = serde_json::from_slice(bytes)?;
        Self::from_artifact(artifact)
    }

    fn from_artifact(artifact: ScalerArtifact) -> Result<Self, AppError> {
        let width = artifact.feature_names_in.len();
        if width == 0 {
            return Err(schema_error("scaler declares no feature names"));
        }
        if let Some(declared) = artifact.n_features_in {
            if declared != width {
                return Err(schema_error(format!(
                    "scaler declares {} features but names {}",
                    declared, width
                )));
            }
        }

        let mean = artifact.mean.unwrap_or_else(|| vec![0.0; width]);
        let scale = artifact.scale.unwrap_or_else(|| vec![1.0; width]);
        if mean.len() != width || scale.len() != width {
            return Err(schema_error(format!(
                "scaler has {} names, {} means and {} scales",
                width,
                mean.len(),
                scale.len()
            )));
        }
        if let Some(i) = scale.iter().position(|s| !s.is_finite() || *s <= 0.0) {
            return Err(schema_error(format!(
                "scaler scale for '{}' is {}",
                artifact.feature_names_in[i], scale[i]
            )));
        }

        let vocabulary = Vocabulary::new(artifact.feature_names_in).map_err(schema_error)?;

        Ok(Self {
            vocabulary,
            mean: DVector::from_vec(mean),
            scale: DVector::from_vec(scale),
        })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// `(x - mean) / scale`, column-wise.
    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>, AppError> {
        if row.len() != self.vocabulary.len() {
            return Err(AppError::Prediction(format!(
                "scaler expects {} features, got {}",
                self.vocabulary.len(),
                row.len()
            )));
        }
        let x = DVector::from_column_slice(row);
        let z = (x - &self.mean).component_div(&self.scale);
        Ok(z.iter().copied().collect())
    }
}
