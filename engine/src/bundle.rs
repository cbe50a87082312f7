//! Loaded model artifacts and the per-variant prediction pipeline.

use crate::{
    alignment::{align_to_model, align_to_scaler, bypass_overrides, Source},
    booster::Booster,
    error::{schema_error, AppError},
    explainer::TreeExplainer,
    features::{derive_features, FeatureMap, Vocabulary, DOSE_BYPASS_FEATURES, FULL_FEATURES},
    scaler::StandardScaler,
    types::{Attributions, BoosterSummary, BundleSummary, ScalerSummary},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Full,
    Top10,
    Top20,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Full, Variant::Top10, Variant::Top20];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Full => "full",
            Variant::Top10 => "top10",
            Variant::Top20 => "top20",
        }
    }

    pub fn canonical(self) -> Variant {
        match self {
            Variant::Top10 => Variant::Top20,
            v => v,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub full_model: PathBuf,
    pub top20_model: PathBuf,
    pub scaler: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub probability: f64,
    pub attributions: Attributions,
}

struct VariantModel {
    booster: Arc<Booster>,
    explainer: TreeExplainer,
    vocabulary: Vocabulary,
    bypass: Vec<String>,
    sha256: String,
}

impl VariantModel {
    fn new(booster: Booster, vocabulary: Vocabulary, bypass: Vec<String>, sha256: String) -> Self {
        let booster = Arc::new(booster);
        Self {
            explainer: TreeExplainer::new(Arc::clone(&booster)),
            booster,
            vocabulary,
            bypass,
            sha256,
        }
    }

    fn summary(&self) -> BoosterSummary {
        BoosterSummary {
            features: self.vocabulary.names().to_vec(),
            trees: self.booster.trees().len(),
            expected_value: self.explainer.expected_value(),
            sha256: self.sha256.clone(),
        }
    }
}

/// Everything the prediction endpoints need. Immutable once built.
pub struct ModelBundle {
    full: VariantModel,
    top20: VariantModel,
    scaler: StandardScaler,
    scaler_sha256: String,
}

/// Reads an artifact and returns it parsed together with the hex SHA-256
/// of its bytes.
fn read_artifact<T>(
    path: &Path,
    parse: impl FnOnce(&[u8]) -> Result<T, AppError>,
) -> Result<(T, String), AppError> {
    let bytes = std::fs::read(path).map_err(|e| AppError::artifact(path, e))?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let value = parse(&bytes).map_err(|e| AppError::artifact(path, e))?;
    info!(path = %path.display(), %sha256, "loaded artifact");
    Ok((value, sha256))
}

impl ModelBundle {
    pub fn load(paths: &ArtifactPaths) -> Result<Self, AppError> {
        info!("Loading model artifacts");
        let (full, full_sha) = read_artifact(&paths.full_model, Booster::from_slice)?;
        let (top20, top20_sha) = read_artifact(&paths.top20_model, Booster::from_slice)?;
        let (scaler, scaler_sha) = read_artifact(&paths.scaler, StandardScaler::from_slice)?;

        let bundle = Self::from_parts(full, top20, scaler, [full_sha, top20_sha, scaler_sha])?;
        info!(
            full_features = bundle.full.vocabulary.len(),
            top20_features = bundle.top20.vocabulary.len(),
            scaler_features = bundle.scaler.vocabulary().len(),
            "Models loaded"
        );
        Ok(bundle)
    }

    /// `fingerprints` are the full, top20 and scaler digests in that order.
    pub fn from_parts(
        full: Booster,
        top20: Booster,
        scaler: StandardScaler,
        fingerprints: [String; 3],
    ) -> Result<Self, AppError> {
        let [full_sha, top20_sha, scaler_sha] = fingerprints;

        let full_vocabulary = match full.feature_names() {
            Some(names) => names.clone(),
            None if full.num_features() == FULL_FEATURES.len() => Vocabulary::full(),
            None => {
                return Err(schema_error(format!(
                    "full model has no feature names and {} features (expected {})",
                    full.num_features(),
                    FULL_FEATURES.len()
                )))
            }
        };
        let top20_vocabulary = top20
            .feature_names()
            .cloned()
            .ok_or_else(|| schema_error("top20 model carries no feature names"))?;

        let full_bypass: Vec<String> = DOSE_BYPASS_FEATURES.iter().map(|s| s.to_string()).collect();
        let top20_bypass = top20_vocabulary.difference(scaler.vocabulary());
        info!(bypass = ?top20_bypass, "top20 features passed through unscaled");
        if top20_bypass.len() != DOSE_BYPASS_FEATURES.len() {
            warn!(
                count = top20_bypass.len(),
                "unexpected number of top20 features missing from the scaler"
            );
        }

        Ok(Self {
            full: VariantModel::new(full, full_vocabulary, full_bypass, full_sha),
            top20: VariantModel::new(top20, top20_vocabulary, top20_bypass, top20_sha),
            scaler,
            scaler_sha256: scaler_sha,
        })
    }

    fn model(&self, variant: Variant) -> &VariantModel {
        match variant.canonical() {
            Variant::Full => &self.full,
            _ => &self.top20,
        }
    }

    pub fn vocabulary(&self, variant: Variant) -> &Vocabulary {
        &self.model(variant).vocabulary
    }

    pub fn bypass(&self, variant: Variant) -> &[String] {
        &self.model(variant).bypass
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn model_input(&self, variant: Variant, features: &FeatureMap) -> Result<Vec<f64>, AppError> {
        Ok(self
            .model_input_sources(variant, features)?
            .into_iter()
            .map(|(value, _)| value)
            .collect())
    }

    /// The exact vector the booster behind `variant` sees for `features`,
    /// with the tier each value was resolved from.
    pub fn model_input_sources(
        &self,
        variant: Variant,
        features: &FeatureMap,
    ) -> Result<Vec<(f64, Source)>, AppError> {
        let variant = variant.canonical();
        let model = self.model(variant);

        let raw = match variant {
            Variant::Full => derive_features(features),
            _ => {
                // Only the reduced model's own names are taken from the caller.
                let mut stub: FeatureMap =
                    FULL_FEATURES.iter().map(|n| (n.to_string(), 0.0)).collect();
                for name in model.vocabulary.iter() {
                    if let Some(v) = features.get(name) {
                        stub.insert(name.to_string(), *v);
                    }
                }
                derive_features(&stub)
            }
        };

        let scaled = align_to_scaler(&self.scaler, &raw)?;
        let overrides = bypass_overrides(&model.bypass, &raw);
        Ok(align_to_model(
            &model.vocabulary,
            &overrides,
            &scaled,
            &raw,
            variant.as_str(),
        ))
    }

    pub fn predict(&self, variant: Variant, features: &FeatureMap) -> Result<Prediction, AppError> {
        let x = self.model_input(variant, features)?;
        let model = self.model(variant);
        let probability = model.booster.predict_proba(&x)?;
        let attributions = Self::attribute(model, &x, variant.canonical());
        Ok(Prediction {
            probability,
            attributions,
        })
    }

    pub fn predict_quick(&self, variant: Variant, features: &FeatureMap) -> Result<f64, AppError> {
        let x = self.model_input(variant, features)?;
        self.model(variant).booster.predict_proba(&x)
    }

    // Attribution failures never fail the prediction.
    fn attribute(model: &VariantModel, x: &[f64], variant: Variant) -> Attributions {
        match model.explainer.shap_values(x) {
            Ok(phi) => Attributions::from_values(model.vocabulary.iter(), &phi),
            Err(e) => {
                warn!(variant = variant.as_str(), error = %e, "attribution failed, returning zeros");
                metrics::counter!("attribution_failures_total", "variant" => variant.as_str())
                    .increment(1);
                Attributions::zeros(model.vocabulary.iter())
            }
        }
    }

    pub fn summary(&self) -> BundleSummary {
        BundleSummary {
            full: self.full.summary(),
            top20: self.top20.summary(),
            scaler: ScalerSummary {
                features: self.scaler.vocabulary().names().to_vec(),
                sha256: self.scaler_sha256.clone(),
            },
            full_bypass: self.full.bypass.clone(),
            top20_bypass: self.top20.bypass.clone(),
        }
    }
}

/// Process-wide holder of the bundle. Loads at most once; a failed load
/// leaves the cell empty so the next caller retries.
pub struct BundleCell {
    paths: ArtifactPaths,
    cell: OnceCell<Arc<ModelBundle>>,
    load_attempts: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl BundleCell {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self {
            paths,
            cell: OnceCell::new(),
            load_attempts: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn preloaded(paths: ArtifactPaths, bundle: Arc<ModelBundle>) -> Self {
        Self {
            paths,
            cell: OnceCell::new_with(Some(bundle)),
            load_attempts: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub async fn get_or_load(&self) -> Result<Arc<ModelBundle>, AppError> {
        let bundle = self
            .cell
            .get_or_try_init(|| async {
                self.load_attempts.fetch_add(1, Ordering::SeqCst);
                let paths = self.paths.clone();
                let bundle = tokio::task::spawn_blocking(move || ModelBundle::load(&paths))
                    .await
                    .map_err(|e| AppError::Internal(format!("model loader panicked: {}", e)))??;
                Ok::<_, AppError>(Arc::new(bundle))
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load models");
                self.set_last_error(Some(e.to_string()));
                AppError::ModelsNotLoaded(e.to_string())
            })?;
        self.set_last_error(None);
        Ok(Arc::clone(bundle))
    }

    fn set_last_error(&self, reason: Option<String>) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = reason;
        }
    }

    /// Why the most recent load failed. Cleared once a load succeeds.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn get(&self) -> Option<Arc<ModelBundle>> {
        self.cell.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }
}
