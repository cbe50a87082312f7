use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{sync::Arc, time::Instant};
use tracing::info;

use crate::{
    bundle::{BundleCell, Variant},
    error::AppError,
    features::from_nullable,
    types::{
        BundleSummary, ExplainedPredictionResponse, HealthResponse, PredictRequest,
        PredictionResponse,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub bundles: Arc<BundleCell>,
    pub metrics: Option<PrometheusHandle>,
    pub full_top_n: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/predict/:variant", post(predict))
        .route("/api/predict/:variant/quick", post(predict_quick))
        .route("/api/models", get(models))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

pub async fn predict(
    State(state): State<AppState>,
    Path(variant): Path<Variant>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<ExplainedPredictionResponse>, AppError> {
    let start = Instant::now();
    let bundle = state.bundles.get_or_load().await?;
    let features = from_nullable(request.features);

    let prediction = bundle.predict(variant, &features)?;

    // The full model explains with its strongest contributors only.
    let top_n = match variant {
        Variant::Full => Some(state.full_top_n),
        _ => None,
    };
    let response = ExplainedPredictionResponse {
        prediction: PredictionResponse::from_probability(prediction.probability),
        top_contributors: prediction.attributions.top(top_n),
        shap_values: prediction.attributions,
    };

    record(variant, "explained", start);
    info!(
        variant = variant.as_str(),
        probability = response.prediction.probability,
        risk_level = response.prediction.risk_level.as_str(),
        "prediction served"
    );
    Ok(Json(response))
}

pub async fn predict_quick(
    State(state): State<AppState>,
    Path(variant): Path<Variant>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictionResponse>, AppError> {
    let start = Instant::now();
    let bundle = state.bundles.get_or_load().await?;
    let features = from_nullable(request.features);

    let probability = bundle.predict_quick(variant, &features)?;

    record(variant, "quick", start);
    Ok(Json(PredictionResponse::from_probability(probability)))
}

fn record(variant: Variant, mode: &'static str, start: Instant) {
    metrics::counter!("predictions_total", "variant" => variant.as_str(), "mode" => mode)
        .increment(1);
    metrics::histogram!("prediction_duration_ms", "variant" => variant.as_str())
        .record(start.elapsed().as_secs_f64() * 1000.0);
}

fn health_body(bundles: &BundleCell, healthy_message: &str) -> HealthResponse {
    let loaded = bundles.is_loaded();
    let (status, message) = if loaded {
        ("healthy", healthy_message.to_string())
    } else {
        match bundles.last_error() {
            Some(reason) => ("unhealthy", format!("Models not loaded: {}", reason)),
            None => ("unhealthy", "Models not loaded".to_string()),
        }
    };
    HealthResponse {
        status,
        models_loaded: loaded,
        message,
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    }
}

pub async fn root(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_body(&state.bundles, "CRRT Clot Prediction API is running"))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let status = if state.bundles.is_loaded() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health_body(&state.bundles, "All systems operational")))
}

pub async fn models(State(state): State<AppState>) -> Result<Json<BundleSummary>, AppError> {
    let bundle = state
        .bundles
        .get()
        .ok_or_else(|| AppError::ModelsNotLoaded("no prediction has loaded them yet".to_string()))?;
    Ok(Json(bundle.summary()))
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics exporter not installed".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{bundle, write_artifacts};
    use axum::{body::Body, http::Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state(cell: BundleCell) -> AppState {
        AppState {
            bundles: Arc::new(cell),
            metrics: None,
            full_top_n: 10,
        }
    }

    fn loaded() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_artifacts(dir.path());
        state(BundleCell::preloaded(paths, Arc::new(bundle())))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn sample_body() -> Value {
        json!({"features": {
            "blood_flow": 200, "citrate": 200, "heparin_dose": 800, "phosphate": 3.5,
            "fibrinogen": 350, "effluent_pressure": 75, "filter_pressure": 125,
            "prefilter_replacement_rate": 500, "creatinine": 2.5, "replacement_rate": 700
        }})
    }

    #[tokio::test]
    async fn full_returns_ten_contributors() {
        let (status, body) = call(router(loaded()), "POST", "/api/predict/full", Some(sample_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["shap_values"].as_object().unwrap().len(), 59);
        assert_eq!(body["top_contributors"].as_object().unwrap().len(), 10);

        let p = body["probability"].as_f64().unwrap();
        assert!((body["percentage"].as_f64().unwrap() - p * 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn top10_returns_all_twenty_contributors() {
        let (status, body) = call(router(loaded()), "POST", "/api/predict/top10", Some(sample_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["shap_values"].as_object().unwrap().len(), 20);
        assert_eq!(body["top_contributors"].as_object().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn quick_omits_attributions() {
        let (status, body) = call(router(loaded()), "POST", "/api/predict/top20/quick", Some(sample_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("shap_values").is_none());
        let level = body["risk_level"].as_str().unwrap();
        assert!(["low", "moderate", "high"].contains(&level));
    }

    #[tokio::test]
    async fn null_features_are_accepted() {
        let body = json!({"features": {"ptt": null, "platelet": 140}});
        let (status, _) = call(router(loaded()), "POST", "/api/predict/full/quick", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_variant_is_rejected() {
        let (status, _) = call(router(loaded()), "POST", "/api/predict/top5", Some(sample_body())).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn missing_models_answer_503() {
        let dir = tempfile::tempdir().unwrap();
        let app_state = state(BundleCell::new(crate::bundle::ArtifactPaths {
            full_model: dir.path().join("a.json"),
            top20_model: dir.path().join("b.json"),
            scaler: dir.path().join("c.json"),
        }));

        let (status, body) = call(router(app_state.clone()), "POST", "/api/predict/full", Some(sample_body())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().starts_with("Models not loaded"));
        assert_eq!(body["status"], 503);

        let (status, body) = call(router(app_state.clone()), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["models_loaded"], false);
        let message = body["message"].as_str().unwrap();
        assert!(message.starts_with("Models not loaded: "), "{}", message);
        assert!(message.contains("a.json"), "{}", message);

        let (status, body) = call(router(app_state), "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "unhealthy");
    }

    #[tokio::test]
    async fn health_before_any_load_has_no_reason() {
        let dir = tempfile::tempdir().unwrap();
        let app_state = state(BundleCell::new(write_artifacts(dir.path())));

        let (status, body) = call(router(app_state), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["message"], "Models not loaded");
    }

    #[tokio::test]
    async fn lazy_cell_loads_on_first_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let app_state = state(BundleCell::new(write_artifacts(dir.path())));

        let (status, _) = call(router(app_state.clone()), "GET", "/api/models", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = call(router(app_state.clone()), "POST", "/api/predict/top20", Some(sample_body())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(router(app_state), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn models_endpoint_lists_bypass_and_fingerprints() {
        let (status, body) = call(router(loaded()), "GET", "/api/models", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["top20_bypass"], json!(["citrate", "heparin_dose"]));
        assert_eq!(body["full"]["sha256"].as_str().unwrap().len(), 64);
    }
}
