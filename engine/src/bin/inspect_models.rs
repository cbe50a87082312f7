//! Loads the configured artifacts and reports what the engine will see:
//! each artifact's vocabulary, the unscaled feature sets and fingerprints.

use anyhow::Context;
use clap::{Parser, Subcommand};
use crrt_engine::{
    bundle::{ArtifactPaths, ModelBundle, Variant},
    config::Config,
    features::sample_input,
    risk::RiskLevel,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "inspect_models")]
#[command(about = "Inspect CRRT model artifacts", long_about = None)]
struct Cli {
    /// Directory holding the artifacts (overrides configuration)
    #[arg(short, long, env = "CRRT_MODELS_DIR")]
    models_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that every artifact file exists
    Check,

    /// Print vocabularies, bypass sets and fingerprints
    Vocab {
        /// Emit the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the documented sample input through a variant
    Sample {
        #[arg(short, long, value_enum, default_value = "top20")]
        variant: VariantArg,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum VariantArg {
    Full,
    Top10,
    Top20,
}

impl From<VariantArg> for Variant {
    fn from(v: VariantArg) -> Self {
        match v {
            VariantArg::Full => Variant::Full,
            VariantArg::Top10 => Variant::Top10,
            VariantArg::Top20 => Variant::Top20,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crrt_engine=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(dir) = cli.models_dir {
        config.models_dir = dir;
    }
    let paths = config.artifact_paths();

    match cli.command {
        Commands::Check => check(&paths),
        Commands::Vocab { json } => vocab(&load(&paths)?, json),
        Commands::Sample { variant } => sample(&load(&paths)?, variant.into()),
    }
}

fn load(paths: &ArtifactPaths) -> anyhow::Result<ModelBundle> {
    ModelBundle::load(paths).context("failed to load model artifacts")
}

fn check(paths: &ArtifactPaths) -> anyhow::Result<()> {
    let artifacts = [
        ("full model", &paths.full_model),
        ("top20 model", &paths.top20_model),
        ("scaler", &paths.scaler),
    ];
    let mut missing = 0;
    for (label, path) in artifacts {
        if path.is_file() {
            println!("ok       {:<12} {}", label, path.display());
        } else {
            println!("MISSING  {:<12} {}", label, path.display());
            missing += 1;
        }
    }
    if missing > 0 {
        anyhow::bail!("{} artifact(s) missing", missing);
    }
    Ok(())
}

fn vocab(bundle: &ModelBundle, json: bool) -> anyhow::Result<()> {
    let summary = bundle.summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for (label, model) in [("full", &summary.full), ("top20", &summary.top20)] {
        println!("{} model: {} features, {} trees", label, model.features.len(), model.trees);
        println!("  sha256          {}", model.sha256);
        println!("  expected value  {:.6}", model.expected_value);
        println!("  features        {}", model.features.join(", "));
    }
    println!("scaler: {} features", summary.scaler.features.len());
    println!("  sha256          {}", summary.scaler.sha256);
    println!("  features        {}", summary.scaler.features.join(", "));
    println!("full bypass:  {}", summary.full_bypass.join(", "));
    println!("top20 bypass: {}", summary.top20_bypass.join(", "));
    Ok(())
}

fn sample(bundle: &ModelBundle, variant: Variant) -> anyhow::Result<()> {
    let input = sample_input();
    let resolved = bundle.model_input_sources(variant, &input)?;
    let prediction = bundle.predict(variant, &input)?;

    println!("{:<32} {:>14} {:>12}  source", "feature", "input", "shap");
    for (name, (value, source)) in bundle.vocabulary(variant).iter().zip(&resolved) {
        let shap = prediction.attributions.get(name).unwrap_or(0.0);
        println!("{:<32} {:>14.6} {:>12.6}  {}", name, value, shap, source.as_str());
    }

    let level = RiskLevel::from_probability(prediction.probability);
    println!(
        "\n{} probability {:.4} ({:.1}%), risk {}",
        variant.as_str(),
        prediction.probability,
        prediction.probability * 100.0,
        level.as_str()
    );
    Ok(())
}
