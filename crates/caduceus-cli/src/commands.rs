use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use caduceus_core::{
    DraftAnswer, EvidenceBundle, GroundingVerifier, RedactionMode, RunStatus, RunView,
    VerifierConfig,
};
use caduceus_runtime::{
    ExtractiveGenerator, KeywordIntakeClassifier, Pipeline, RunRegistry, RuntimeConfig,
};

use crate::corpus;

const POLL: Duration = Duration::from_millis(25);

/// Load the runtime config, or defaults when none is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

pub async fn ask(
    mut config: RuntimeConfig,
    request: &str,
    user: Option<String>,
    multi_backend: bool,
    json: bool,
) -> anyhow::Result<()> {
    if multi_backend {
        config.retrieval.multi_backend = true;
    }

    let mut builder = Pipeline::builder(config)
        .intake(Arc::new(KeywordIntakeClassifier::new()))
        .metrics(Arc::new(corpus::metrics()))
        .generator(Arc::new(ExtractiveGenerator::default()));
    for backend in corpus::backends() {
        builder = builder.backend(backend);
    }
    let registry = RunRegistry::new(builder.build().context("failed to build pipeline")?);

    let id = registry.start(request, user)?;
    let run = registry
        .wait_for_terminal(&id, POLL)
        .await
        .context("run disappeared from the registry")?;
    let view = RunView::from(&run);
    view.validate().context("run view does not match its schema")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_view(&view);
    }

    Ok(())
}

fn print_view(view: &RunView) {
    println!("Run:    {}", view.id);
    println!("Status: {}", view.status);
    println!(
        "Steps:  {}/{}",
        view.progress.steps_completed, view.progress.total_steps
    );
    println!();

    match view.status {
        RunStatus::Completed => {
            println!("{}", view.answer.as_deref().unwrap_or_default());
        }
        RunStatus::Abstained => {
            if let Some(reason) = view.abstention_reason {
                println!("Abstained ({})", reason);
            }
            println!("{}", view.refusal.as_deref().unwrap_or_default());
        }
        RunStatus::Failed => {
            if let Some(error) = &view.error {
                println!("Failed ({})", error.kind.as_str());
                println!("{}", error.message);
            }
        }
        _ => {}
    }
}

/// Returns whether the draft passed.
pub fn verify(draft: &Path, bundle: &Path, aggressive: bool) -> anyhow::Result<bool> {
    let draft: DraftAnswer = read_json(draft)?;
    let bundle: EvidenceBundle = read_json(bundle)?;

    let verifier = GroundingVerifier::with_config(VerifierConfig {
        redaction: if aggressive {
            RedactionMode::Aggressive
        } else {
            RedactionMode::Standard
        },
        ..VerifierConfig::default()
    });
    let result = verifier.verify(&draft, &bundle);

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.passed)
}

pub fn check_config(file: &Path) -> anyhow::Result<()> {
    let config = RuntimeConfig::from_file(file)
        .with_context(|| format!("invalid config {}", file.display()))?;

    println!("Config OK: {}", file.display());
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
