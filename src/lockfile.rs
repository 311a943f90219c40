use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::definition::{ActionSpec, PipelineDefinition};

/// Snapshot of a pipeline's shape: per-action content hashes so an operator
/// can tell whether a definition drifted since the last reviewed run.
#[derive(Debug, Serialize)]
pub struct PipelineLock {
    pub pipeline_version: u32,
    pub generated_at: DateTime<Utc>,
    pub artifacts: Vec<String>,
    pub stages: Vec<StageLock>,
}

#[derive(Debug, Serialize)]
pub struct StageLock {
    pub name: String,
    pub actions: Vec<ActionLock>,
}

#[derive(Debug, Serialize)]
pub struct ActionLock {
    pub name: String,
    pub kind: &'static str,
    pub spec_hash: String,
}

pub fn generate_lock(definition: &PipelineDefinition, path: &Path) -> Result<()> {
    let stages = definition
        .stages
        .iter()
        .map(|stage| StageLock {
            name: stage.name.clone(),
            actions: stage
                .actions
                .iter()
                .map(|action| ActionLock {
                    name: action.name().to_string(),
                    kind: action_kind(action),
                    spec_hash: hash_action(action),
                })
                .collect(),
        })
        .collect();

    let lock = PipelineLock {
        pipeline_version: definition.version,
        generated_at: Utc::now(),
        artifacts: definition.artifact_ids().map(|id| id.to_string()).collect(),
        stages,
    };

    let file = File::create(path)
        .with_context(|| format!("Failed to create lockfile: {}", path.display()))?;
    serde_yaml::to_writer(file, &lock)
        .with_context(|| format!("Failed to write lockfile: {}", path.display()))?;

    Ok(())
}

fn action_kind(action: &ActionSpec) -> &'static str {
    match action {
        ActionSpec::Fetch(_) => "fetch",
        ActionSpec::Build(_) => "build",
        ActionSpec::Deploy(_) => "deploy",
    }
}

fn hash_action(action: &ActionSpec) -> String {
    let mut hasher = Sha256::new();
    let serialized = serde_json::to_vec(action).unwrap_or_default();
    hasher.update(action.name().as_bytes());
    hasher.update(serialized);
    format!("{:x}", hasher.finalize())
}
