use std::fs;
use std::path::Path;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info};

use crate::artifact::{ArtifactId, ProducedArtifact, StoreLocation};
use crate::definition::BuildSpec;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Action, RunContext};
use crate::recipe::BuildRecipe;

/// Executes a build recipe against an input artifact inside an ephemeral
/// scratch directory: phases strictly in order, first nonzero exit aborts,
/// outputs selected by glob after all phases succeed.
pub struct BuildAction {
    spec: BuildSpec,
}

impl BuildAction {
    pub fn new(spec: BuildSpec) -> Self {
        Self { spec }
    }

    async fn run_phases(&self, recipe: &BuildRecipe, workspace: &Path) -> PipelineResult<()> {
        for phase in &recipe.phases {
            debug!(
                action = self.spec.name.as_str(),
                phase = phase.name.as_str(),
                "Running build phase"
            );
            for command in &phase.commands {
                let status = Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .current_dir(workspace)
                    .envs(&recipe.env)
                    .status()
                    .await
                    .map_err(|err| PipelineError::Action {
                        action: self.spec.name.clone(),
                        source: anyhow::Error::from(err)
                            .context(format!("Failed to spawn command in phase '{}'", phase.name)),
                    })?;
                if !status.success() {
                    // Remaining phases are skipped; no partial output is
                    // ever copied into the store.
                    return Err(PipelineError::Build {
                        phase: phase.name.clone(),
                        exit_status: status.code().unwrap_or(-1),
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Action for BuildAction {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn input_artifacts(&self) -> Vec<ArtifactId> {
        vec![self.spec.input.clone()]
    }

    fn output_artifacts(&self) -> Vec<ArtifactId> {
        vec![self.spec.output.clone()]
    }

    async fn execute(&self, ctx: &RunContext) -> PipelineResult<Vec<ProducedArtifact>> {
        // The stage barrier guarantees the input location is committed.
        ctx.ledger.require(&self.spec.input)?;

        let workspace = ctx
            .scratch_dir(&self.spec.name)
            .map_err(|err| wrap(&self.spec.name, err))?;
        let input_dir = ctx.artifact_dir(&self.spec.input);
        copy_tree(&input_dir, &workspace).map_err(|err| wrap(&self.spec.name, err))?;

        self.run_phases(&self.spec.recipe, &workspace).await?;

        let selector = &self.spec.recipe.output_selector;
        let selected = selector
            .select(&workspace)
            .map_err(|err| wrap(&self.spec.name, err))?;
        if selected.is_empty() {
            return Err(PipelineError::OutputNotFound {
                base_directory: selector.base_directory.clone(),
                patterns: selector.patterns.clone(),
            });
        }

        let base = workspace.join(&selector.base_directory);
        let out_dir = ctx.artifact_dir(&self.spec.output);
        if out_dir.exists() {
            fs::remove_dir_all(&out_dir).map_err(|err| wrap(&self.spec.name, err.into()))?;
        }
        fs::create_dir_all(&out_dir).map_err(|err| wrap(&self.spec.name, err.into()))?;

        let mut hasher = Sha256::new();
        for file in &selected {
            let relative = file.strip_prefix(&base).unwrap_or(file.as_path());
            let destination = out_dir.join(relative);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(|err| wrap(&self.spec.name, err.into()))?;
            }
            let bytes = fs::read(file).map_err(|err| wrap(&self.spec.name, err.into()))?;
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update(&bytes);
            fs::write(&destination, bytes).map_err(|err| wrap(&self.spec.name, err.into()))?;
        }
        let content_hash = format!("{:x}", hasher.finalize());

        info!(
            action = self.spec.name.as_str(),
            artifact = self.spec.output.as_str(),
            files = selected.len(),
            "Build outputs selected"
        );

        Ok(vec![ProducedArtifact {
            id: self.spec.output.clone(),
            location: StoreLocation::new(
                ctx.store_root().to_string_lossy(),
                self.spec.output.as_str(),
            ),
            content_hash: Some(content_hash),
        }])
    }
}

fn wrap(action: &str, err: anyhow::Error) -> PipelineError {
    PipelineError::Action {
        action: action.to_string(),
        source: err,
    }
}

/// Copy a directory tree into `destination`, preserving relative layout.
fn copy_tree(source: &Path, destination: &Path) -> anyhow::Result<()> {
    if !source.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&target)?;
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
