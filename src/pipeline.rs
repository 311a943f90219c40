use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::artifact::{ArtifactId, ArtifactLedger, ProducedArtifact};
use crate::build::BuildAction;
use crate::definition::{ActionSpec, PipelineDefinition};
use crate::deploy::{DeployAction, DeploymentExecutor};
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::{FetchAction, RetryPolicy, SecretStore, SourceProvider};
use crate::observability::MetricsCollector;

/// One pipeline action: fetch a source, run a build recipe, or deploy a
/// resolved template. Actions declare the artifacts they read and produce;
/// the orchestrator owns commit of produced locations.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;
    fn input_artifacts(&self) -> Vec<ArtifactId>;
    fn output_artifacts(&self) -> Vec<ArtifactId>;
    async fn execute(&self, ctx: &RunContext) -> PipelineResult<Vec<ProducedArtifact>>;
}

/// Shared run state handed to every action: the artifact ledger, the
/// artifact store root on disk, and the metrics collector.
pub struct RunContext {
    pub ledger: ArtifactLedger,
    store_root: PathBuf,
    pub metrics: MetricsCollector,
}

impl RunContext {
    pub fn new(store_root: PathBuf) -> Self {
        Self {
            ledger: ArtifactLedger::new(),
            store_root,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    /// Directory inside the store where an artifact's files live.
    pub fn artifact_dir(&self, id: &ArtifactId) -> PathBuf {
        self.store_root.join(id.as_str())
    }

    /// Fresh scratch directory for one action. Any leftovers from a previous
    /// run are removed first; re-runs always fully overwrite their outputs.
    pub fn scratch_dir(&self, action: &str) -> Result<PathBuf> {
        let dir = self.store_root.join(".work").join(action);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to clear scratch dir: {}", dir.display()))?;
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create scratch dir: {}", dir.display()))?;
        Ok(dir)
    }
}

pub struct Stage {
    pub name: String,
    pub actions: Vec<Box<dyn Action>>,
}

/// Assembled pipeline: ordered stages of executable actions.
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed {
        stage: String,
        action: String,
        cause: String,
    },
    Cancelled {
        after_stage: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub status: RunStatus,
    pub completed_stages: Vec<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Cooperative cancellation handle. Checked at stage boundaries only:
/// in-flight actions run to completion, the next stage never starts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sequences stages, enforces the all-must-succeed barrier between them,
/// and commits artifact locations once a stage completes.
pub struct Orchestrator {
    ctx: RunContext,
    cancel: CancelFlag,
}

impl Orchestrator {
    pub fn new(store_root: PathBuf) -> Self {
        Self {
            ctx: RunContext::new(store_root),
            cancel: CancelFlag::new(),
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.ctx.metrics.clone()
    }

    #[instrument(skip_all)]
    pub async fn run(&self, pipeline: &Pipeline) -> RunReport {
        self.ctx.metrics.reset();
        let run_timer = self.ctx.metrics.start_run();

        for stage in &pipeline.stages {
            for action in &stage.actions {
                for output in action.output_artifacts() {
                    self.ctx.ledger.register(output, action.name());
                }
            }
        }

        let mut completed_stages = Vec::new();
        for stage in &pipeline.stages {
            if self.cancel.is_cancelled() {
                let after_stage = completed_stages.last().cloned().unwrap_or_default();
                warn!(stage = stage.name.as_str(), "Pipeline cancelled before stage");
                drop(run_timer);
                return RunReport {
                    status: RunStatus::Cancelled { after_stage },
                    completed_stages,
                };
            }

            if let Err((action, cause)) = self.run_stage(stage).await {
                self.ctx.metrics.record_run_failure();
                drop(run_timer);
                return RunReport {
                    status: RunStatus::Failed {
                        stage: stage.name.clone(),
                        action,
                        cause,
                    },
                    completed_stages,
                };
            }
            completed_stages.push(stage.name.clone());
            info!(stage = stage.name.as_str(), "Stage barrier cleared");
        }

        drop(run_timer);
        RunReport {
            status: RunStatus::Succeeded,
            completed_stages,
        }
    }

    /// Run every action of one stage concurrently and await them all.
    /// The first failure in declaration order wins, regardless of which
    /// action finished first. Output locations are committed only when the
    /// whole stage succeeded.
    async fn run_stage(&self, stage: &Stage) -> Result<(), (String, String)> {
        // Fail fast: every declared input must already be resolved.
        for action in &stage.actions {
            for input in action.input_artifacts() {
                if self.ctx.ledger.resolve(&input).is_none() {
                    let err = PipelineError::UnresolvedArtifact {
                        artifact: input.to_string(),
                    };
                    return Err((action.name().to_string(), err.to_string()));
                }
            }
        }

        let futures = stage.actions.iter().map(|action| {
            let name = action.name().to_string();
            async move {
                let _timer = self.ctx.metrics.start_action(&name);
                action.execute(&self.ctx).await
            }
        });
        let results = join_all(futures).await;

        for (action, result) in stage.actions.iter().zip(&results) {
            if let Err(err) = result {
                warn!(
                    stage = stage.name.as_str(),
                    action = action.name(),
                    error = %err,
                    "Action failed; halting pipeline"
                );
                return Err((action.name().to_string(), err.to_string()));
            }
        }

        for (action, result) in stage.actions.iter().zip(results) {
            let produced = result.expect("failures handled above");
            for artifact in &produced {
                if let Err(err) = self.ctx.ledger.commit(artifact, action.name()) {
                    return Err((action.name().to_string(), err.to_string()));
                }
                info!(
                    artifact = artifact.id.as_str(),
                    location = %artifact.location,
                    "Artifact location committed"
                );
            }
        }

        Ok(())
    }
}

/// External collaborators an assembled pipeline needs: the secret store,
/// the source provider, and the deployment executor.
pub struct AssemblyOptions {
    pub secrets: Arc<dyn SecretStore>,
    pub sources: Arc<dyn SourceProvider>,
    pub deployer: Arc<dyn DeploymentExecutor>,
    pub retry: RetryPolicy,
}

/// Turn a parsed definition into an executable pipeline. Independence of
/// actions within a stage is enforced here: two actions in the same stage
/// must not declare the same output artifact.
pub fn assemble_pipeline(
    definition: &PipelineDefinition,
    options: &AssemblyOptions,
) -> Result<Pipeline> {
    let mut stages = Vec::with_capacity(definition.stages.len());
    for stage_spec in &definition.stages {
        let mut seen_outputs: Vec<&ArtifactId> = Vec::new();
        for action in &stage_spec.actions {
            for output in action.outputs() {
                if seen_outputs.contains(&output) {
                    anyhow::bail!(
                        "Stage '{}' declares output artifact '{}' more than once",
                        stage_spec.name,
                        output
                    );
                }
                seen_outputs.push(output);
            }
        }

        let mut actions: Vec<Box<dyn Action>> = Vec::with_capacity(stage_spec.actions.len());
        for spec in &stage_spec.actions {
            let action: Box<dyn Action> = match spec {
                ActionSpec::Fetch(spec) => Box::new(FetchAction::new(
                    spec.clone(),
                    Arc::clone(&options.secrets),
                    Arc::clone(&options.sources),
                    options.retry.clone(),
                )),
                ActionSpec::Build(spec) => Box::new(BuildAction::new(spec.clone())),
                ActionSpec::Deploy(spec) => {
                    Box::new(DeployAction::new(spec.clone(), Arc::clone(&options.deployer)))
                }
            };
            actions.push(action);
        }
        stages.push(Stage {
            name: stage_spec.name.clone(),
            actions,
        });
    }
    Ok(Pipeline { stages })
}
