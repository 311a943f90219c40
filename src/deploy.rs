use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{info, instrument};

use crate::artifact::{ArtifactId, ProducedArtifact};
use crate::definition::DeploySpec;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Action, RunContext};
use crate::template::{ParameterBinding, ResolvedTemplate, TemplateDocument, bind};

/// Permission scope granted to a deployment. Deploying requires at least
/// `Deploy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    ReadOnly,
    #[default]
    Deploy,
    Admin,
}

impl PermissionScope {
    pub fn allows_deploy(self) -> bool {
        matches!(self, PermissionScope::Deploy | PermissionScope::Admin)
    }
}

impl std::fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PermissionScope::ReadOnly => "read_only",
            PermissionScope::Deploy => "deploy",
            PermissionScope::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// Result of applying a resolved template to a target.
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub target: String,
    /// False when the template matched the deployed state and the call was
    /// a no-op.
    pub applied: bool,
    pub revision: u64,
    pub endpoint: String,
    pub content_hash: String,
}

/// Applies a resolved template to a named target as an idempotent upsert.
/// Deployments to one target are serialized; the target is never left
/// half-applied.
#[async_trait]
pub trait DeploymentExecutor: Send + Sync {
    async fn apply(
        &self,
        template: &ResolvedTemplate,
        target: &str,
        scope: PermissionScope,
    ) -> PipelineResult<DeployOutcome>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StackState {
    target: String,
    content_hash: String,
    revision: u64,
    updated_at: DateTime<Utc>,
}

/// Filesystem-backed deployment executor. Stack state lives under a state
/// directory, one subdirectory per target; the stored content hash decides
/// between update and no-op.
pub struct StackStore {
    state_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StackStore {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn target_lock(&self, target: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("stack store lock table poisoned");
        Arc::clone(
            locks
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Claim exclusive access to a target for the duration of one
    /// deployment. Fails with `Conflict` while another deployment to the
    /// same target holds the lease.
    pub fn begin(&self, target: &str) -> PipelineResult<DeployLease> {
        let lock = self.target_lock(target);
        let guard = lock
            .try_lock_owned()
            .map_err(|_| PipelineError::Conflict {
                target: target.to_string(),
            })?;
        Ok(DeployLease { _guard: guard })
    }

    fn load_state(&self, target: &str) -> Option<StackState> {
        let path = self.state_dir.join(target).join("stack.yaml");
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str(&content).ok()
    }

    fn persist(
        &self,
        target: &str,
        template: &ResolvedTemplate,
        revision: u64,
    ) -> PipelineResult<()> {
        let dir = self.state_dir.join(target);
        fs::create_dir_all(&dir).map_err(|err| store_error(target, err))?;

        // Write-then-rename so a failed apply leaves the prior state intact.
        let template_tmp = dir.join("template.yaml.tmp");
        fs::write(&template_tmp, &template.body).map_err(|err| store_error(target, err))?;
        fs::rename(&template_tmp, dir.join("template.yaml"))
            .map_err(|err| store_error(target, err))?;

        let state = StackState {
            target: target.to_string(),
            content_hash: template.content_hash.clone(),
            revision,
            updated_at: Utc::now(),
        };
        let state_yaml = serde_yaml::to_string(&state).map_err(|err| PipelineError::Action {
            action: format!("deploy '{target}'"),
            source: err.into(),
        })?;
        let state_tmp = dir.join("stack.yaml.tmp");
        fs::write(&state_tmp, state_yaml).map_err(|err| store_error(target, err))?;
        fs::rename(&state_tmp, dir.join("stack.yaml")).map_err(|err| store_error(target, err))?;
        Ok(())
    }
}

/// Exclusive per-target deployment lease; released on drop.
pub struct DeployLease {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

fn store_error(target: &str, err: std::io::Error) -> PipelineError {
    PipelineError::Action {
        action: format!("deploy '{target}'"),
        source: err.into(),
    }
}

/// Structural checks on a resolved template before it touches the target:
/// it must be a YAML document with a non-empty `Resources` section and no
/// leftover placeholder tokens.
pub fn validate_template(template: &ResolvedTemplate, target: &str) -> PipelineResult<()> {
    if template.body.contains("{{") {
        return Err(PipelineError::TemplateValidation {
            target: target.to_string(),
            reason: "unresolved placeholder tokens remain".to_string(),
        });
    }
    let value: Value =
        serde_yaml::from_str(&template.body).map_err(|err| PipelineError::TemplateValidation {
            target: target.to_string(),
            reason: format!("not a YAML document: {err}"),
        })?;
    let resources = value
        .get("Resources")
        .and_then(Value::as_mapping)
        .ok_or_else(|| PipelineError::TemplateValidation {
            target: target.to_string(),
            reason: "missing 'Resources' section".to_string(),
        })?;
    if resources.is_empty() {
        return Err(PipelineError::TemplateValidation {
            target: target.to_string(),
            reason: "'Resources' section is empty".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl DeploymentExecutor for StackStore {
    #[instrument(skip(self, template))]
    async fn apply(
        &self,
        template: &ResolvedTemplate,
        target: &str,
        scope: PermissionScope,
    ) -> PipelineResult<DeployOutcome> {
        if !scope.allows_deploy() {
            return Err(PipelineError::Permission {
                target: target.to_string(),
                scope: scope.to_string(),
            });
        }

        validate_template(template, target)?;

        let _lease = self.begin(target)?;

        let endpoint = format!("stack://{target}");
        if let Some(state) = self.load_state(target) {
            if state.content_hash == template.content_hash {
                info!(target, "Template unchanged; deployment is a no-op");
                return Ok(DeployOutcome {
                    target: target.to_string(),
                    applied: false,
                    revision: state.revision,
                    endpoint,
                    content_hash: state.content_hash,
                });
            }
            let revision = state.revision + 1;
            self.persist(target, template, revision)?;
            info!(target, revision, "Stack updated");
            return Ok(DeployOutcome {
                target: target.to_string(),
                applied: true,
                revision,
                endpoint,
                content_hash: template.content_hash.clone(),
            });
        }

        self.persist(target, template, 1)?;
        info!(target, "Stack created");
        Ok(DeployOutcome {
            target: target.to_string(),
            applied: true,
            revision: 1,
            endpoint,
            content_hash: template.content_hash.clone(),
        })
    }
}

/// Binds sibling artifacts into a synthesized template and applies the
/// result to the target stack.
pub struct DeployAction {
    spec: DeploySpec,
    executor: Arc<dyn DeploymentExecutor>,
}

impl DeployAction {
    pub fn new(spec: DeploySpec, executor: Arc<dyn DeploymentExecutor>) -> Self {
        Self { spec, executor }
    }

    fn read_template(&self, ctx: &RunContext) -> PipelineResult<TemplateDocument> {
        let dir = ctx.artifact_dir(&self.spec.template);
        let mut files = Vec::new();
        if let Ok(entries) = fs::read_dir(&dir) {
            for entry in entries.flatten() {
                if entry.path().is_file() {
                    files.push(entry.path());
                }
            }
        }
        files.sort();
        let path = files.into_iter().next().ok_or_else(|| PipelineError::TemplateValidation {
            target: self.spec.target.clone(),
            reason: format!("template artifact '{}' holds no files", self.spec.template),
        })?;
        let raw = fs::read_to_string(&path).map_err(|err| PipelineError::Action {
            action: self.spec.name.clone(),
            source: err.into(),
        })?;
        TemplateDocument::parse(raw)
    }
}

#[async_trait]
impl Action for DeployAction {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn input_artifacts(&self) -> Vec<ArtifactId> {
        let mut ids = vec![self.spec.template.clone()];
        ids.extend(self.spec.parameters.values().cloned());
        ids
    }

    fn output_artifacts(&self) -> Vec<ArtifactId> {
        Vec::new()
    }

    async fn execute(&self, ctx: &RunContext) -> PipelineResult<Vec<ProducedArtifact>> {
        ctx.ledger.require(&self.spec.template)?;
        let template = self.read_template(ctx)?;

        let mut bindings = Vec::with_capacity(self.spec.parameters.len());
        for (placeholder, artifact) in &self.spec.parameters {
            // Only resolved artifacts may be bound; the producing stage's
            // barrier has already cleared when this action runs.
            let value = ctx.ledger.require(artifact)?;
            bindings.push(ParameterBinding {
                placeholder_name: placeholder.clone(),
                resolved_from: artifact.clone(),
                value,
            });
        }

        let resolved = bind(&template, &bindings)?;
        let outcome = self
            .executor
            .apply(&resolved, &self.spec.target, self.spec.scope)
            .await?;
        info!(
            target = outcome.target.as_str(),
            applied = outcome.applied,
            revision = outcome.revision,
            endpoint = outcome.endpoint.as_str(),
            "Deployment finished"
        );
        Ok(Vec::new())
    }
}
