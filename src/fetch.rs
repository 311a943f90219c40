use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::artifact::{ArtifactId, ProducedArtifact, StoreLocation, sha256_hex};
use crate::definition::FetchSpec;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Action, RunContext};

/// Run-time secret resolution. Tokens never live in pipeline definitions;
/// a definition names a secret and the store resolves it per run.
pub trait SecretStore: Send + Sync {
    fn resolve(&self, name: &str) -> Result<String>;
}

/// Secrets resolved from process environment variables.
#[derive(Debug, Default)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn resolve(&self, name: &str) -> Result<String> {
        std::env::var(name).with_context(|| format!("Secret '{name}' is not set"))
    }
}

/// External source host: fetches a branch archive as raw bytes.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        token: &str,
    ) -> PipelineResult<Vec<u8>>;
}

/// Fetches branch tarballs over HTTPS from a GitHub-style archive endpoint.
pub struct GitHubArchiveProvider {
    client: reqwest::Client,
    base_url: String,
}

impl GitHubArchiveProvider {
    pub fn new() -> Self {
        Self::with_base_url("https://codeload.github.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for GitHubArchiveProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceProvider for GitHubArchiveProvider {
    async fn fetch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        token: &str,
    ) -> PipelineResult<Vec<u8>> {
        let url = format!("{}/{owner}/{repo}/tar.gz/refs/heads/{branch}", self.base_url);
        debug!(%url, "Fetching source archive");
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| PipelineError::Network {
                repo: format!("{owner}/{repo}"),
                source: err.into(),
            })?;

        match response.status().as_u16() {
            200 => response
                .bytes()
                .await
                .map(|bytes| bytes.to_vec())
                .map_err(|err| PipelineError::Network {
                    repo: format!("{owner}/{repo}"),
                    source: err.into(),
                }),
            401 | 403 => Err(PipelineError::Authentication {
                repo: format!("{owner}/{repo}"),
                reason: format!("host returned {}", response.status()),
            }),
            404 => Err(PipelineError::NotFound {
                repo: format!("{owner}/{repo}"),
                branch: branch.to_string(),
            }),
            status => Err(PipelineError::Network {
                repo: format!("{owner}/{repo}"),
                source: anyhow!("unexpected status {status}"),
            }),
        }
    }
}

/// Retry settings for transient network failures during fetch. Only
/// `Network` errors are retried; authentication and not-found failures are
/// terminal.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(200),
        }
    }
}

/// Fetches one repository branch into a fresh artifact at pipeline start.
pub struct FetchAction {
    spec: FetchSpec,
    secrets: Arc<dyn SecretStore>,
    provider: Arc<dyn SourceProvider>,
    retry: RetryPolicy,
}

impl FetchAction {
    pub fn new(
        spec: FetchSpec,
        secrets: Arc<dyn SecretStore>,
        provider: Arc<dyn SourceProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            spec,
            secrets,
            provider,
            retry,
        }
    }

    async fn fetch_with_retry(&self, token: &str) -> PipelineResult<Vec<u8>> {
        let mut delay = self.retry.initial_delay;
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match self
                .provider
                .fetch(&self.spec.owner, &self.spec.repo, &self.spec.branch, token)
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(err @ PipelineError::Network { .. }) if attempt < attempts => {
                    warn!(
                        action = self.spec.name.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient fetch failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }
        unreachable!("loop returns on final attempt")
    }
}

#[async_trait]
impl Action for FetchAction {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn input_artifacts(&self) -> Vec<ArtifactId> {
        Vec::new()
    }

    fn output_artifacts(&self) -> Vec<ArtifactId> {
        vec![self.spec.output.clone()]
    }

    async fn execute(&self, ctx: &RunContext) -> PipelineResult<Vec<ProducedArtifact>> {
        let token = self
            .secrets
            .resolve(&self.spec.token_secret)
            .map_err(|err| PipelineError::Authentication {
                repo: format!("{}/{}", self.spec.owner, self.spec.repo),
                reason: err.to_string(),
            })?;

        let bytes = self.fetch_with_retry(&token).await?;
        let content_hash = sha256_hex(&bytes);

        let dir = ctx.artifact_dir(&self.spec.output);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|err| wrap_io(&self.spec.name, err))?;
        }
        fs::create_dir_all(&dir).map_err(|err| wrap_io(&self.spec.name, err))?;
        let file = dir.join("source.tar.gz");
        fs::write(&file, &bytes).map_err(|err| wrap_io(&self.spec.name, err))?;

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

fn wrap_io(action: &str, err: std::io::Error) -> PipelineError {
    PipelineError::Action {
        action: action.to_string(),
        source: err.into(),
    }
}
