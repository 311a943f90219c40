use anyhow::Error as AnyhowError;
use thiserror::Error;

/// Failure taxonomy for every pipeline component. Each variant carries the
/// context an operator needs to decide whether a re-run is worth attempting.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Authentication rejected for '{repo}': {reason}")]
    Authentication { repo: String, reason: String },

    #[error("Repository or branch not found: {repo}@{branch}")]
    NotFound { repo: String, branch: String },

    #[error("Network failure while fetching '{repo}'. Source: {source}")]
    Network {
        repo: String,
        #[source]
        source: AnyhowError,
    },

    #[error("Build phase '{phase}' exited with status {exit_status}")]
    Build { phase: String, exit_status: i32 },

    #[error("Output selector matched no files (base '{base_directory}', patterns {patterns:?})")]
    OutputNotFound {
        base_directory: String,
        patterns: Vec<String>,
    },

    #[error("Template placeholder '{placeholder}' has no binding")]
    UnboundParameter { placeholder: String },

    #[error("Template placeholder '{placeholder}' has more than one binding")]
    AmbiguousBinding { placeholder: String },

    #[error("Permission scope {scope} is insufficient to deploy '{target}'")]
    Permission { target: String, scope: String },

    #[error("Template for target '{target}' failed validation: {reason}")]
    TemplateValidation { target: String, reason: String },

    #[error("A deployment to target '{target}' is already in progress")]
    Conflict { target: String },

    #[error("Upstream request failed. Source: {source}")]
    UpstreamRequest {
        #[source]
        source: AnyhowError,
    },

    #[error("Artifact '{artifact}' is not resolved; its producing stage has not completed")]
    UnresolvedArtifact { artifact: String },

    #[error("Artifact '{artifact}' location was already committed by '{producer}'")]
    LocationAlreadyCommitted { artifact: String, producer: String },

    #[error("Action '{action}' failed. Source: {source}")]
    Action {
        action: String,
        #[source]
        source: AnyhowError,
    },
}

pub type PipelineResult<T, E = PipelineError> = std::result::Result<T, E>;
