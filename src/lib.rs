pub mod artifact;
pub mod build;
pub mod definition;
pub mod deploy;
pub mod error;
pub mod fetch;
pub mod handler;
pub mod lockfile;
pub mod observability;
pub mod pipeline;
pub mod recipe;
pub mod template;
pub mod validation;

pub use artifact::{ArtifactId, ArtifactLedger, ProducedArtifact, StoreLocation};
pub use definition::PipelineDefinition;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Orchestrator, Pipeline, RunReport, RunStatus};
