use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, PipelineResult};

/// Name of an artifact inside one pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Concrete location of a produced artifact: a store (directory, bucket)
/// plus an object key inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLocation {
    pub store: String,
    pub key: String,
}

impl StoreLocation {
    pub fn new(store: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.key)
    }
}

/// A produced artifact as reported by the action that built it. The
/// orchestrator commits these into the [`ArtifactLedger`] once the whole
/// stage has succeeded.
#[derive(Debug, Clone)]
pub struct ProducedArtifact {
    pub id: ArtifactId,
    pub location: StoreLocation,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    producer: String,
    location: Option<StoreLocation>,
    content_hash: Option<String>,
}

/// Append-only map from artifact id to its resolved store location.
///
/// Every artifact is registered up front with the name of its producing
/// action; the location is committed exactly once, under the stage barrier.
/// Reads from later stages only ever observe fully committed locations.
#[derive(Debug, Default)]
pub struct ArtifactLedger {
    entries: Mutex<HashMap<ArtifactId, LedgerEntry>>,
}

impl ArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an artifact and the action allowed to commit its location.
    pub fn register(&self, id: ArtifactId, producer: impl Into<String>) {
        let mut entries = self.entries.lock().expect("artifact ledger poisoned");
        entries.entry(id).or_insert(LedgerEntry {
            producer: producer.into(),
            location: None,
            content_hash: None,
        });
    }

    /// Commit the location of a produced artifact. Fails if the location was
    /// already committed or if the committing action is not the registered
    /// producer.
    pub fn commit(&self, produced: &ProducedArtifact, action: &str) -> PipelineResult<()> {
        let mut entries = self.entries.lock().expect("artifact ledger poisoned");
        let entry = entries
            .get_mut(&produced.id)
            .ok_or_else(|| PipelineError::UnresolvedArtifact {
                artifact: produced.id.to_string(),
            })?;
        if entry.location.is_some() {
            return Err(PipelineError::LocationAlreadyCommitted {
                artifact: produced.id.to_string(),
                producer: entry.producer.clone(),
            });
        }
        if entry.producer != action {
            return Err(PipelineError::LocationAlreadyCommitted {
                artifact: produced.id.to_string(),
                producer: entry.producer.clone(),
            });
        }
        entry.location = Some(produced.location.clone());
        entry.content_hash = produced.content_hash.clone();
        Ok(())
    }

    /// Resolved location of an artifact, if its producing stage completed.
    pub fn resolve(&self, id: &ArtifactId) -> Option<StoreLocation> {
        let entries = self.entries.lock().expect("artifact ledger poisoned");
        entries.get(id).and_then(|e| e.location.clone())
    }

    /// Location of an artifact required as an action input; fails fast when
    /// the artifact has not been produced yet.
    pub fn require(&self, id: &ArtifactId) -> PipelineResult<StoreLocation> {
        self.resolve(id)
            .ok_or_else(|| PipelineError::UnresolvedArtifact {
                artifact: id.to_string(),
            })
    }

    pub fn content_hash(&self, id: &ArtifactId) -> Option<String> {
        let entries = self.entries.lock().expect("artifact ledger poisoned");
        entries.get(id).and_then(|e| e.content_hash.clone())
    }

    pub fn is_registered(&self, id: &ArtifactId) -> bool {
        let entries = self.entries.lock().expect("artifact ledger poisoned");
        entries.contains_key(id)
    }
}

/// Hex-encoded SHA256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
