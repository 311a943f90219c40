use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use serde::{Deserialize, Serialize};

/// Declarative build recipe: ordered command phases, an output file
/// selector, and environment values injected into every command.
/// Immutable once attached to a build action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecipe {
    pub phases: Vec<Phase>,
    pub output_selector: OutputSelector,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Placeholder names a synthesized template may reference. Empty for
    /// plain build actions.
    #[serde(default)]
    pub placeholders: Vec<String>,
}

impl BuildRecipe {
    pub fn is_synthesis(&self) -> bool {
        !self.placeholders.is_empty()
    }
}

/// One named group of shell commands, run strictly in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub commands: Vec<String>,
}

/// Glob patterns rooted at a base directory inside the build workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSelector {
    #[serde(default = "default_base_directory")]
    pub base_directory: String,
    pub patterns: Vec<String>,
}

fn default_base_directory() -> String {
    ".".to_string()
}

impl OutputSelector {
    /// Resolve the selector against a concrete workspace root, returning the
    /// matched files in sorted order. An empty match set is reported by the
    /// caller as `OutputNotFound`; this only fails on malformed patterns.
    pub fn select(&self, workspace: &Path) -> Result<Vec<PathBuf>> {
        let base = workspace.join(&self.base_directory);
        let mut selected = Vec::new();
        for pattern in &self.patterns {
            let full = base.join(pattern);
            let full = full.to_string_lossy().to_string();
            let matches =
                glob(&full).with_context(|| format!("Invalid output pattern: {pattern}"))?;
            for entry in matches {
                let path = entry?;
                if path.is_file() {
                    selected.push(path);
                }
            }
        }
        selected.sort();
        selected.dedup();
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn selector_matches_relative_to_base_directory() {
        let temp = tempdir().unwrap();
        let out = temp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("app.template.yaml"), "Resources: {}\n").unwrap();
        fs::write(temp.path().join("ignored.yaml"), "x").unwrap();

        let selector = OutputSelector {
            base_directory: "out".to_string(),
            patterns: vec!["*.template.yaml".to_string()],
        };
        let files = selector.select(temp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("app.template.yaml"));
    }

    #[test]
    fn selector_returns_empty_for_no_matches() {
        let temp = tempdir().unwrap();
        let selector = OutputSelector {
            base_directory: ".".to_string(),
            patterns: vec!["*.zip".to_string()],
        };
        let files = selector.select(temp.path()).unwrap();
        assert!(files.is_empty());
    }
}
