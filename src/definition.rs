use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactId;
use crate::deploy::PermissionScope;
use crate::recipe::BuildRecipe;

/// On-disk pipeline definition: declared artifacts plus an ordered list of
/// stages, each holding the actions dispatched concurrently at that stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub version: u32,
    pub artifacts: Vec<ArtifactDecl>,
    pub stages: Vec<StageSpec>,
}

impl PipelineDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
        let definition: PipelineDefinition = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse pipeline YAML: {}", path.display()))?;
        Ok(definition)
    }

    pub fn artifact_ids(&self) -> impl Iterator<Item = &ArtifactId> {
        self.artifacts.iter().map(|a| &a.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDecl {
    pub id: ArtifactId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub actions: Vec<ActionSpec>,
}

/// Declared pipeline action. The capability set is closed: fetch a source,
/// run a build recipe, or deploy a resolved template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpec {
    Fetch(FetchSpec),
    Build(BuildSpec),
    Deploy(DeploySpec),
}

impl ActionSpec {
    pub fn name(&self) -> &str {
        match self {
            ActionSpec::Fetch(spec) => &spec.name,
            ActionSpec::Build(spec) => &spec.name,
            ActionSpec::Deploy(spec) => &spec.name,
        }
    }

    /// Artifact ids this action reads. Deploy parameters count as inputs:
    /// they must be produced by an earlier stage.
    pub fn inputs(&self) -> Vec<&ArtifactId> {
        match self {
            ActionSpec::Fetch(_) => Vec::new(),
            ActionSpec::Build(spec) => vec![&spec.input],
            ActionSpec::Deploy(spec) => {
                let mut ids: Vec<&ArtifactId> = vec![&spec.template];
                ids.extend(spec.parameters.values());
                ids
            }
        }
    }

    /// Artifact ids this action produces.
    pub fn outputs(&self) -> Vec<&ArtifactId> {
        match self {
            ActionSpec::Fetch(spec) => vec![&spec.output],
            ActionSpec::Build(spec) => vec![&spec.output],
            ActionSpec::Deploy(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSpec {
    pub name: String,
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Name of the secret holding the OAuth token, resolved from the secret
    /// store at run time. Never a literal token.
    pub token_secret: String,
    pub output: ArtifactId,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    pub name: String,
    pub input: ArtifactId,
    pub output: ArtifactId,
    pub recipe: BuildRecipe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySpec {
    pub name: String,
    /// Artifact holding the synthesized template.
    pub template: ArtifactId,
    /// Target stack identifier; deployments to one target are serialized.
    pub target: String,
    /// Placeholder name -> artifact whose store location fills it.
    #[serde(default)]
    pub parameters: BTreeMap<String, ArtifactId>,
    #[serde(default)]
    pub scope: PermissionScope,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE_YAML: &str = r#"
version: 1
artifacts:
  - id: infra_source
  - id: app_source
  - id: app_template
  - id: function_bundle
stages:
  - name: source
    actions:
      - kind: fetch
        name: infra_github_source
        owner: aws-samples
        repo: infra-repo
        token_secret: GITHUB_TOKEN
        output: infra_source
      - kind: fetch
        name: app_github_source
        owner: aws-samples
        repo: app-repo
        branch: main
        token_secret: GITHUB_TOKEN
        output: app_source
  - name: build
    actions:
      - kind: build
        name: template_synth
        input: infra_source
        output: app_template
        recipe:
          phases:
            - name: install
              commands: ["echo install"]
            - name: build
              commands: ["echo build"]
          output_selector:
            base_directory: .
            patterns: ["*.template.yaml"]
          placeholders: [FunctionBucket, FunctionKey]
      - kind: build
        name: function_build
        input: app_source
        output: function_bundle
        recipe:
          phases:
            - name: package
              commands: ["echo package"]
          output_selector:
            patterns: ["app.py"]
  - name: deploy
    actions:
      - kind: deploy
        name: stack_deploy
        template: app_template
        target: application-stack
        scope: deploy
        parameters:
          FunctionBucket: function_bundle
          FunctionKey: function_bundle
"#;

    #[test]
    fn parses_full_definition() {
        let definition: PipelineDefinition = serde_yaml::from_str(PIPELINE_YAML).unwrap();
        assert_eq!(definition.version, 1);
        assert_eq!(definition.stages.len(), 3);
        assert_eq!(definition.stages[0].actions.len(), 2);

        let synth = &definition.stages[1].actions[0];
        match synth {
            ActionSpec::Build(spec) => {
                assert!(spec.recipe.is_synthesis());
                assert_eq!(spec.recipe.phases[0].name, "install");
            }
            other => panic!("expected build action, got {other:?}"),
        }

        let deploy = &definition.stages[2].actions[0];
        assert_eq!(deploy.inputs().len(), 3);
        assert!(deploy.outputs().is_empty());
    }
}
