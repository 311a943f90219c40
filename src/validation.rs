use std::collections::HashSet;

use serde::Serialize;

use crate::artifact::ArtifactId;
use crate::definition::{ActionSpec, PipelineDefinition};

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Static checks over a pipeline definition: artifact wiring, stage
/// independence, and recipe shape. Anything that would make the
/// orchestrator fail at run time should be caught here first.
pub fn validate_definition(definition: &PipelineDefinition) -> ValidationReport {
    let mut report = ValidationReport::default();

    if definition.version != 1 {
        report
            .errors
            .push(format!("Unsupported pipeline version: {}", definition.version));
    }

    if definition.stages.is_empty() {
        report
            .errors
            .push("Pipeline must contain at least one stage".into());
    }

    let mut declared: HashSet<&ArtifactId> = HashSet::new();
    for artifact in &definition.artifacts {
        if !declared.insert(&artifact.id) {
            report
                .errors
                .push(format!("Artifact '{}' is declared more than once", artifact.id));
        }
    }

    let mut action_names: HashSet<&str> = HashSet::new();
    let mut produced_before: HashSet<&ArtifactId> = HashSet::new();
    let mut ever_produced: HashSet<&ArtifactId> = HashSet::new();
    let mut ever_consumed: HashSet<&ArtifactId> = HashSet::new();

    for stage in &definition.stages {
        if stage.actions.is_empty() {
            report
                .errors
                .push(format!("Stage '{}' has no actions", stage.name));
        }

        let mut stage_outputs: HashSet<&ArtifactId> = HashSet::new();
        for action in &stage.actions {
            if !action_names.insert(action.name()) {
                report.errors.push(format!(
                    "Action name '{}' is used more than once",
                    action.name()
                ));
            }

            for output in action.outputs() {
                if !declared.contains(output) {
                    report.errors.push(format!(
                        "Action '{}' produces undeclared artifact '{}'",
                        action.name(),
                        output
                    ));
                }
                if !stage_outputs.insert(output) {
                    report.errors.push(format!(
                        "Stage '{}' declares output artifact '{}' more than once",
                        stage.name, output
                    ));
                }
                if !ever_produced.insert(output) {
                    report.errors.push(format!(
                        "Artifact '{}' is produced by more than one action",
                        output
                    ));
                }
            }

            for input in action.inputs() {
                ever_consumed.insert(input);
                if !declared.contains(input) {
                    report.errors.push(format!(
                        "Action '{}' consumes undeclared artifact '{}'",
                        action.name(),
                        input
                    ));
                } else if !produced_before.contains(input) {
                    report.errors.push(format!(
                        "Action '{}' consumes artifact '{}' that no earlier stage produces",
                        action.name(),
                        input
                    ));
                }
            }

            report.merge(validate_action(action));
        }

        // Outputs become visible only past this stage's barrier.
        produced_before.extend(stage_outputs);
    }

    for artifact in &definition.artifacts {
        if !ever_produced.contains(&artifact.id) {
            report.warnings.push(format!(
                "Artifact '{}' is declared but never produced",
                artifact.id
            ));
        } else if !ever_consumed.contains(&artifact.id) {
            report.warnings.push(format!(
                "Artifact '{}' is produced but never consumed",
                artifact.id
            ));
        }
    }

    report
}

fn validate_action(action: &ActionSpec) -> ValidationReport {
    let mut report = ValidationReport::default();
    match action {
        ActionSpec::Fetch(spec) => {
            if spec.token_secret.trim().is_empty() {
                report.errors.push(format!(
                    "Fetch action '{}' must name a token secret",
                    spec.name
                ));
            }
            if spec.branch.trim().is_empty() {
                report
                    .errors
                    .push(format!("Fetch action '{}' has an empty branch", spec.name));
            }
        }
        ActionSpec::Build(spec) => {
            if spec.recipe.phases.is_empty() {
                report
                    .warnings
                    .push(format!("Build action '{}' has no phases", spec.name));
            }
            for phase in &spec.recipe.phases {
                if phase.commands.is_empty() {
                    report.warnings.push(format!(
                        "Phase '{}' of build action '{}' has no commands",
                        phase.name, spec.name
                    ));
                }
            }
            if spec.recipe.output_selector.patterns.is_empty() {
                report.errors.push(format!(
                    "Build action '{}' selects no output files",
                    spec.name
                ));
            }
            for pattern in &spec.recipe.output_selector.patterns {
                if let Err(err) = glob::Pattern::new(pattern) {
                    report.errors.push(format!(
                        "Output pattern '{}' of build action '{}' is not a valid glob: {}",
                        pattern, spec.name, err
                    ));
                }
            }
        }
        ActionSpec::Deploy(spec) => {
            if spec.target.trim().is_empty() {
                report
                    .errors
                    .push(format!("Deploy action '{}' has an empty target", spec.name));
            }
            if !spec.scope.allows_deploy() {
                report.warnings.push(format!(
                    "Deploy action '{}' runs with scope '{}' and will fail at apply time",
                    spec.name, spec.scope
                ));
            }
        }
    }
    report
}
