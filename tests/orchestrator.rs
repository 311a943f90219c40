use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use slipway::artifact::{ArtifactId, ProducedArtifact, StoreLocation};
use slipway::error::{PipelineError, PipelineResult};
use slipway::pipeline::{Action, Orchestrator, Pipeline, RunContext, RunStatus, Stage};
use tempfile::tempdir;

struct ScriptedAction {
    name: String,
    inputs: Vec<ArtifactId>,
    outputs: Vec<ArtifactId>,
    delay: Duration,
    fail: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAction {
    fn ok(name: &str, outputs: &[&str], delay_ms: u64, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            inputs: Vec::new(),
            outputs: outputs.iter().map(|id| ArtifactId::new(*id)).collect(),
            delay: Duration::from_millis(delay_ms),
            fail: false,
            log: Arc::clone(log),
        }
    }

    fn failing(name: &str, delay_ms: u64, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            fail: true,
            ..Self::ok(name, &[], delay_ms, log)
        }
    }

    fn consuming(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|id| ArtifactId::new(*id)).collect();
        self
    }
}

#[async_trait]
impl Action for ScriptedAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_artifacts(&self) -> Vec<ArtifactId> {
        self.inputs.clone()
    }

    fn output_artifacts(&self) -> Vec<ArtifactId> {
        self.outputs.clone()
    }

    async fn execute(&self, _ctx: &RunContext) -> PipelineResult<Vec<ProducedArtifact>> {
        self.log
            .lock()
            .unwrap()
            .push(format!("start:{}", self.name));
        tokio::time::sleep(self.delay).await;
        self.log.lock().unwrap().push(format!("end:{}", self.name));
        if self.fail {
            return Err(PipelineError::Build {
                phase: "build".to_string(),
                exit_status: 1,
            });
        }
        Ok(self
            .outputs
            .iter()
            .map(|id| ProducedArtifact {
                id: id.clone(),
                location: StoreLocation::new("store", id.as_str()),
                content_hash: None,
            })
            .collect())
    }
}

fn stage(name: &str, actions: Vec<ScriptedAction>) -> Stage {
    Stage {
        name: name.to_string(),
        actions: actions
            .into_iter()
            .map(|a| Box::new(a) as Box<dyn Action>)
            .collect(),
    }
}

#[tokio::test]
async fn no_second_stage_action_starts_before_first_stage_barrier() {
    let temp = tempdir().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let pipeline = Pipeline {
        stages: vec![
            stage(
                "source",
                vec![
                    ScriptedAction::ok("slow_fetch", &["a"], 50, &log),
                    ScriptedAction::ok("fast_fetch", &["b"], 5, &log),
                ],
            ),
            stage(
                "build",
                vec![ScriptedAction::ok("build", &["c"], 1, &log).consuming(&["a", "b"])],
            ),
        ],
    };

    let orchestrator = Orchestrator::new(temp.path().to_path_buf());
    let report = orchestrator.run(&pipeline).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.completed_stages, vec!["source", "build"]);

    let log = log.lock().unwrap();
    let build_start = log.iter().position(|e| e == "start:build").unwrap();
    for entry in ["end:slow_fetch", "end:fast_fetch"] {
        let end = log.iter().position(|e| e == entry).unwrap();
        assert!(
            end < build_start,
            "{entry} must precede start:build in {log:?}"
        );
    }
}

#[tokio::test]
async fn first_failure_in_declaration_order_wins() {
    let temp = tempdir().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    // The later-declared action fails first in wall-clock time; the report
    // must still name the earlier-declared one.
    let pipeline = Pipeline {
        stages: vec![
            stage(
                "build",
                vec![
                    ScriptedAction::failing("slow_failure", 50, &log),
                    ScriptedAction::failing("fast_failure", 1, &log),
                ],
            ),
            stage("deploy", vec![ScriptedAction::ok("deploy", &[], 1, &log)]),
        ],
    };

    let orchestrator = Orchestrator::new(temp.path().to_path_buf());
    let report = orchestrator.run(&pipeline).await;

    match &report.status {
        RunStatus::Failed { stage, action, .. } => {
            assert_eq!(stage, "build");
            assert_eq!(action, "slow_failure");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(report.completed_stages.is_empty());
    assert!(
        !log.lock().unwrap().iter().any(|e| e == "start:deploy"),
        "deploy stage must not start after a build failure"
    );
}

#[tokio::test]
async fn failed_stage_commits_no_artifact_locations() {
    let temp = tempdir().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let pipeline = Pipeline {
        stages: vec![stage(
            "build",
            vec![
                ScriptedAction::ok("bundle", &["bundle"], 1, &log),
                ScriptedAction::failing("broken", 1, &log),
            ],
        )],
    };

    let orchestrator = Orchestrator::new(temp.path().to_path_buf());
    let report = orchestrator.run(&pipeline).await;

    assert!(matches!(report.status, RunStatus::Failed { .. }));
    assert!(
        orchestrator
            .context()
            .ledger
            .resolve(&ArtifactId::new("bundle"))
            .is_none(),
        "sibling output must not be committed when the stage fails"
    );
}

#[tokio::test]
async fn unresolved_input_fails_the_stage_fast() {
    let temp = tempdir().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let pipeline = Pipeline {
        stages: vec![stage(
            "build",
            vec![ScriptedAction::ok("build", &["out"], 1, &log).consuming(&["missing"])],
        )],
    };

    let orchestrator = Orchestrator::new(temp.path().to_path_buf());
    let report = orchestrator.run(&pipeline).await;

    match &report.status {
        RunStatus::Failed { action, cause, .. } => {
            assert_eq!(action, "build");
            assert!(cause.contains("missing"), "cause was: {cause}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(
        log.lock().unwrap().is_empty(),
        "the action must not execute when its input is unresolved"
    );
}

#[tokio::test]
async fn cancellation_halts_before_the_next_stage() {
    let temp = tempdir().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let pipeline = Pipeline {
        stages: vec![stage(
            "source",
            vec![ScriptedAction::ok("fetch", &["a"], 1, &log)],
        )],
    };

    let orchestrator = Orchestrator::new(temp.path().to_path_buf());
    orchestrator.cancel_flag().cancel();
    let report = orchestrator.run(&pipeline).await;

    assert!(matches!(report.status, RunStatus::Cancelled { .. }));
    assert!(log.lock().unwrap().is_empty());
}
