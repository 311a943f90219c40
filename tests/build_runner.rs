use std::fs;

use slipway::artifact::{ArtifactId, ProducedArtifact, StoreLocation};
use slipway::build::BuildAction;
use slipway::definition::BuildSpec;
use slipway::error::PipelineError;
use slipway::pipeline::{Action, RunContext};
use slipway::recipe::{BuildRecipe, OutputSelector, Phase};
use tempfile::tempdir;

fn seeded_context(store_root: &std::path::Path) -> RunContext {
    let ctx = RunContext::new(store_root.to_path_buf());
    let input_dir = store_root.join("app_source");
    fs::create_dir_all(&input_dir).unwrap();
    fs::write(input_dir.join("app.py"), "def handler(): pass\n").unwrap();

    let id = ArtifactId::new("app_source");
    ctx.ledger.register(id.clone(), "seed");
    ctx.ledger
        .commit(
            &ProducedArtifact {
                id,
                location: StoreLocation::new(store_root.to_string_lossy(), "app_source"),
                content_hash: None,
            },
            "seed",
        )
        .unwrap();
    ctx
}

fn build_spec(phases: Vec<Phase>, selector: OutputSelector) -> BuildSpec {
    BuildSpec {
        name: "function_build".to_string(),
        input: ArtifactId::new("app_source"),
        output: ArtifactId::new("function_bundle"),
        recipe: BuildRecipe {
            phases,
            output_selector: selector,
            env: Default::default(),
            placeholders: Vec::new(),
        },
    }
}

fn phase(name: &str, commands: &[&str]) -> Phase {
    Phase {
        name: name.to_string(),
        commands: commands.iter().map(|c| c.to_string()).collect(),
    }
}

#[tokio::test]
async fn phases_run_in_order_and_outputs_land_in_the_store() {
    let temp = tempdir().unwrap();
    let ctx = seeded_context(temp.path());

    let spec = build_spec(
        vec![
            phase("install", &["mkdir -p out"]),
            phase("package", &["cp app.py out/app.py", "printf 'v1' > out/version.txt"]),
        ],
        OutputSelector {
            base_directory: "out".to_string(),
            patterns: vec!["*".to_string()],
        },
    );

    let produced = BuildAction::new(spec).execute(&ctx).await.unwrap();
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].id, ArtifactId::new("function_bundle"));
    assert!(produced[0].content_hash.is_some());

    let bundle_dir = temp.path().join("function_bundle");
    assert_eq!(
        fs::read_to_string(bundle_dir.join("app.py")).unwrap(),
        "def handler(): pass\n"
    );
    assert_eq!(
        fs::read_to_string(bundle_dir.join("version.txt")).unwrap(),
        "v1"
    );
}

#[tokio::test]
async fn injected_env_is_visible_to_every_phase() {
    let temp = tempdir().unwrap();
    let ctx = seeded_context(temp.path());

    let mut spec = build_spec(
        vec![
            phase("install", &["printf \"$FILENAME\" > name.txt"]),
            phase("package", &["printf \"$FILENAME\" >> name.txt"]),
        ],
        OutputSelector {
            base_directory: ".".to_string(),
            patterns: vec!["name.txt".to_string()],
        },
    );
    spec.recipe
        .env
        .insert("FILENAME".to_string(), "LambdaLayer.zip".to_string());

    BuildAction::new(spec).execute(&ctx).await.unwrap();

    let content = fs::read_to_string(temp.path().join("function_bundle/name.txt")).unwrap();
    assert_eq!(content, "LambdaLayer.zipLambdaLayer.zip");
}

#[tokio::test]
async fn nonzero_exit_in_second_phase_aborts_and_names_the_phase() {
    let temp = tempdir().unwrap();
    let ctx = seeded_context(temp.path());

    let spec = build_spec(
        vec![
            phase("install", &["mkdir -p out", "printf 'x' > out/app.py"]),
            phase("package", &["exit 3"]),
            phase("finish", &["printf 'never' > out/never.txt"]),
        ],
        OutputSelector {
            base_directory: "out".to_string(),
            patterns: vec!["*".to_string()],
        },
    );

    let err = BuildAction::new(spec).execute(&ctx).await.unwrap_err();
    match err {
        PipelineError::Build { phase, exit_status } => {
            assert_eq!(phase, "package");
            assert_eq!(exit_status, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    // No partial output is ever committed to the store.
    assert!(!temp.path().join("function_bundle").exists());
    assert!(
        ctx.ledger
            .resolve(&ArtifactId::new("function_bundle"))
            .is_none()
    );
}

#[tokio::test]
async fn empty_selection_is_output_not_found() {
    let temp = tempdir().unwrap();
    let ctx = seeded_context(temp.path());

    let spec = build_spec(
        vec![phase("build", &["true"])],
        OutputSelector {
            base_directory: ".".to_string(),
            patterns: vec!["*.zip".to_string()],
        },
    );

    let err = BuildAction::new(spec).execute(&ctx).await.unwrap_err();
    assert!(matches!(err, PipelineError::OutputNotFound { .. }));
}
