use jobdeck::api::fake::{sample_detail, sample_job};
use jobdeck::api::{ApiOp, FakeFailure, FakeJobApi, JobApi};
use jobdeck::config::RestoreTarget;
use jobdeck::errors::DeckError;
use jobdeck::job_store::JobStore;
use jobdeck::lifecycle::{LifecycleEngine, Transition};
use jobdeck::types::{JobId, ModelConfig, Outcome, Stage};
use std::sync::Arc;

fn model() -> ModelConfig {
    ModelConfig {
        model: "llama-3.3-70b-versatile".to_string(),
        temperature: 0.7,
        prompt_override: None,
    }
}

fn loaded(api: &FakeJobApi, stage: Stage) -> JobStore {
    let mut store = JobStore::new(stage);
    store.load(stage, api.list_jobs(stage, None).expect("list"));
    store
}

fn approved(id: &str, score: i64) -> jobdeck::types::Job {
    let mut job = sample_job(id, score);
    job.stage = Stage::Approved;
    job
}

fn ids(store: &JobStore) -> Vec<String> {
    store.jobs().iter().map(|job| job.id.to_string()).collect()
}

#[test]
fn approving_moves_job_from_new_to_approved() {
    let api = FakeJobApi::new()
        .with_job(sample_job("J1", 72))
        .with_job(sample_job("J0", 40));
    let engine = LifecycleEngine::new(Arc::new(api.clone()));
    let mut store = loaded(&api, Stage::New);

    let report = engine.approve(&mut store, &JobId::from("J1")).expect("approve");
    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.transition, Transition::Approve);
    assert_eq!(ids(&store), vec!["J0"]);
    assert!(store.pending().is_empty());

    let approved = api.list_jobs(Stage::Approved, None).expect("list");
    assert!(approved.jobs.iter().any(|job| job.id.as_str() == "J1"));
    assert_eq!(api.stats().expect("stats").session.approved, 1);
}

#[test]
fn remote_failure_rolls_the_row_back_to_its_index() {
    let api = FakeJobApi::new()
        .with_job(sample_job("A", 90))
        .with_job(sample_job("B", 80))
        .with_job(sample_job("C", 70));
    let engine = LifecycleEngine::new(Arc::new(api.clone()));
    let mut store = loaded(&api, Stage::New);
    store.select(&JobId::from("B")).expect("select");

    api.fail_next(
        ApiOp::Deny,
        "B",
        FakeFailure::Error(DeckError::Transport("connection reset".to_string())),
    );
    let report = engine.deny(&mut store, &JobId::from("B")).expect("report");
    assert_eq!(report.outcome, Outcome::Failure);
    assert_eq!(report.error_message.as_deref(), Some("connection reset"));
    assert_eq!(ids(&store), vec!["A", "B", "C"]);
    assert_eq!(store.selected().map(JobId::as_str), Some("B"));
    assert_eq!(api.job("B").map(|job| job.stage), Some(Stage::New));

    api.fail_next(ApiOp::Deny, "B", FakeFailure::Status("500 upstream".to_string()));
    let report = engine.deny(&mut store, &JobId::from("B")).expect("report");
    assert_eq!(report.outcome, Outcome::Failure);
    assert_eq!(ids(&store), vec!["A", "B", "C"]);
}

#[test]
fn unknown_ids_and_wrong_stages_are_errors_that_touch_nothing() {
    let api = FakeJobApi::new().with_job(sample_job("A", 50));
    let engine = LifecycleEngine::new(Arc::new(api.clone()));
    let mut store = loaded(&api, Stage::New);
    let before = store.clone();

    let err = engine.approve(&mut store, &JobId::from("Z")).expect_err("missing");
    assert!(matches!(err, DeckError::NotFound(_)));
    let err = engine.restore(&mut store, &JobId::from("A")).expect_err("not denied");
    assert!(matches!(err, DeckError::Precondition(_)));
    assert_eq!(store, before);
    assert!(api.calls().iter().all(|call| !call.starts_with("Approve")));
}

#[test]
fn deny_then_restore_returns_job_to_new() {
    let api = FakeJobApi::new().with_job(approved("A", 50));
    let engine = LifecycleEngine::new(Arc::new(api.clone()));
    let mut store = loaded(&api, Stage::Approved);
    engine.deny(&mut store, &JobId::from("A")).expect("deny");
    assert!(store.jobs().is_empty());

    let mut denied = loaded(&api, Stage::Denied);
    let report = engine.restore(&mut denied, &JobId::from("A")).expect("restore");
    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(api.job("A").map(|job| job.stage), Some(Stage::New));
}

#[test]
fn restore_to_previous_stage_names_that_stage_while_pending() {
    let api = FakeJobApi::new()
        .with_restore_target(RestoreTarget::Previous)
        .with_job(approved("A", 50))
        .with_job(sample_job("B", 40));
    let engine =
        LifecycleEngine::new(Arc::new(api.clone())).with_restore_target(RestoreTarget::Previous);
    let mut approved_list = loaded(&api, Stage::Approved);
    engine.deny(&mut approved_list, &JobId::from("A")).expect("deny");
    let mut new_list = loaded(&api, Stage::New);
    engine.deny(&mut new_list, &JobId::from("B")).expect("deny");

    let mut denied = loaded(&api, Stage::Denied);
    let a = denied.get(&JobId::from("A")).expect("A denied").clone();
    let b = denied.get(&JobId::from("B")).expect("B denied").clone();
    assert_eq!(a.previous_stage, Some(Stage::Approved));
    assert_eq!(
        engine.landing_stage(&a, Transition::Restore),
        Ok(Stage::Approved)
    );
    assert_eq!(engine.landing_stage(&b, Transition::Restore), Ok(Stage::New));

    api.fail_next(ApiOp::Restore, "A", FakeFailure::Status("busy".to_string()));
    engine.restore(&mut denied, &JobId::from("A")).expect("report");
    assert!(denied.pending().is_empty());

    engine.restore(&mut denied, &JobId::from("A")).expect("restore");
    engine.restore(&mut denied, &JobId::from("B")).expect("restore");
    assert_eq!(api.job("A").map(|job| job.stage), Some(Stage::Approved));
    assert_eq!(api.job("B").map(|job| job.stage), Some(Stage::New));
}

#[test]
fn default_restore_target_is_new_even_after_approval() {
    let api = FakeJobApi::new().with_job(approved("A", 50));
    let engine = LifecycleEngine::new(Arc::new(api.clone()));
    let mut store = loaded(&api, Stage::Approved);
    engine.deny(&mut store, &JobId::from("A")).expect("deny");
    let denied = loaded(&api, Stage::Denied);
    let job = denied.get(&JobId::from("A")).expect("denied");
    assert_eq!(engine.landing_stage(job, Transition::Restore), Ok(Stage::New));
}

#[test]
fn process_is_not_optimistic_and_sets_artifact_flag_on_success() {
    let api = FakeJobApi::new().with_job_detail(approved("A", 50), sample_detail("Role", &[]));
    let engine = LifecycleEngine::new(Arc::new(api.clone()));
    let mut store = loaded(&api, Stage::Approved);

    api.fail_next(ApiOp::Process, "A", FakeFailure::Status("model overloaded".to_string()));
    let report = engine
        .process(&mut store, &JobId::from("A"), &model())
        .expect("report");
    assert_eq!(report.outcome, Outcome::Failure);
    assert_eq!(report.error_message.as_deref(), Some("model overloaded"));
    assert_eq!(store.get(&JobId::from("A")).map(|job| job.has_ai_artifact), Some(false));

    let report = engine
        .process(&mut store, &JobId::from("A"), &model())
        .expect("report");
    assert_eq!(report.outcome, Outcome::Success);
    assert!(report.artifact_path.is_some());
    assert!(report.duration_seconds.is_some());
    let job = store.get(&JobId::from("A")).expect("still listed");
    assert!(job.has_ai_artifact);
    assert_eq!(job.stage, Stage::Approved);
}

#[test]
fn invalid_model_config_is_an_input_error() {
    let api = FakeJobApi::new().with_job(approved("A", 50));
    let engine = LifecycleEngine::new(Arc::new(api.clone()));
    let mut store = loaded(&api, Stage::Approved);
    let mut config = model();
    config.prompt_override = Some("   ".to_string());

    let err = engine
        .process(&mut store, &JobId::from("A"), &config)
        .expect_err("blank override");
    assert!(matches!(err, DeckError::Input(_)));
    assert!(!api.calls().iter().any(|call| call.starts_with("Process")));
}

#[test]
fn deliver_requires_an_artifact_and_then_leaves_the_list() {
    let api = FakeJobApi::new().with_job(approved("A", 50));
    let engine = LifecycleEngine::new(Arc::new(api.clone()));
    let mut store = loaded(&api, Stage::Approved);

    let err = engine.deliver(&mut store, &JobId::from("A")).expect_err("no artifact");
    assert!(matches!(err, DeckError::Precondition(_)));

    engine
        .process(&mut store, &JobId::from("A"), &model())
        .expect("process");
    let report = engine.deliver(&mut store, &JobId::from("A")).expect("deliver");
    assert_eq!(report.outcome, Outcome::Success);
    assert!(store.jobs().is_empty());
    let delivered = api.job("A").expect("job");
    assert_eq!(delivered.stage, Stage::Delivered);
    assert!(delivered.has_pdf_artifact);
}

#[test]
fn second_operation_on_an_in_flight_job_is_rejected() {
    let api = FakeJobApi::new().with_job(sample_job("A", 50));
    let engine = LifecycleEngine::new(Arc::new(api.clone()));
    let mut store = loaded(&api, Stage::New);

    let ticket = engine
        .in_flight()
        .try_acquire(&JobId::from("A"))
        .expect("ticket");
    let err = engine.approve(&mut store, &JobId::from("A")).expect_err("in flight");
    assert!(matches!(err, DeckError::Precondition(_)));
    assert_eq!(ids(&store), vec!["A"]);

    drop(ticket);
    let report = engine.approve(&mut store, &JobId::from("A")).expect("approve");
    assert_eq!(report.outcome, Outcome::Success);
}
