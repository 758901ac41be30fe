use jobdeck::api::fake::{sample_detail, sample_job};
use jobdeck::api::{ApiOp, FakeFailure, FakeJobApi, JobApi};
use jobdeck::batch::{BatchLogEntry, BatchRun, BatchSource};
use jobdeck::config::RestoreTarget;
use jobdeck::deck::{Deck, DeckCommand, DeckOptions};
use jobdeck::errors::DeckError;
use jobdeck::hotkeys::KeyInput;
use jobdeck::job_store::JobStore;
use jobdeck::lifecycle::LifecycleEngine;
use jobdeck::runtime::FakeClock;
use jobdeck::types::{JobId, ModelConfig, Outcome, Stage};
use jobdeck::view::{PanelModel, View};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn model() -> ModelConfig {
    ModelConfig {
        model: "llama-3.3-70b-versatile".to_string(),
        temperature: 0.7,
        prompt_override: None,
    }
}

fn approved_api(ids: &[&str]) -> FakeJobApi {
    let api = FakeJobApi::new();
    for (rank, id) in ids.iter().enumerate() {
        let mut job = sample_job(id, 100 - rank as i64);
        job.stage = Stage::Approved;
        api.insert(job, sample_detail("Role", &[]));
    }
    api
}

fn item_ids(entries: &[BatchLogEntry]) -> Vec<(String, Outcome)> {
    entries
        .iter()
        .filter_map(|entry| match entry {
            BatchLogEntry::Item {
                job_id, outcome, ..
            } => Some((job_id.to_string(), *outcome)),
            _ => None,
        })
        .collect()
}

#[test]
fn one_failure_does_not_stop_the_batch() {
    let api = approved_api(&["A", "B", "C"]);
    api.fail_next(
        ApiOp::Process,
        "B",
        FakeFailure::Error(DeckError::Transport("gateway timeout".to_string())),
    );
    let engine = LifecycleEngine::new(Arc::new(api.clone()));
    let mut store = JobStore::new(Stage::Approved);
    store.load(Stage::Approved, api.list_jobs(Stage::Approved, None).expect("list"));
    let clock = FakeClock::ticking(
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000),
        Duration::from_secs(1),
    );

    let mut run = BatchRun::new(["A", "B", "C"].map(JobId::from), model()).expect("run");
    let mut observed = Vec::new();
    let entries = run.run_to_end(&engine, &mut store, &clock, |entry| {
        observed.push(entry.clone())
    });

    assert_eq!(entries, observed);
    assert_eq!(entries.len(), 4);
    assert_eq!(
        item_ids(&entries),
        vec![
            ("A".to_string(), Outcome::Success),
            ("B".to_string(), Outcome::Failure),
            ("C".to_string(), Outcome::Success),
        ]
    );
    assert!(matches!(
        &entries[1],
        BatchLogEntry::Item { detail, .. } if detail == "gateway timeout"
    ));
    assert!(matches!(
        entries[3],
        BatchLogEntry::Complete {
            succeeded: 2,
            failed: 1,
            ..
        }
    ));
    let calls = api
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("Process"))
        .collect::<Vec<_>>();
    assert_eq!(calls, vec!["Process:A", "Process:B", "Process:C"]);
}

#[test]
fn cancelling_before_an_item_stops_with_a_cancelled_marker() {
    let api = approved_api(&["A", "B", "C", "D"]);
    let engine = LifecycleEngine::new(Arc::new(api.clone()));
    let mut store = JobStore::new(Stage::Approved);
    store.load(Stage::Approved, api.list_jobs(Stage::Approved, None).expect("list"));
    let clock = FakeClock::default();

    let mut run = BatchRun::new(["A", "B", "C", "D"].map(JobId::from), model()).expect("run");
    let token = run.cancellation_token();
    let mut entries = Vec::new();
    for _ in 0..2 {
        entries.push(run.step(&engine, &mut store, &clock).expect("item"));
    }
    token.cancel();
    entries.extend(run.run_to_end(&engine, &mut store, &clock, |_| {}));

    assert_eq!(item_ids(&entries).len(), 2);
    assert!(matches!(
        entries.last(),
        Some(BatchLogEntry::Cancelled {
            succeeded: 2,
            failed: 0,
            ..
        })
    ));
    assert!(run.is_finished());
    assert!(!api.calls().iter().any(|call| call == "Process:C"));
}

fn tailoring_deck(api: &FakeJobApi) -> Deck {
    Deck::open(
        Arc::new(api.clone()),
        Arc::new(FakeClock::default()),
        DeckOptions {
            initial_view: View::ApprovedTailoring,
            page_size: 50,
            model: model(),
            restore_target: RestoreTarget::New,
        },
    )
    .expect("deck")
}

#[test]
fn process_marked_runs_in_list_order_and_clears_marks() {
    let api = approved_api(&["A", "B", "C"]);
    let mut deck = tailoring_deck(&api);

    // Mark C then A; the batch still runs in list order.
    deck.handle_key(KeyInput::Char('j'));
    deck.handle_key(KeyInput::Char('j'));
    deck.handle_key(KeyInput::Char(' '));
    deck.handle_key(KeyInput::Char('k'));
    deck.handle_key(KeyInput::Char('k'));
    deck.handle_key(KeyInput::Char(' '));
    assert_eq!(deck.marked().len(), 2);

    let DeckCommand::RunBatch(mut run) = deck.handle_key(KeyInput::Char('P')) else {
        panic!("expected a batch");
    };
    assert_eq!(run.ids(), &[JobId::from("A"), JobId::from("C")]);
    let entries = deck.run_batch(&mut run, |_| {});
    assert_eq!(entries.len(), 3);
    assert_eq!(deck.log(), entries.as_slice());
    assert!(deck.marked().is_empty());
    assert!(api.job("A").is_some_and(|job| job.has_ai_artifact));
    assert!(api.job("B").is_some_and(|job| !job.has_ai_artifact));

    match deck.panel_model() {
        PanelModel::Tailoring { log, target, .. } => {
            assert_eq!(log.len(), 3);
            assert_eq!(target, None);
        }
        other => panic!("unexpected panel {other:?}"),
    }
}

#[test]
fn process_marked_without_marks_is_refused() {
    let api = approved_api(&["A"]);
    let mut deck = tailoring_deck(&api);
    let err = deck.start_batch(BatchSource::Marked).expect_err("nothing marked");
    assert!(matches!(err, DeckError::Precondition(_)));
}

#[test]
fn process_all_covers_every_listed_job() {
    let api = approved_api(&["A", "B"]);
    let mut deck = tailoring_deck(&api);
    let mut run = deck.start_batch(BatchSource::All).expect("run");
    let entries = deck.run_batch(&mut run, |_| {});
    assert_eq!(
        item_ids(&entries),
        vec![
            ("A".to_string(), Outcome::Success),
            ("B".to_string(), Outcome::Success)
        ]
    );
    assert_eq!(deck.stats().session.processed, 2);
}

#[test]
fn switching_view_discards_the_log() {
    let api = approved_api(&["A"]);
    let mut deck = tailoring_deck(&api);
    let mut run = deck.start_batch(BatchSource::Selected).expect("run");
    deck.run_batch(&mut run, |_| {});
    assert_eq!(deck.log().len(), 2);

    deck.switch_view(View::New).expect("switch");
    deck.switch_view(View::ApprovedTailoring).expect("switch");
    assert!(deck.log().is_empty());
}

#[test]
fn batches_only_start_from_the_tailoring_view() {
    let api = approved_api(&["A"]);
    let mut deck = tailoring_deck(&api);
    deck.switch_view(View::ApprovedTagging).expect("switch");
    let err = deck.start_batch(BatchSource::All).expect_err("wrong view");
    assert!(matches!(err, DeckError::Precondition(_)));
}

#[test]
fn single_process_uses_the_current_model() {
    let api = approved_api(&["A"]);
    let mut deck = tailoring_deck(&api);

    let mut blank = model();
    blank.model = "  ".to_string();
    assert!(matches!(deck.set_model(blank), Err(DeckError::Input(_))));
    assert_eq!(deck.model().model, "llama-3.3-70b-versatile");

    let mut other = model();
    other.model = "mixtral-8x7b".to_string();
    deck.set_model(other).expect("model");
    let report = deck.process_selected().expect("process");

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.artifact_path.as_deref(), Some("artifacts/A.json"));
    assert_eq!(deck.stats().session.processed, 1);
    let artifact = api
        .artifact(&JobId::from("A"), jobdeck::types::ArtifactVariant::Primary)
        .expect("artifact");
    assert!(artifact.contains("mixtral-8x7b"));
}

#[test]
fn process_all_reaches_jobs_beyond_the_first_page() {
    let api = approved_api(&["A", "B", "C"]);
    let mut deck = Deck::open(
        Arc::new(api.clone()),
        Arc::new(FakeClock::default()),
        DeckOptions {
            initial_view: View::ApprovedTailoring,
            page_size: 2,
            model: model(),
            restore_target: RestoreTarget::New,
        },
    )
    .expect("deck");
    assert_eq!(deck.store().jobs().len(), 2);
    assert_eq!(deck.store().total(), 3);

    let mut run = deck.start_batch(BatchSource::All).expect("run");
    let entries = deck.run_batch(&mut run, |_| {});

    assert_eq!(
        item_ids(&entries),
        vec![
            ("A".to_string(), Outcome::Success),
            ("B".to_string(), Outcome::Success),
            ("C".to_string(), Outcome::Success),
        ]
    );
    assert!(matches!(
        entries.last(),
        Some(BatchLogEntry::Complete {
            succeeded: 3,
            failed: 0,
            ..
        })
    ));
    assert!(api.job("C").is_some_and(|job| job.has_ai_artifact));
}
