use super::*;
use async_trait::async_trait;
use shared::{
    domain::EventId,
    protocol::{CheckResponse, Event, HealthResponse},
};
use std::{collections::VecDeque, sync::Mutex as StdMutex};
use tokio::sync::oneshot;

use crate::{
    render::{CheckDisplayState, FeedRenderer},
    session::{CheckStatus, RefreshStatus},
    ClientError,
};

enum Reply {
    Score(CheckResponse),
    Reject(u16),
    Malformed,
}

struct ScriptedCheck {
    entered: Option<oneshot::Sender<()>>,
    gate: Option<oneshot::Receiver<()>>,
    reply: Reply,
}

impl ScriptedCheck {
    fn score(score: Option<f64>) -> Self {
        Self {
            entered: None,
            gate: None,
            reply: Reply::Score(CheckResponse {
                score,
                changes: None,
            }),
        }
    }

    fn reply(reply: Reply) -> Self {
        Self {
            entered: None,
            gate: None,
            reply,
        }
    }

    fn gated(
        score: Option<f64>,
    ) -> (Self, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (gate_tx, gate_rx) = oneshot::channel();
        let mut check = Self::score(score);
        check.entered = Some(entered_tx);
        check.gate = Some(gate_rx);
        (check, entered_rx, gate_tx)
    }
}

enum FeedReply {
    Events(Vec<Event>),
    Status(u16),
    Garbled,
    Held {
        entered: oneshot::Sender<()>,
        gate: oneshot::Receiver<()>,
        events: Vec<Event>,
    },
}

impl FeedReply {
    fn held(events: Vec<Event>) -> (Self, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (gate_tx, gate_rx) = oneshot::channel();
        let reply = Self::Held {
            entered: entered_tx,
            gate: gate_rx,
            events,
        };
        (reply, entered_rx, gate_tx)
    }
}

#[derive(Default)]
struct ScriptedApi {
    log: StdMutex<Vec<String>>,
    checks: StdMutex<VecDeque<ScriptedCheck>>,
    feeds: StdMutex<VecDeque<FeedReply>>,
    submitted: StdMutex<Vec<String>>,
}

impl ScriptedApi {
    fn with_checks(checks: Vec<ScriptedCheck>) -> Self {
        let api = Self::default();
        api.checks.lock().unwrap().extend(checks);
        api
    }

    fn push_feed(&self, reply: FeedReply) {
        self.feeds.lock().unwrap().push_back(reply);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn submit(&self, kind: &str, input: &str) -> Result<CheckResponse, ClientError> {
        self.log.lock().unwrap().push(format!("submit:{kind}:start"));
        self.submitted.lock().unwrap().push(input.to_string());
        let scripted = self
            .checks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedCheck::score(None));

        if let Some(entered) = scripted.entered {
            let _ = entered.send(());
        }
        if let Some(gate) = scripted.gate {
            let _ = gate.await;
        }
        self.log.lock().unwrap().push(format!("submit:{kind}:end"));

        let endpoint = format!("/{kind}/check");
        match scripted.reply {
            Reply::Score(response) => Ok(response),
            Reply::Reject(status) => Err(ClientError::Rejected {
                endpoint,
                status,
                detail: Some("Invalid YAML".into()),
            }),
            Reply::Malformed => Err(ClientError::Decode {
                endpoint,
                source: serde_json::from_str::<serde_json::Value>("<html>")
                    .expect_err("not json"),
            }),
        }
    }
}

#[async_trait]
impl AnalysisApi for ScriptedApi {
    async fn fetch_events(&self) -> Result<FeedResponse, ClientError> {
        self.log.lock().unwrap().push("events".to_string());
        let reply = self
            .feeds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FeedReply::Events(Vec::new()));
        match reply {
            FeedReply::Events(events) => Ok(FeedResponse::Delivered(events)),
            FeedReply::Status(status) => Ok(FeedResponse::Rejected { status }),
            FeedReply::Garbled => Err(ClientError::Decode {
                endpoint: "/events".into(),
                source: serde_json::from_str::<Vec<Event>>("{\"ts\":").expect_err("truncated"),
            }),
            FeedReply::Held {
                entered,
                gate,
                events,
            } => {
                let _ = entered.send(());
                let _ = gate.await;
                Ok(FeedResponse::Delivered(events))
            }
        }
    }

    async fn submit_drift_check(&self, manifest: &str) -> Result<CheckResponse, ClientError> {
        self.submit("drift", manifest).await
    }

    async fn submit_secret_check(&self, diff: &str) -> Result<CheckResponse, ClientError> {
        self.submit("secret", diff).await
    }

    async fn health(&self) -> Result<HealthResponse, ClientError> {
        Ok(HealthResponse { ok: true })
    }
}

fn event(id: i64, ts: i64, kind: &str, score: Option<f64>) -> Event {
    Event {
        id: EventId(id),
        ts,
        kind: kind.to_string(),
        score,
    }
}

#[tokio::test]
async fn drift_check_displays_three_decimal_score() {
    let api = Arc::new(ScriptedApi::with_checks(vec![ScriptedCheck::score(Some(
        0.123456,
    ))]));
    let orchestrator = CheckOrchestrator::new(api.clone());
    orchestrator.set_manifest_text("kind: Deployment").await;

    let report = orchestrator.run_drift_check().await;
    assert!(report.applied);
    assert_eq!(report.submit.score(), Some(0.123456));

    let view = FeedRenderer::local().render_session(&orchestrator.snapshot().await);
    assert_eq!(view.drift.state, CheckDisplayState::Scored);
    assert_eq!(view.drift.score, "0.123");
    assert_eq!(
        api.submitted.lock().unwrap().as_slice(),
        ["kind: Deployment".to_string()]
    );
}

#[tokio::test]
async fn check_triggers_exactly_one_refresh_after_submit() {
    let api = Arc::new(ScriptedApi::with_checks(vec![ScriptedCheck::score(Some(0.2))]));
    let orchestrator = CheckOrchestrator::new(api.clone());

    orchestrator.run_secret_check().await;

    assert_eq!(
        api.log(),
        vec!["submit:secret:start", "submit:secret:end", "events"]
    );
}

#[tokio::test]
async fn refresh_waits_for_submit_response() {
    let (check, entered, release) = ScriptedCheck::gated(Some(0.7));
    let api = Arc::new(ScriptedApi::with_checks(vec![check]));
    let orchestrator = Arc::new(CheckOrchestrator::new(api.clone()));

    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run_drift_check().await })
    };

    entered.await.expect("submit reached the service");
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(api.log(), vec!["submit:drift:start"]);
    assert!(matches!(
        orchestrator.snapshot().await.check_status(AnalysisKind::Drift),
        CheckStatus::InFlight { seq: 1, .. }
    ));

    release.send(()).expect("release submit");
    let report = task.await.expect("join");

    assert_eq!(
        api.log(),
        vec!["submit:drift:start", "submit:drift:end", "events"]
    );
    assert_eq!(report.refresh, RefreshOutcome::Replaced { count: 0 });
}

#[tokio::test]
async fn non_success_feed_keeps_previous_feed() {
    let api = Arc::new(ScriptedApi::default());
    api.push_feed(FeedReply::Events(vec![event(1, 1_700_000_000, "drift", Some(0.5))]));
    api.push_feed(FeedReply::Status(500));
    let orchestrator = CheckOrchestrator::new(api.clone());

    assert_eq!(
        orchestrator.refresh_events().await,
        RefreshOutcome::Replaced { count: 1 }
    );
    let before = orchestrator.snapshot().await.events().to_vec();

    assert_eq!(
        orchestrator.refresh_events().await,
        RefreshOutcome::Skipped { status: 500 }
    );
    let after = orchestrator.snapshot().await;
    assert_eq!(after.events(), before.as_slice());
    assert_eq!(after.refresh_status(), &RefreshStatus::Skipped { status: 500 });
}

#[tokio::test]
async fn slow_feed_lands_after_newer_refresh_is_skipped() {
    let api = Arc::new(ScriptedApi::default());
    let (held, entered, release) =
        FeedReply::held(vec![event(9, 1_700_000_000, "drift", Some(0.6))]);
    api.push_feed(held);
    api.push_feed(FeedReply::Status(503));
    let orchestrator = Arc::new(CheckOrchestrator::new(api));

    let slow = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.refresh_events().await })
    };
    entered.await.expect("first refresh in flight");

    assert_eq!(
        orchestrator.refresh_events().await,
        RefreshOutcome::Skipped { status: 503 }
    );
    release.send(()).expect("release feed");
    assert_eq!(
        slow.await.expect("join"),
        RefreshOutcome::Replaced { count: 1 }
    );

    let state = orchestrator.snapshot().await;
    assert_eq!(state.events().len(), 1);
    assert_eq!(state.events()[0].id, EventId(9));
}

#[tokio::test]
async fn slow_feed_is_dropped_once_newer_feed_applied() {
    let api = Arc::new(ScriptedApi::default());
    let (held, entered, release) = FeedReply::held(vec![event(1, 10, "drift", None)]);
    api.push_feed(held);
    api.push_feed(FeedReply::Events(vec![event(2, 20, "secret", Some(0.3))]));
    let orchestrator = Arc::new(CheckOrchestrator::new(api));

    let slow = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.refresh_events().await })
    };
    entered.await.expect("first refresh in flight");

    assert_eq!(
        orchestrator.refresh_events().await,
        RefreshOutcome::Replaced { count: 1 }
    );
    release.send(()).expect("release feed");
    assert_eq!(slow.await.expect("join"), RefreshOutcome::Superseded);
    assert_eq!(orchestrator.snapshot().await.events()[0].id, EventId(2));
}

#[tokio::test]
async fn recheck_in_flight_keeps_previous_score_on_display() {
    let (slow, entered, release) = ScriptedCheck::gated(Some(0.9));
    let api = Arc::new(ScriptedApi::with_checks(vec![
        ScriptedCheck::score(Some(0.42)),
        slow,
    ]));
    let orchestrator = Arc::new(CheckOrchestrator::new(api));
    orchestrator.run_drift_check().await;

    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run_drift_check().await })
    };
    entered.await.expect("second submit in flight");

    let state = orchestrator.snapshot().await;
    assert_eq!(state.last_score(AnalysisKind::Drift), Some(0.42));
    let view = FeedRenderer::local().render_session(&state);
    assert_eq!(view.drift.state, CheckDisplayState::Pending);
    assert_eq!(view.drift.score, "0.420");

    release.send(()).expect("release submit");
    task.await.expect("join");
    assert_eq!(
        orchestrator.snapshot().await.last_score(AnalysisKind::Drift),
        Some(0.9)
    );
}

#[tokio::test]
async fn undecodable_feed_is_reported_and_feed_kept() {
    let api = Arc::new(ScriptedApi::default());
    api.push_feed(FeedReply::Events(vec![event(1, 10, "secret", Some(0.1))]));
    api.push_feed(FeedReply::Garbled);
    let orchestrator = CheckOrchestrator::new(api);

    orchestrator.refresh_events().await;
    let outcome = orchestrator.refresh_events().await;

    assert!(matches!(outcome, RefreshOutcome::Failed(ref reason) if reason.contains("invalid JSON from /events")));
    assert_eq!(orchestrator.snapshot().await.events().len(), 1);
}

#[tokio::test]
async fn renders_feed_row_for_delivered_event() {
    let api = Arc::new(ScriptedApi::default());
    api.push_feed(FeedReply::Events(vec![event(1, 1_700_000_000, "drift", Some(0.5))]));
    let orchestrator = CheckOrchestrator::new(api);

    orchestrator.refresh_events().await;
    let view = FeedRenderer::with_timezone(chrono::Utc).render_session(&orchestrator.snapshot().await);

    assert_eq!(view.feed.len(), 1);
    assert_eq!(view.feed[0].time, "2023-11-14 22:13:20");
    assert_eq!(view.feed[0].kind, "drift");
    assert_eq!(view.feed[0].score, "0.500");
    assert_eq!(view.feed_status, "1 events");
}

#[tokio::test]
async fn absent_score_renders_empty() {
    let api = Arc::new(ScriptedApi::with_checks(vec![ScriptedCheck::score(None)]));
    let orchestrator = CheckOrchestrator::new(api);

    let report = orchestrator.run_secret_check().await;
    assert_eq!(report.submit, CheckOutcome::Scored(AnalysisResult::default()));

    let view = FeedRenderer::local().render_session(&orchestrator.snapshot().await);
    assert_eq!(view.secret.state, CheckDisplayState::Scored);
    assert_eq!(view.secret.score, "");
}

#[tokio::test]
async fn failed_submit_still_refreshes_feed() {
    let api = Arc::new(ScriptedApi::with_checks(vec![ScriptedCheck::reply(
        Reply::Malformed,
    )]));
    api.push_feed(FeedReply::Events(vec![event(4, 40, "secret", Some(0.9))]));
    let orchestrator = CheckOrchestrator::new(api.clone());

    let report = orchestrator.run_drift_check().await;

    assert!(matches!(report.submit, CheckOutcome::Failed(ref reason) if reason.contains("invalid JSON")));
    assert_eq!(report.refresh, RefreshOutcome::Replaced { count: 1 });
    assert_eq!(api.log().last().map(String::as_str), Some("events"));

    let view = FeedRenderer::local().render_session(&orchestrator.snapshot().await);
    assert_eq!(view.drift.state, CheckDisplayState::Failed);
    assert_eq!(view.drift.score, "");
}

#[tokio::test]
async fn rejected_submit_records_service_detail() {
    let api = Arc::new(ScriptedApi::with_checks(vec![ScriptedCheck::reply(
        Reply::Reject(400),
    )]));
    let orchestrator = CheckOrchestrator::new(api);

    let report = orchestrator.run_drift_check().await;
    match report.submit {
        CheckOutcome::Failed(reason) => {
            assert!(reason.contains("HTTP 400"), "unexpected reason: {reason}");
            assert!(reason.contains("Invalid YAML"), "unexpected reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn back_to_back_checks_keep_both_kinds() {
    let api = Arc::new(ScriptedApi::with_checks(vec![
        ScriptedCheck::score(Some(0.25)),
        ScriptedCheck::score(Some(0.75)),
    ]));
    let orchestrator = CheckOrchestrator::new(api);

    let (drift, secret) = futures::join!(
        orchestrator.run_drift_check(),
        orchestrator.run_secret_check()
    );
    assert!(drift.applied && secret.applied);

    let state = orchestrator.snapshot().await;
    let mut scores = vec![
        state.last_score(AnalysisKind::Drift).expect("drift score"),
        state.last_score(AnalysisKind::Secret).expect("secret score"),
    ];
    scores.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
    assert_eq!(scores, vec![0.25, 0.75]);
}

#[tokio::test]
async fn stale_check_response_cannot_overwrite_newer_one() {
    let (slow, slow_entered, release_slow) = ScriptedCheck::gated(Some(0.99));
    let api = Arc::new(ScriptedApi::with_checks(vec![
        slow,
        ScriptedCheck::score(Some(0.11)),
    ]));
    let orchestrator = Arc::new(CheckOrchestrator::new(api));
    let mut events = orchestrator.subscribe_events();

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run_drift_check().await })
    };
    slow_entered.await.expect("first submit in flight");

    let second = orchestrator.run_drift_check().await;
    assert!(second.applied);

    release_slow.send(()).expect("release");
    let first = first.await.expect("join");
    assert!(!first.applied);
    assert_eq!(first.ticket.seq, 1);

    let state = orchestrator.snapshot().await;
    assert_eq!(state.last_score(AnalysisKind::Drift), Some(0.11));

    let mut saw_stale = false;
    while let Ok(event) = events.try_recv() {
        if event == ConsoleEvent::StaleResultDropped(first.ticket) {
            saw_stale = true;
        }
    }
    assert!(saw_stale);
}

#[tokio::test]
async fn broadcasts_check_lifecycle() {
    let api = Arc::new(ScriptedApi::with_checks(vec![ScriptedCheck::score(Some(0.4))]));
    api.push_feed(FeedReply::Status(503));
    let orchestrator = CheckOrchestrator::new(api);
    let mut events = orchestrator.subscribe_events();

    let report = orchestrator.run_secret_check().await;

    assert_eq!(
        events.recv().await.expect("started"),
        ConsoleEvent::CheckStarted(report.ticket)
    );
    assert_eq!(
        events.recv().await.expect("completed"),
        ConsoleEvent::CheckCompleted {
            ticket: report.ticket,
            outcome: report.submit.clone(),
        }
    );
    assert_eq!(
        events.recv().await.expect("feed"),
        ConsoleEvent::FeedSkipped { status: 503 }
    );
}
