//! Submit-then-refresh workflow for drift and secret-leak checks.

use std::sync::Arc;

use shared::domain::AnalysisKind;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    session::{AnalysisResult, CheckOutcome, CheckTicket, SessionState},
    AnalysisApi, FeedResponse,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    CheckStarted(CheckTicket),
    CheckCompleted {
        ticket: CheckTicket,
        outcome: CheckOutcome,
    },
    StaleResultDropped(CheckTicket),
    FeedRefreshed {
        count: usize,
    },
    FeedSkipped {
        status: u16,
    },
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Replaced { count: usize },
    Skipped { status: u16 },
    Failed(String),
    /// A newer refresh's feed is already in place, or a newer refresh was issued
    /// before this one was skipped or failed.
    Superseded,
}

/// Both halves of a check: the submit outcome and the refresh that followed it.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub ticket: CheckTicket,
    pub submit: CheckOutcome,
    /// False when a newer check of the same kind had already been started.
    pub applied: bool,
    pub refresh: RefreshOutcome,
}

pub struct CheckOrchestrator {
    api: Arc<dyn AnalysisApi>,
    session: Mutex<SessionState>,
    events: broadcast::Sender<ConsoleEvent>,
}

impl CheckOrchestrator {
    pub fn new(api: Arc<dyn AnalysisApi>) -> Self {
        Self::with_session(api, SessionState::new())
    }

    pub fn with_session(api: Arc<dyn AnalysisApi>, session: SessionState) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            api,
            session: Mutex::new(session),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionState {
        self.session.lock().await.clone()
    }

    pub async fn set_manifest_text(&self, text: impl Into<String>) {
        self.session.lock().await.set_manifest_text(text);
    }

    pub async fn set_diff_text(&self, text: impl Into<String>) {
        self.session.lock().await.set_diff_text(text);
    }

    pub async fn run_drift_check(&self) -> CheckReport {
        self.run_check(AnalysisKind::Drift).await
    }

    pub async fn run_secret_check(&self) -> CheckReport {
        self.run_check(AnalysisKind::Secret).await
    }

    /// Submits the current input for `kind`, applies the outcome, then refreshes the
    /// feed. The refresh runs after the submit settles, whether or not it succeeded.
    pub async fn run_check(&self, kind: AnalysisKind) -> CheckReport {
        let (ticket, input) = {
            let mut session = self.session.lock().await;
            let ticket = session.begin_check(kind);
            (ticket, session.input_for(kind).to_string())
        };
        let _ = self.events.send(ConsoleEvent::CheckStarted(ticket));
        debug!(%kind, seq = ticket.seq, bytes = input.len(), "check: submitting");

        let response = match kind {
            AnalysisKind::Drift => self.api.submit_drift_check(&input).await,
            AnalysisKind::Secret => self.api.submit_secret_check(&input).await,
        };

        let submit = match response {
            Ok(response) => {
                info!(%kind, seq = ticket.seq, score = ?response.score, "check: scored");
                CheckOutcome::Scored(AnalysisResult {
                    score: response.score,
                    changes: response.changes,
                })
            }
            Err(err) => {
                warn!(%kind, seq = ticket.seq, "check: submit failed: {err}");
                let _ = self.events.send(ConsoleEvent::Error(err.to_string()));
                CheckOutcome::Failed(err.to_string())
            }
        };

        let applied = self
            .session
            .lock()
            .await
            .apply_result(ticket, submit.clone());
        if applied {
            let _ = self.events.send(ConsoleEvent::CheckCompleted {
                ticket,
                outcome: submit.clone(),
            });
        } else {
            warn!(%kind, seq = ticket.seq, "check: dropping stale result");
            let _ = self.events.send(ConsoleEvent::StaleResultDropped(ticket));
        }

        let refresh = self.refresh_events().await;

        CheckReport {
            ticket,
            submit,
            applied,
            refresh,
        }
    }

    pub async fn refresh_events(&self) -> RefreshOutcome {
        let seq = self.session.lock().await.begin_refresh();

        match self.api.fetch_events().await {
            Ok(FeedResponse::Delivered(events)) => {
                let count = events.len();
                if self.session.lock().await.replace_event_feed(seq, events) {
                    debug!(count, "feed: replaced");
                    let _ = self.events.send(ConsoleEvent::FeedRefreshed { count });
                    RefreshOutcome::Replaced { count }
                } else {
                    RefreshOutcome::Superseded
                }
            }
            Ok(FeedResponse::Rejected { status }) => {
                if self.session.lock().await.skip_refresh(seq, status) {
                    info!(status, "feed: refresh skipped, keeping previous feed");
                    let _ = self.events.send(ConsoleEvent::FeedSkipped { status });
                    RefreshOutcome::Skipped { status }
                } else {
                    RefreshOutcome::Superseded
                }
            }
            Err(err) => {
                warn!("feed: refresh failed: {err}");
                let reason = err.to_string();
                if self.session.lock().await.fail_refresh(seq, reason.clone()) {
                    let _ = self.events.send(ConsoleEvent::Error(reason.clone()));
                    RefreshOutcome::Failed(reason)
                } else {
                    RefreshOutcome::Superseded
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
