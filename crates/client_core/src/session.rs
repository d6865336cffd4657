//! In-memory session: current inputs, latest result per analysis kind, and the event feed.
//!
//! Every mutation is an overwrite. Results carry the sequence number they were issued
//! under and are dropped when a newer check of the same kind has been started since.
//! A delivered feed is dropped only when a newer feed has already been applied.

use shared::{domain::AnalysisKind, protocol::Event};

pub const DEFAULT_MANIFEST: &str = "apiVersion: apps/v1
kind: Deployment
metadata: {name: demo}
spec:
  replicas: 1
  template:
    spec:
      containers:
      - name: web
        image: nginx:1.27";

pub const DEFAULT_DIFF: &str = "api_key=ABCD1234EFGH5678TOKEN";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisResult {
    pub score: Option<f64>,
    pub changes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Scored(AnalysisResult),
    Failed(String),
}

impl CheckOutcome {
    pub fn score(&self) -> Option<f64> {
        match self {
            CheckOutcome::Scored(result) => result.score,
            CheckOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum CheckStatus {
    #[default]
    Idle,
    /// `previous` is the last completed outcome, kept until this check settles.
    InFlight {
        seq: u64,
        previous: Option<CheckOutcome>,
    },
    Completed {
        seq: u64,
        outcome: CheckOutcome,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckTicket {
    pub kind: AnalysisKind,
    pub seq: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RefreshStatus {
    #[default]
    Idle,
    InFlight,
    Refreshed {
        count: usize,
    },
    /// Service answered with a non-2xx status. The feed was left as it was.
    Skipped {
        status: u16,
    },
    Failed(String),
}

#[derive(Debug, Clone, Default)]
struct CheckSlot {
    status: CheckStatus,
    issued: u64,
}

impl CheckSlot {
    fn begin(&mut self) -> u64 {
        self.issued += 1;
        let previous = match std::mem::take(&mut self.status) {
            CheckStatus::Idle => None,
            CheckStatus::InFlight { previous, .. } => previous,
            CheckStatus::Completed { outcome, .. } => Some(outcome),
        };
        self.status = CheckStatus::InFlight {
            seq: self.issued,
            previous,
        };
        self.issued
    }

    fn complete(&mut self, seq: u64, outcome: CheckOutcome) -> bool {
        if seq != self.issued {
            return false;
        }
        self.status = CheckStatus::Completed { seq, outcome };
        true
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    manifest_text: String,
    diff_text: String,
    drift: CheckSlot,
    secret: CheckSlot,
    events: Vec<Event>,
    refresh: RefreshStatus,
    refresh_issued: u64,
    refresh_applied: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::with_inputs(DEFAULT_MANIFEST, DEFAULT_DIFF)
    }

    pub fn with_inputs(manifest: impl Into<String>, diff: impl Into<String>) -> Self {
        Self {
            manifest_text: manifest.into(),
            diff_text: diff.into(),
            drift: CheckSlot::default(),
            secret: CheckSlot::default(),
            events: Vec::new(),
            refresh: RefreshStatus::Idle,
            refresh_issued: 0,
            refresh_applied: 0,
        }
    }

    pub fn manifest_text(&self) -> &str {
        &self.manifest_text
    }

    pub fn diff_text(&self) -> &str {
        &self.diff_text
    }

    pub fn set_manifest_text(&mut self, text: impl Into<String>) {
        self.manifest_text = text.into();
    }

    pub fn set_diff_text(&mut self, text: impl Into<String>) {
        self.diff_text = text.into();
    }

    /// Input text submitted for `kind`.
    pub fn input_for(&self, kind: AnalysisKind) -> &str {
        match kind {
            AnalysisKind::Drift => &self.manifest_text,
            AnalysisKind::Secret => &self.diff_text,
        }
    }

    fn slot(&self, kind: AnalysisKind) -> &CheckSlot {
        match kind {
            AnalysisKind::Drift => &self.drift,
            AnalysisKind::Secret => &self.secret,
        }
    }

    fn slot_mut(&mut self, kind: AnalysisKind) -> &mut CheckSlot {
        match kind {
            AnalysisKind::Drift => &mut self.drift,
            AnalysisKind::Secret => &mut self.secret,
        }
    }

    pub fn check_status(&self, kind: AnalysisKind) -> &CheckStatus {
        &self.slot(kind).status
    }

    /// Outcome of the last completed check of `kind`. Survives a re-check in flight.
    pub fn last_outcome(&self, kind: AnalysisKind) -> Option<&CheckOutcome> {
        match &self.slot(kind).status {
            CheckStatus::Idle => None,
            CheckStatus::InFlight { previous, .. } => previous.as_ref(),
            CheckStatus::Completed { outcome, .. } => Some(outcome),
        }
    }

    /// Score of the last completed check of `kind`, if it produced one.
    pub fn last_score(&self, kind: AnalysisKind) -> Option<f64> {
        self.last_outcome(kind).and_then(CheckOutcome::score)
    }

    pub fn begin_check(&mut self, kind: AnalysisKind) -> CheckTicket {
        let seq = self.slot_mut(kind).begin();
        CheckTicket { kind, seq }
    }

    /// Returns false when a newer check of the same kind was started after `ticket`.
    pub fn apply_result(&mut self, ticket: CheckTicket, outcome: CheckOutcome) -> bool {
        self.slot_mut(ticket.kind).complete(ticket.seq, outcome)
    }

    pub fn apply_drift_result(&mut self, seq: u64, outcome: CheckOutcome) -> bool {
        self.apply_result(
            CheckTicket {
                kind: AnalysisKind::Drift,
                seq,
            },
            outcome,
        )
    }

    pub fn apply_secret_result(&mut self, seq: u64, outcome: CheckOutcome) -> bool {
        self.apply_result(
            CheckTicket {
                kind: AnalysisKind::Secret,
                seq,
            },
            outcome,
        )
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn refresh_status(&self) -> &RefreshStatus {
        &self.refresh
    }

    pub fn begin_refresh(&mut self) -> u64 {
        self.refresh_issued += 1;
        self.refresh = RefreshStatus::InFlight;
        self.refresh_issued
    }

    /// Replaces the feed wholesale, in delivered order. Returns false when a feed from
    /// a newer refresh is already in place. The refresh status only moves when `seq` is
    /// the latest refresh issued.
    pub fn replace_event_feed(&mut self, seq: u64, events: Vec<Event>) -> bool {
        if seq <= self.refresh_applied {
            return false;
        }
        self.refresh_applied = seq;
        if seq == self.refresh_issued {
            self.refresh = RefreshStatus::Refreshed {
                count: events.len(),
            };
        }
        self.events = events;
        true
    }

    /// Skips and failures never touch the feed and only report for the latest refresh.
    pub fn skip_refresh(&mut self, seq: u64, status: u16) -> bool {
        if seq != self.refresh_issued {
            return false;
        }
        self.refresh = RefreshStatus::Skipped { status };
        true
    }

    pub fn fail_refresh(&mut self, seq: u64, reason: impl Into<String>) -> bool {
        if seq != self.refresh_issued {
            return false;
        }
        self.refresh = RefreshStatus::Failed(reason.into());
        true
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
