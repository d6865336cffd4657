//! Display projections of the session: feed rows, per-kind check cards, and a text table.

use std::fmt::{self, Write as _};

use chrono::{DateTime, Local, TimeZone};
use shared::{domain::AnalysisKind, protocol::Event};

use crate::session::{CheckOutcome, CheckStatus, RefreshStatus, SessionState};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const SCORE_DECIMALS: usize = 3;

/// Three decimals. Absent scores render as an empty string.
pub fn format_score(score: Option<f64>) -> String {
    match score {
        Some(score) => format!("{score:.prec$}", prec = SCORE_DECIMALS),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub id: i64,
    pub time: String,
    pub kind: String,
    pub score: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckDisplayState {
    Idle,
    Pending,
    Scored,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckView {
    pub kind: AnalysisKind,
    pub state: CheckDisplayState,
    pub score: String,
    pub detail: Option<String>,
}

impl CheckView {
    pub fn title(&self) -> &'static str {
        match self.kind {
            AnalysisKind::Drift => "Drift Anomaly Score",
            AnalysisKind::Secret => "Leak Risk Score",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleView {
    pub drift: CheckView,
    pub secret: CheckView,
    pub feed: Vec<EventRow>,
    pub feed_status: String,
}

#[derive(Debug, Clone)]
pub struct FeedRenderer<Tz: TimeZone = Local> {
    tz: Tz,
}

impl FeedRenderer<Local> {
    pub fn local() -> Self {
        Self { tz: Local }
    }
}

impl Default for FeedRenderer<Local> {
    fn default() -> Self {
        Self::local()
    }
}

impl<Tz> FeedRenderer<Tz>
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    pub fn with_timezone(tz: Tz) -> Self {
        Self { tz }
    }

    /// `ts` is whole epoch seconds; converted through milliseconds.
    pub fn format_time(&self, ts: i64) -> String {
        ts.checked_mul(1000)
            .and_then(DateTime::from_timestamp_millis)
            .map(|at| at.with_timezone(&self.tz).format(TIME_FORMAT).to_string())
            .unwrap_or_default()
    }

    pub fn render_event(&self, event: &Event) -> EventRow {
        EventRow {
            id: event.id.0,
            time: self.format_time(event.ts),
            kind: event.kind.clone(),
            score: format_score(event.score),
        }
    }

    pub fn render_feed(&self, events: &[Event]) -> Vec<EventRow> {
        events.iter().map(|event| self.render_event(event)).collect()
    }

    pub fn render_session(&self, state: &SessionState) -> ConsoleView {
        ConsoleView {
            drift: check_view(AnalysisKind::Drift, state.check_status(AnalysisKind::Drift)),
            secret: check_view(
                AnalysisKind::Secret,
                state.check_status(AnalysisKind::Secret),
            ),
            feed: self.render_feed(state.events()),
            feed_status: refresh_label(state.refresh_status()),
        }
    }
}

pub fn check_view(kind: AnalysisKind, status: &CheckStatus) -> CheckView {
    let (state, score, detail) = match status {
        CheckStatus::Idle => (CheckDisplayState::Idle, String::new(), None),
        CheckStatus::InFlight { previous, .. } => (
            CheckDisplayState::Pending,
            format_score(previous.as_ref().and_then(CheckOutcome::score)),
            None,
        ),
        CheckStatus::Completed {
            outcome: CheckOutcome::Scored(result),
            ..
        } => (
            CheckDisplayState::Scored,
            format_score(result.score),
            result.changes.map(changes_label),
        ),
        CheckStatus::Completed {
            outcome: CheckOutcome::Failed(reason),
            ..
        } => (CheckDisplayState::Failed, String::new(), Some(reason.clone())),
    };
    CheckView {
        kind,
        state,
        score,
        detail,
    }
}

fn changes_label(n: u32) -> String {
    match n {
        1 => "1 heuristic change".to_string(),
        n => format!("{n} heuristic changes"),
    }
}

pub fn refresh_label(status: &RefreshStatus) -> String {
    match status {
        RefreshStatus::Idle => "not loaded".to_string(),
        RefreshStatus::InFlight => "refreshing".to_string(),
        RefreshStatus::Refreshed { count } => format!("{count} events"),
        RefreshStatus::Skipped { status } => format!("refresh skipped (HTTP {status})"),
        RefreshStatus::Failed(reason) => format!("refresh failed: {reason}"),
    }
}

/// Left-aligned Time/Kind/Score table.
pub fn feed_table(rows: &[EventRow]) -> String {
    let headers = ["Time", "Kind", "Score"];
    let mut widths = headers.map(str::len);
    for row in rows {
        widths[0] = widths[0].max(row.time.len());
        widths[1] = widths[1].max(row.kind.len());
        widths[2] = widths[2].max(row.score.len());
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<w0$}  {:<w1$}  {}",
        headers[0],
        headers[1],
        headers[2],
        w0 = widths[0],
        w1 = widths[1]
    );
    for row in rows {
        let line = format!(
            "{:<w0$}  {:<w1$}  {}",
            row.time,
            row.kind,
            row.score,
            w0 = widths[0],
            w1 = widths[1]
        );
        let _ = writeln!(out, "{}", line.trim_end());
    }
    out
}

impl fmt::Display for CheckView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            CheckDisplayState::Idle => write!(f, "{}: -", self.title()),
            CheckDisplayState::Pending if self.score.is_empty() => {
                write!(f, "{}: checking...", self.title())
            }
            CheckDisplayState::Pending => {
                write!(f, "{}: {} (checking...)", self.title(), self.score)
            }
            CheckDisplayState::Scored => {
                write!(f, "{}: {}", self.title(), self.score)?;
                if let Some(detail) = &self.detail {
                    write!(f, " ({detail})")?;
                }
                Ok(())
            }
            CheckDisplayState::Failed => write!(
                f,
                "{}: failed ({})",
                self.title(),
                self.detail.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
