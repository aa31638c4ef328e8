use std::collections::VecDeque;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::types::{BotMode, BotStatus, StatusSnapshot};

/// Number of log lines kept when not configured otherwise.
pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// Bounded, insertion-ordered log of timestamped lines. Oldest lines are evicted first.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `message` stamped with the current time.
    pub fn append(&mut self, message: &str) {
        self.append_at(Utc::now(), message);
    }

    /// Append `message` stamped with `at`.
    pub fn append_at(&mut self, at: DateTime<Utc>, message: &str) {
        let stamp = at.to_rfc3339_opts(SecondsFormat::Millis, true);
        self.lines.push_back(format!("[{stamp}] {message}"));
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Fields that exist only while a process is owned.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRun {
    pub pid: Option<u32>,
    pub start_time: DateTime<Utc>,
    pub mode: BotMode,
}

/// Observable state of the supervised bot.
///
/// `pid`, `start_time` and `mode` live together in `run`, so they are either
/// all present or all absent.
#[derive(Debug, Clone, Default)]
pub struct BotState {
    pub status: BotStatus,
    pub run: Option<ActiveRun>,
    pub logs: LogBuffer,
}

impl BotState {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            status: BotStatus::Idle,
            run: None,
            logs: LogBuffer::new(log_capacity),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == BotStatus::Running
    }

    /// Record a successful spawn.
    pub fn mark_running(&mut self, pid: Option<u32>, mode: BotMode) {
        self.status = BotStatus::Running;
        self.run = Some(ActiveRun {
            pid,
            start_time: Utc::now(),
            mode,
        });
    }

    /// Child exited: back to idle, ownership released.
    pub fn mark_exited(&mut self) {
        self.status = BotStatus::Idle;
        self.run = None;
    }

    /// Spawn or runtime failure: error state, ownership released.
    pub fn mark_failed(&mut self) {
        self.status = BotStatus::Error;
        self.run = None;
    }

    /// Polling view: counts instead of log content.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            pid: self.run.as_ref().and_then(|r| r.pid),
            start_time: self.run.as_ref().map(|r| r.start_time),
            mode: self.run.as_ref().map(|r| r.mode),
            log_count: self.logs.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // ── LogBuffer ──────────────────────────────────────────────────

    #[test]
    fn log_prefixes_timestamp() {
        let mut logs = LogBuffer::new(10);
        let at = Utc.with_ymd_and_hms(2026, 1, 19, 12, 0, 2).unwrap();
        logs.append_at(at, "hello");
        assert_eq!(logs.lines(), vec!["[2026-01-19T12:00:02.000Z] hello"]);
    }

    #[test]
    fn log_never_exceeds_capacity() {
        let mut logs = LogBuffer::default();
        for i in 0..500 {
            logs.append(&format!("line {i}"));
            assert!(logs.len() <= DEFAULT_LOG_CAPACITY);
        }
        assert_eq!(logs.len(), DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn log_evicts_oldest_one_at_a_time() {
        let mut logs = LogBuffer::new(3);
        for i in 0..3 {
            logs.append(&format!("line {i}"));
        }
        logs.append("line 3");
        let lines = logs.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("line 1"));
        assert!(lines[2].ends_with("line 3"));

        logs.append("line 4");
        let lines = logs.lines();
        assert!(lines[0].ends_with("line 2"));
        assert!(lines[2].ends_with("line 4"));
    }

    #[test]
    fn log_zero_capacity_clamped() {
        let mut logs = LogBuffer::new(0);
        logs.append("a");
        logs.append("b");
        assert_eq!(logs.capacity(), 1);
        assert!(logs.lines()[0].ends_with("b"));
    }

    // ── BotState ───────────────────────────────────────────────────

    #[test]
    fn idle_snapshot_is_empty() {
        let state = BotState::new(10);
        let snap = state.snapshot();
        assert_eq!(snap.status, BotStatus::Idle);
        assert_eq!(snap.pid, None);
        assert_eq!(snap.start_time, None);
        assert_eq!(snap.mode, None);
        assert_eq!(snap.log_count, 0);
    }

    #[test]
    fn running_then_exit_clears_run() {
        let mut state = BotState::new(10);
        state.mark_running(Some(42), BotMode::DryRunImmediate);
        state.logs.append("started");
        let snap = state.snapshot();
        assert_eq!(snap.status, BotStatus::Running);
        assert_eq!(snap.pid, Some(42));
        assert!(snap.start_time.is_some());
        assert_eq!(snap.mode, Some(BotMode::DryRunImmediate));
        assert_eq!(snap.log_count, 1);

        state.mark_exited();
        let snap = state.snapshot();
        assert_eq!(snap.status, BotStatus::Idle);
        assert_eq!((snap.pid, snap.start_time, snap.mode), (None, None, None));
        assert_eq!(snap.log_count, 1);
    }

    #[test]
    fn failure_sets_error() {
        let mut state = BotState::new(10);
        state.mark_running(None, BotMode::Login);
        state.mark_failed();
        assert_eq!(state.status, BotStatus::Error);
        assert!(state.run.is_none());
        assert!(!state.is_running());
    }
}
