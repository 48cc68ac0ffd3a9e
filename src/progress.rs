//! Build progress reporting.
//!
//! The orchestrator reports through a [`ProgressSink`]. Rendering is
//! best-effort: a sink never fails a build, and the stderr bar disables
//! itself on the first write error.

use parking_lot::Mutex;
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Receives progress events from a generation run.
pub trait ProgressSink: Send + Sync {
    fn start(&self, _label: &str, _total: usize) {}
    /// One module reached a terminal state.
    fn advance(&self, _module: &str, _ok: bool) {}
    fn finish(&self) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

const BAR_WIDTH: usize = 28;
const MIN_INTERVAL: Duration = Duration::from_millis(80);

#[derive(Debug, Default)]
struct BarState {
    label: String,
    total: usize,
    done: usize,
    ok: usize,
    failed: usize,
    last_item: String,
    last_render: Option<Instant>,
    finished: bool,
    disabled: bool,
}

impl BarState {
    fn line(&self) -> String {
        let filled = if self.total == 0 {
            BAR_WIDTH
        } else {
            (self.done * BAR_WIDTH / self.total).min(BAR_WIDTH)
        };
        let mut line = format!(
            "{} [{}{}] {}/{} ok={} fail={}",
            self.label,
            "#".repeat(filled),
            "-".repeat(BAR_WIDTH - filled),
            self.done,
            self.total,
            self.ok,
            self.failed
        );
        if !self.last_item.is_empty() {
            line.push_str("  ");
            line.push_str(&self.last_item);
        }
        line
    }
}

/// Single-line progress bar redrawn in place on a writer (stderr by default).
pub struct ProgressBar<W: Write + Send = io::Stderr> {
    out: Mutex<W>,
    state: Mutex<BarState>,
}

impl ProgressBar<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write + Send> ProgressBar<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            state: Mutex::new(BarState::default()),
        }
    }

    fn render(&self, state: &mut BarState, force: bool) {
        if state.disabled {
            return;
        }
        let now = Instant::now();
        if !force {
            if let Some(last) = state.last_render {
                if now.duration_since(last) < MIN_INTERVAL {
                    return;
                }
            }
        }
        state.last_render = Some(now);
        let mut out = self.out.lock();
        let written = write!(out, "\r{}", state.line()).and_then(|_| out.flush());
        if written.is_err() {
            state.disabled = true;
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> ProgressSink for ProgressBar<W> {
    fn start(&self, label: &str, total: usize) {
        let mut state = self.state.lock();
        let disabled = state.disabled;
        *state = BarState {
            label: label.to_string(),
            total,
            disabled,
            ..BarState::default()
        };
        self.render(&mut state, true);
    }

    fn advance(&self, module: &str, ok: bool) {
        let mut state = self.state.lock();
        if state.finished {
            return;
        }
        state.done += 1;
        if ok {
            state.ok += 1;
        } else {
            state.failed += 1;
        }
        state.last_item = module.to_string();
        let complete = state.done >= state.total;
        self.render(&mut state, complete);
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        if state.finished {
            return;
        }
        state.finished = true;
        state.last_item = "done".to_string();
        self.render(&mut state, true);
        if state.disabled {
            return;
        }
        let mut out = self.out.lock();
        if writeln!(out).and_then(|_| out.flush()).is_err() {
            state.disabled = true;
        }
    }
}
