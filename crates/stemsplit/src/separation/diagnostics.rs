use std::collections::VecDeque;

use crate::separation::progress::is_progress_line;

/// Lines the tool prints on every run that say nothing about a failure.
const HARMLESS_MARKERS: [&str; 2] = ["torchcodec", "ModuleNotFoundError"];

/// Bounded tail of the tool's diagnostic output, used as the job's error
/// message when a run fails.
#[derive(Debug, Clone)]
pub struct DiagnosticTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records a line unless it is blank, a progress bar or known noise.
    pub fn push(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || is_progress_line(trimmed)
            || HARMLESS_MARKERS.iter().any(|m| trimmed.contains(m))
        {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(trimmed.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}
