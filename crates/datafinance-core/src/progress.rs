//! Progress display for downloads and extractions.
//!
//! Interactive runs show one spinner line per in-flight file under a shared
//! `MultiProgress`; headless runs (cron, CI) get hidden bars and rely on
//! the log stream instead.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Widest file-name prefix before truncation keeps bars aligned
const PREFIX_WIDTH: usize = 24;

fn file_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {prefix:<24} {elapsed:>4} {wide_msg:.dim}")
        .expect("invalid progress template")
}

/// Progress display shared by all pipeline workers.
pub struct PipelineProgress {
    bars: MultiProgress,
    interactive: bool,
}

impl PipelineProgress {
    /// Detect whether stderr is a terminal and draw accordingly.
    pub fn detect() -> Self {
        Self {
            bars: MultiProgress::new(),
            interactive: std::io::stderr().is_terminal(),
        }
    }

    /// Display that never draws, for headless embedding and tests.
    pub fn hidden() -> Self {
        Self {
            bars: MultiProgress::new(),
            interactive: false,
        }
    }

    /// Bar tracking one archive or download. A no-op without a terminal;
    /// workers update it with `set_message` and clear it when done.
    pub fn file_bar(&self, name: &str) -> ProgressBar {
        if !self.interactive {
            return ProgressBar::hidden();
        }
        let bar = self.bars.add(ProgressBar::new_spinner());
        bar.set_style(file_style());
        let prefix: String = name.chars().take(PREFIX_WIDTH).collect();
        bar.set_prefix(prefix);
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }

    /// The underlying `MultiProgress`, for the log bridge.
    pub fn bars(&self) -> &MultiProgress {
        &self.bars
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }
}

impl Default for PipelineProgress {
    fn default() -> Self {
        Self::detect()
    }
}

/// Shared handle passed to every worker.
pub type SharedProgress = Arc<PipelineProgress>;

/// Render a row count with thousands separators.
pub fn fmt_count(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
