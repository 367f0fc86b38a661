//! Presentation collaborators
//!
//! The pipeline never draws anything itself; it hands the current frame
//! path and status text to a [`Display`]. The terminal implementation
//! renders both on a single indicatif status line.

use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Sink for the animator's visual output.
pub trait Display {
    /// Show `path` as the current mouth frame.
    fn show_frame(&mut self, path: &Path);

    /// Show a status message (calibration progress, errors).
    fn set_status(&mut self, text: &str);

    /// Hide the status message once the pipeline is listening.
    fn hide_status(&mut self);
}

/// Terminal display backed by a single spinner line.
pub struct TerminalDisplay {
    bar: ProgressBar,
    status: Option<String>,
}

impl TerminalDisplay {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));

        Self { bar, status: None }
    }

    fn redraw(&self, frame: Option<&Path>) {
        let message = match (&self.status, frame) {
            (Some(status), Some(path)) => format!("{status}  {}", path.display()),
            (Some(status), None) => status.clone(),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => String::new(),
        };
        self.bar.set_message(message);
    }
}

impl Display for TerminalDisplay {
    fn show_frame(&mut self, path: &Path) {
        self.redraw(Some(path));
    }

    fn set_status(&mut self, text: &str) {
        self.status = Some(text.to_string());
        self.redraw(None);
    }

    fn hide_status(&mut self) {
        self.status = None;
        self.redraw(None);
    }
}

impl Default for TerminalDisplay {
    fn default() -> Self {
        Self::new()
    }
}
