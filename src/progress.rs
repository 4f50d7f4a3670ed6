//! Thin progress-reporting wrapper around `indicatif`.
//!
//! An analytic pass calls [`Progress::tick`] at each of its suspension
//! points (one gene pair processed, one threshold step evaluated); in a
//! non-interactive context (tests, library use) [`Progress::disabled`]
//! gives a no-op implementation with the identical call surface.

use indicatif::{ProgressBar, ProgressStyle};

pub struct Progress {
    bar: Option<ProgressBar>,
}

impl Progress {
    pub fn new(total: u64, message: &str) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(message.to_string());
        Progress { bar: Some(bar) }
    }

    pub fn disabled() -> Self {
        Progress { bar: None }
    }

    pub fn tick(&self) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
