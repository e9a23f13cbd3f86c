//! Download progress bar.

use indicatif::{ProgressBar, ProgressStyle};
use updraft::fetch::DownloadProgress;

const TEMPLATE: &str = "{msg:24!} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})";

/// Progress bar shared by every download of a run.
///
/// The bar is reset whenever an event arrives for a different file.
#[derive(Clone)]
pub struct DownloadBar {
    bar: ProgressBar,
}

impl DownloadBar {
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        if let Ok(style) = ProgressStyle::default_bar().template(TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }

    pub fn update(&self, progress: &DownloadProgress) {
        let name = file_name(&progress.url);
        if self.bar.is_hidden() || self.bar.message() != name {
            self.bar.reset();
            self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            self.bar.set_message(name.to_string());
        }
        self.bar.set_length(progress.total_bytes);
        self.bar.set_position(progress.bytes_downloaded);
        if progress.percentage >= 100 {
            self.bar.finish();
            self.bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        }
    }

    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

fn file_name(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}
