//! Terminal rendering of image pulls.

use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde_json::json;

use super::output;
use crate::adapter::container::{format_bytes, ProgressSnapshot, PullReporter};

/// One progress bar per image being pulled.
pub struct TerminalPullReporter {
    bars: MultiProgress,
    active: HashMap<String, ProgressBar>,
}

impl Default for TerminalPullReporter {
    fn default() -> Self {
        let target = if output::is_json() || output::is_quiet() {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        Self {
            bars: MultiProgress::with_draw_target(target),
            active: HashMap::new(),
        }
    }
}

impl TerminalPullReporter {
    fn bar(&mut self, image: &str) -> &ProgressBar {
        self.active.entry(image.to_string()).or_insert_with(|| {
            let bar = self.bars.add(ProgressBar::new(100));
            if let Ok(style) =
                ProgressStyle::with_template("  {prefix:.cyan} [{bar:30}] {percent:>3}% {msg}")
            {
                bar.set_style(style.progress_chars("=> "));
            }
            bar.set_prefix(format!("pull {image}"));
            bar
        })
    }
}

impl PullReporter for TerminalPullReporter {
    fn update(&mut self, image: &str, snapshot: &ProgressSnapshot) {
        if output::is_json() {
            output::json_output(json!({
                "type": "pull",
                "payload": {
                    "image": image,
                    "current": snapshot.current,
                    "total": snapshot.total,
                    "percent": snapshot.percent(),
                    "rate": snapshot.rate,
                },
            }));
            return;
        }

        let message = match snapshot.rate {
            Some(rate) => format!(
                "{} / {} ({}/s)",
                format_bytes(snapshot.current),
                format_bytes(snapshot.total),
                format_bytes(rate as u64)
            ),
            None => format!(
                "{} / {}",
                format_bytes(snapshot.current),
                format_bytes(snapshot.total)
            ),
        };
        let bar = self.bar(image);
        bar.set_position(snapshot.percent().round() as u64);
        bar.set_message(message);
    }

    fn finish(&mut self, image: &str, result: Result<(), &str>) {
        let bar = self.active.remove(image);
        match result {
            Ok(()) => {
                if let Some(bar) = bar {
                    bar.finish_and_clear();
                }
                output::success(&format!("pulled {image}"));
            }
            Err(reason) => {
                if let Some(bar) = bar {
                    bar.abandon();
                }
                output::warning(&format!("pull of {image} failed: {reason}"));
            }
        }
    }
}
