//! Terminal feedback for the ETL stages: bars for reading input files and
//! inserting rows, a spinner while a table is bulk-copied. `--log-only`
//! hides all of them.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static HIDDEN: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    HIDDEN.store(value, Ordering::Relaxed);
}

fn styled(pb: ProgressBar, template: &str, msg: String) -> ProgressBar {
    if HIDDEN.load(Ordering::Relaxed) {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(msg);
    pb
}

pub fn progress_bar(len: usize, msg: &str) -> ProgressBar {
    styled(
        ProgressBar::new(len as u64),
        "{msg} [{bar:30.cyan/blue}] {pos}/{len} ({per_sec})",
        msg.to_string(),
    )
}

/// Spinner shown while one table is copied.
pub fn table_spinner(table: &str) -> ProgressBar {
    let pb = styled(
        ProgressBar::new_spinner(),
        "{spinner} {msg} [{elapsed}]",
        format!("Copying {}", table),
    );
    if !pb.is_hidden() {
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb
}

/// Elapsed time for the run summary: milliseconds below one second,
/// seconds below one minute, then minutes.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", d.as_millis())
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}
