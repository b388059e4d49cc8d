//! Terminal presentation for `overlayd`: setup stages and a live status line.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: &str) -> Self {
        match flag {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, stderr_is_tty: bool) -> Self {
        let pretty = stderr_is_tty
            && match mode {
                UiMode::Pretty | UiMode::Auto => true,
                UiMode::Plain => false,
            };
        Self { pretty }
    }

    /// Spinner (or a plain `==>` line) until the guard drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = self.pretty.then(|| {
            let spinner = spinner("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            spinner
        });
        if spinner.is_none() {
            eprintln!("==> {}", name);
        }
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    /// Line that is redrawn in place on a TTY and printed otherwise.
    pub fn status_line(&self) -> StatusLine {
        StatusLine {
            bar: self
                .pretty
                .then(|| spinner("{spinner} [{elapsed_precise}] {msg}")),
            last: None,
        }
    }
}

fn spinner(template: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_draw_target(ProgressDrawTarget::stderr());
    bar.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    bar.set_style(style);
    bar
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    /// End the stage with a failure mark instead of a check.
    pub fn fail(mut self, reason: &str) {
        self.failed = true;
        let message = format!("✘ {} ({})", self.name, reason);
        match self.spinner.take() {
            Some(spinner) => spinner.abandon_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if self.failed {
            return;
        }
        let Some(spinner) = self.spinner.take() else {
            eprintln!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
            return;
        };
        spinner.finish_with_message(format!(
            "✔ {} ({})",
            self.name,
            format_duration(self.start.elapsed())
        ));
    }
}

pub struct StatusLine {
    bar: Option<ProgressBar>,
    last: Option<String>,
}

impl StatusLine {
    /// Show `message`. Plain output only prints when the text changes.
    pub fn update(&mut self, message: String) {
        if self.last.as_deref() == Some(message.as_str()) {
            return;
        }
        match &self.bar {
            Some(bar) => bar.set_message(message.clone()),
            None => eprintln!("{message}"),
        }
        self.last = Some(message);
    }

    /// Print a line above the status without disturbing it.
    pub fn println(&self, line: &str) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
