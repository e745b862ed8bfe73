use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
    Quiet,
}

/// Stage progress on stderr. stdout is left to the result document.
#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn from_args(ui_flag: &str, is_tty: bool) -> Self {
        let mode = match ui_flag {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            "quiet" => UiMode::Quiet,
            _ => UiMode::Auto,
        };
        Self { mode, is_tty }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = match self.mode {
            UiMode::Quiet => return StageGuard::new(name, Output::Silent),
            UiMode::Plain => None,
            UiMode::Pretty | UiMode::Auto if self.is_tty => Some(spinner(name)),
            UiMode::Pretty | UiMode::Auto => None,
        };
        match spinner {
            Some(spinner) => StageGuard::new(name, Output::Spinner(spinner)),
            None => {
                eprintln!("==> {}", name);
                StageGuard::new(name, Output::Plain)
            }
        }
    }
}

fn spinner(name: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(format!("{name}…"));
    spinner
}

enum Output {
    Spinner(ProgressBar),
    Plain,
    Silent,
}

/// Reports the stage when dropped: `✔` after `done`, `✘` otherwise.
pub struct StageGuard {
    name: String,
    start: Instant,
    output: Output,
    detail: Option<String>,
    succeeded: bool,
}

impl StageGuard {
    fn new(name: &str, output: Output) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
            output,
            detail: None,
            succeeded: false,
        }
    }

    pub fn done(mut self) {
        self.succeeded = true;
    }

    pub fn done_with(mut self, detail: impl Into<String>) {
        self.detail = Some(detail.into());
        self.succeeded = true;
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        let mark = if self.succeeded { '✔' } else { '✘' };
        let message = match &self.detail {
            Some(detail) => format!("{} {}: {} ({})", mark, self.name, detail, elapsed),
            None => format!("{} {} ({})", mark, self.name, elapsed),
        };
        match &self.output {
            Output::Spinner(spinner) if self.succeeded => spinner.finish_with_message(message),
            Output::Spinner(spinner) => spinner.abandon_with_message(message),
            Output::Plain => eprintln!("{message}"),
            Output::Silent => {}
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
