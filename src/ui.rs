//! Terminal output for staging progress
//!
//! The [`Ui`] trait is what the stager reports to; container output goes to a
//! [`FrameSink`](crate::stream::FrameSink) instead.

use indicatif::{ProgressBar, ProgressStyle};
use std::error::Error as StdError;
use std::time::Duration;

/// ANSI color applied to a stage's log prefix
///
/// Passed explicitly to each stage so concurrent stages can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogColor {
    #[default]
    Plain,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
}

impl LogColor {
    const CYCLE: [LogColor; 5] = [
        LogColor::Cyan,
        LogColor::Magenta,
        LogColor::Yellow,
        LogColor::Green,
        LogColor::Blue,
    ];

    /// Picks a color for the `index`-th concurrent stage.
    pub fn for_index(index: usize) -> Self {
        Self::CYCLE[index % Self::CYCLE.len()]
    }

    fn code(self) -> Option<&'static str> {
        match self {
            LogColor::Plain => None,
            LogColor::Red => Some("31"),
            LogColor::Green => Some("32"),
            LogColor::Yellow => Some("33"),
            LogColor::Blue => Some("34"),
            LogColor::Magenta => Some("35"),
            LogColor::Cyan => Some("36"),
        }
    }

    pub fn paint(self, text: &str) -> String {
        match self.code() {
            Some(code) => format!("\x1b[{}m{}\x1b[0m", code, text),
            None => text.to_string(),
        }
    }
}

/// User-facing reporting
pub trait Ui: Send + Sync {
    /// Writes one line of normal output.
    fn output(&self, line: &str);

    /// Reports an error, including its source chain.
    fn error(&self, err: &(dyn StdError + 'static));

    /// Shows `message` with a spinner until the returned guard is dropped.
    fn loading(&self, message: &str) -> Loading;
}

/// Spinner guard returned by [`Ui::loading`]
pub struct Loading {
    bar: Option<ProgressBar>,
}

impl Loading {
    /// A guard that displays nothing
    pub fn hidden() -> Self {
        Self { bar: None }
    }

    fn spinner(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar: Some(bar) }
    }
}

impl Drop for Loading {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// [`Ui`] writing to the process's stdout and stderr
#[derive(Debug, Clone, Copy)]
pub struct ConsoleUi {
    interactive: bool,
}

impl ConsoleUi {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }

    /// Spinners and colors only when stdout is a terminal
    pub fn detect() -> Self {
        Self::new(atty::is(atty::Stream::Stdout))
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }
}

/// Renders `err` followed by its causes, one per line.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str("\n  caused by: ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl Ui for ConsoleUi {
    fn output(&self, line: &str) {
        println!("{}", line);
    }

    fn error(&self, err: &(dyn StdError + 'static)) {
        let label = if self.interactive {
            LogColor::Red.paint("Error:")
        } else {
            "Error:".to_string()
        };
        eprintln!("{} {}", label, error_chain(err));
    }

    fn loading(&self, message: &str) -> Loading {
        if self.interactive {
            Loading::spinner(message)
        } else {
            Loading::hidden()
        }
    }
}
