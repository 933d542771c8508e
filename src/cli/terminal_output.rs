//! Live subprocess output for `--stream`
//!
//! Instances run concurrently, so every line carries its instance label. A
//! header with a separator is printed whenever the step producing output
//! changes, which keeps sequential runs readable.

use crate::execution::{ExecutionEvent, OutputStream};
use console::style;
use std::io::{self, Write};
use std::sync::Mutex;

/// Prints step output lines as they arrive
#[derive(Debug, Default)]
pub struct TerminalOutput {
    /// `(instance, step)` of the last printed line
    current: Mutex<Option<(String, String)>>,
}

impl TerminalOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print a separator line spanning the terminal
    fn print_separator(&self) {
        let width = term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80);
        println!("{}", style("─".repeat(width)).dim());
    }

    fn print_step_header(&self, instance: &str, step: &str) {
        self.print_separator();
        println!("{} {}", style(instance).cyan(), style(step).bold());
    }

    /// Whether a header is due for output from `instance`/`step`
    fn switch_to(&self, instance: &str, step: &str) -> bool {
        let Ok(mut current) = self.current.lock() else {
            return false;
        };
        let same = matches!(&*current, Some((i, s)) if i == instance && s == step);
        if !same {
            *current = Some((instance.to_string(), step.to_string()));
        }
        !same
    }

    pub fn prefix(instance: &str, stream: OutputStream) -> String {
        match stream {
            OutputStream::Stdout => format!("[{}]", instance),
            OutputStream::Stderr => format!("[{}!]", instance),
        }
    }

    pub fn on_event(&self, event: &ExecutionEvent) {
        if let ExecutionEvent::StepOutput {
            instance,
            step,
            stream,
            line,
            ..
        } = event
        {
            if self.switch_to(instance, step) {
                self.print_step_header(instance, step);
            }
            println!("{} {}", style(Self::prefix(instance, *stream)).dim(), line);
            let _ = io::stdout().flush();
        }
    }
}
