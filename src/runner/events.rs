use super::state::StepStatus;
use crate::report::ReportSummary;
use tokio::sync::broadcast;

/// Lifecycle events for real-time progress output
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    RunStarted {
        run_id: String,
        target: String,
    },
    RunFinished {
        summary: ReportSummary,
        report_path: Option<String>,
    },

    ScenarioStarted {
        name: String,
        ignored: bool,
    },
    StepFinished {
        scenario: String,
        name: String,
        status: StepStatus,
    },
    ScenarioFinished {
        name: String,
        status: StepStatus,
        duration_ms: Option<u64>,
        trace_path: Option<String>,
    },
    ScenarioAborted {
        name: String,
        error: String,
    },
}

/// Event emitter for broadcasting lifecycle events
pub struct EventEmitter {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventEmitter {
    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }
}

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration as StdDuration;

/// Console event listener for printing real-time updates
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<LifecycleEvent>) {
        use colored::Colorize;
        use std::io::IsTerminal;

        let is_terminal = std::io::stdout().is_terminal();
        let mut spinner: Option<ProgressBar> = None;
        let mut steps_done = 0usize;

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                LifecycleEvent::RunStarted { run_id, target } => {
                    println!(
                        "\n{} Test run started: {} ({})",
                        "▶".green().bold(),
                        run_id.cyan(),
                        target
                    );
                }

                LifecycleEvent::ScenarioStarted { name, ignored } => {
                    steps_done = 0;
                    if ignored {
                        println!("  {} Scenario: {} {}", "○".yellow(), name, "(ignored)".dimmed());
                        continue;
                    }
                    let pb = if is_terminal {
                        ProgressBar::new_spinner()
                    } else {
                        // Piped output gets no escape codes
                        ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
                    };
                    if let Ok(style) = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template("  {spinner} {msg}")
                    {
                        pb.set_style(style);
                    }
                    pb.set_message(format!("Scenario: {}", name.white().bold()));
                    pb.enable_steady_tick(StdDuration::from_millis(100));
                    spinner = Some(pb);
                }

                LifecycleEvent::StepFinished {
                    scenario,
                    name,
                    status,
                } => {
                    steps_done += 1;
                    if let Some(pb) = &spinner {
                        pb.set_message(format!(
                            "Scenario: {} [{} steps] {}",
                            scenario.white().bold(),
                            steps_done,
                            name.dimmed()
                        ));
                    }
                    if !status.is_passed() {
                        let line = format!("      {} {} ({})", "✗".red(), name, status);
                        match &spinner {
                            Some(pb) => pb.println(line),
                            None => println!("{}", line),
                        }
                    }
                }

                LifecycleEvent::ScenarioFinished {
                    name,
                    status,
                    duration_ms,
                    trace_path,
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    let mark = if status.is_passed() {
                        "✓".green()
                    } else {
                        "✗".red()
                    };
                    let duration = duration_ms
                        .map(|d| format!(" ({}ms)", d))
                        .unwrap_or_default();
                    println!("  {} {} [{}]{}", mark, name, status, duration);
                    if let Some(path) = trace_path {
                        println!("      Trace: {}", path.dimmed());
                    }
                }

                LifecycleEvent::ScenarioAborted { name, error } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    eprintln!("  {} {} aborted: {}", "✗".red().bold(), name, error.red());
                }

                LifecycleEvent::RunFinished {
                    summary,
                    report_path,
                } => {
                    println!("\n{} Test run finished", "■".blue().bold());
                    println!("  Total scenarios: {}", summary.total_scenarios);
                    println!("  Total steps: {}", summary.total_steps);
                    println!(
                        "  {} passed, {} failed, {} other",
                        summary.passed.to_string().green(),
                        summary.failed.to_string().red(),
                        summary.other.to_string().yellow()
                    );
                    if let Some(path) = report_path {
                        println!("  Report: {}", path);
                    }
                    break;
                }
            }
        }
    }
}
