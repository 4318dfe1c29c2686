use colored::Colorize;

use state::State;
use util::Timer;

use crate::discovery::{Summary, UnitOutcome};

/// All interactions with the text UI should go through this struct.
pub struct Ui {
    /// displays extra text info to user (log level debug or higher)
    pub verbose: bool,
    /// times the whole pass
    timer: Timer,
}

impl Ui {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            timer: Timer::now(),
        }
    }

    pub fn start_timer(&mut self) {
        self.timer.reset();
    }

    pub fn print_elapsed(&self, task: &str) {
        if self.verbose {
            self.timer.print_elapsed(task);
        }
    }

    pub fn verbose_msg(&self, msg: &str) {
        if self.verbose {
            eprintln!("{}", msg);
        }
    }

    /// One line per unit; skipped units only when verbose.
    pub fn unit_outcome(&self, unit: &str, outcome: &UnitOutcome) {
        match outcome {
            UnitOutcome::Submitted { job_id } => {
                let job = job_id.as_deref().unwrap_or("?");
                eprintln!("{} {} (job {})", "SUBMITTED".green(), unit, job);
            }
            UnitOutcome::WouldSubmit => eprintln!("{} {}", "WOULD SUBMIT".cyan(), unit),
            UnitOutcome::Skipped(reason) => {
                if self.verbose {
                    eprintln!("{} {}: {}", "SKIPPED".yellow(), unit, reason);
                }
            }
            UnitOutcome::Failed => eprintln!("{} {}", "FAILED".red(), unit),
        }
    }

    pub fn resolved(&self, unit: &str, state: State) {
        eprintln!("{} {} -> {}", "RESOLVED".magenta(), unit, state);
    }

    pub fn summary(&self, pipeline: &str, summary: &Summary) {
        let mut parts = vec![
            format!("{} submitted", summary.submitted()).green().to_string(),
            format!("{} skipped", summary.skipped()).yellow().to_string(),
        ];
        if summary.would_submit() > 0 {
            parts.push(format!("{} would submit", summary.would_submit()).cyan().to_string());
        }
        if summary.failed() > 0 {
            parts.push(format!("{} failed", summary.failed()).red().to_string());
        }
        eprintln!("\n{}: {}.", pipeline.bold(), parts.join(", "));
    }
}
