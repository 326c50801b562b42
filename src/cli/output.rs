//! Output formatting for clusterdeck
//!
//! Human mode prints colored messages and tables; JSON mode prints one JSON
//! document per message on stdout/stderr.

use colored::Colorize;
use serde_json::json;

use clusterdeck::executor::{StepStatus, TaskRecord};
use clusterdeck::factory::common::ServiceStatus;
use clusterdeck::playbook::PlaybookReport;

/// Output formatter for different output modes
pub struct OutputFormatter {
    use_color: bool,
    json_mode: bool,
    verbosity: u8,
}

impl OutputFormatter {
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        colored::control::set_override(use_color);
        Self {
            use_color,
            json_mode,
            verbosity,
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    pub fn error(&self, message: &str) {
        if self.json_mode {
            eprintln!("{}", json!({ "type": "error", "message": message }));
        } else if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        if self.json_mode {
            eprintln!("{}", json!({ "type": "warning", "message": message }));
        } else if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Info lines need at least one `-v` and are never mixed into JSON output.
    pub fn shows_info(&self) -> bool {
        self.verbosity >= 1 && !self.json_mode
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if !self.shows_info() {
            return;
        }
        if self.use_color {
            println!("{} {}", "INFO:".blue(), message);
        } else {
            println!("INFO: {}", message);
        }
    }

    /// Final per-step recap of a playbook run.
    pub fn recap(&self, report: &PlaybookReport) {
        let outcomes = report.outcomes.iter().chain(report.post_outcomes.iter());
        if self.json_mode {
            let steps: Vec<_> = outcomes
                .map(|o| {
                    json!({
                        "step": o.name,
                        "status": o.status.to_string(),
                        "summary": o.summary,
                        "records": o.records,
                    })
                })
                .collect();
            println!("{}", json!({ "type": "recap", "steps": steps }));
            return;
        }

        for outcome in outcomes {
            let status = match outcome.status {
                StepStatus::Success => outcome.status.to_string().green(),
                StepStatus::Skip => outcome.status.to_string().yellow(),
                StepStatus::Error => outcome.status.to_string().red().bold(),
            };
            println!("{:<24} {:<6} {}", outcome.name, status, outcome.summary);
            for record in outcome.records.iter().filter(|r| r.error.is_some()) {
                self.failed_task(record);
            }
        }
    }

    fn failed_task(&self, record: &TaskRecord) {
        let message = record.error.as_deref().unwrap_or_default();
        if self.use_color {
            println!("  {} {} {}", "x".red(), record.subname, message.bright_black());
        } else {
            println!("  x {} {}", record.subname, message);
        }
    }

    /// Service status table, one row per service.
    pub fn status_table(&self, rows: &[ServiceStatus]) {
        if self.json_mode {
            println!("{}", json!({ "type": "status", "services": rows }));
            return;
        }
        let verbose = rows.iter().any(|s| s.started_at.is_some());
        let mut headers = vec!["Id", "Role", "Host", "Replica", "Container Id", "Status"];
        if verbose {
            headers.push("Started At");
        }
        headers.extend(["Log Dir", "Data Dir"]);
        let cells: Vec<Vec<String>> = rows
            .iter()
            .map(|s| {
                let mut row = vec![
                    s.id.clone(),
                    s.role.clone(),
                    s.host.clone(),
                    s.replica.clone(),
                    s.container_id.clone(),
                    s.status.clone(),
                ];
                if verbose {
                    row.push(s.started_at.clone().unwrap_or_else(|| "-".to_string()));
                }
                row.push(s.log_dir.clone());
                row.push(s.data_dir.clone());
                row
            })
            .collect();
        self.table(&headers, &cells);
    }

    /// Print a table
    pub fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len());
                }
            }
        }

        let header_line = render_row(headers.iter().copied(), &widths);
        if self.use_color {
            println!("{}", header_line.bright_white().bold());
        } else {
            println!("{}", header_line);
        }
        let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        println!("{}", sep.join("-+-"));
        for row in rows {
            println!("{}", render_row(row.iter().map(String::as_str), &widths));
        }
    }
}

fn render_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, width)| format!("{:width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join(" | ")
}
