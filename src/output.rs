use crate::health::Health;
use crate::lifecycle::{RestartOutcome, StartOutcome, StatusReport, StopOutcome};
use crate::scanner::ServerInstance;
use crate::serve::ServeSpec;
use comfy_table::{Attribute, Cell, Table, presets::UTF8_FULL_CONDENSED};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::fmt::Display;
use std::io::IsTerminal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Info,
    Good,
    Warn,
    Bad,
}

/// Renders controller outcomes for the terminal, or as JSON lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Printer {
    color: bool,
    json: bool,
}

impl Printer {
    pub fn new(color: bool, json: bool) -> Self {
        Self { color, json }
    }

    /// Colour only when asked for, stdout is a terminal and `NO_COLOR` is
    /// unset.
    pub fn detect(no_color: bool, json: bool) -> Self {
        let color = !no_color
            && !json
            && std::env::var_os("NO_COLOR").is_none()
            && std::io::stdout().is_terminal();
        Self::new(color, json)
    }

    pub fn start(&self, outcome: &StartOutcome) {
        self.emit(outcome, || self.start_lines(outcome));
    }

    pub fn stop(&self, outcome: &StopOutcome) {
        self.emit(outcome, || self.stop_lines(outcome));
    }

    pub fn status(&self, report: &StatusReport) {
        self.emit(report, || self.status_lines(report));
    }

    pub fn restart(&self, outcome: &RestartOutcome) {
        self.emit(outcome, || {
            let mut lines = self.stop_lines(&outcome.stop);
            lines.extend(self.start_lines(&outcome.start));
            lines
        });
    }

    /// Report a failure on stderr, with an optional suggestion.
    pub fn error(&self, error: &dyn Display, hint: Option<String>) {
        if self.json {
            eprintln!(
                "{}",
                serde_json::json!({ "error": error.to_string(), "hint": hint })
            );
            return;
        }
        if self.color {
            eprintln!("{} {error}", "error:".red().bold());
        } else {
            eprintln!("error: {error}");
        }
        if let Some(hint) = hint {
            eprintln!("{}", self.paint(&hint, Tone::Warn));
        }
    }

    fn emit<T: Serialize>(&self, value: &T, lines: impl FnOnce() -> Vec<String>) {
        if self.json {
            match serde_json::to_string(value) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("failed to serialize output: {e}"),
            }
            return;
        }
        for line in lines() {
            println!("{line}");
        }
    }

    // -----------------------------------------------------------------------
    // Line rendering
    // -----------------------------------------------------------------------

    pub fn start_lines(&self, outcome: &StartOutcome) -> Vec<String> {
        match outcome {
            StartOutcome::AlreadyRunning { pid, ports } => vec![self.paint(
                &format!(
                    "Server already running (PID {pid}) on port {}.",
                    join_ports(ports)
                ),
                Tone::Warn,
            )],
            StartOutcome::Started { pid, spec, exposed } => {
                let mut lines = self.launch_lines(spec, *exposed);
                lines.push(self.paint(&format!("Started (PID {pid})"), Tone::Good));
                lines
            }
            StartOutcome::NotConfirmed {
                child_pid,
                spec,
                exposed,
            } => {
                let mut lines = self.launch_lines(spec, *exposed);
                lines.push(self.paint(
                    &format!("Started (child PID {child_pid}) but listener not confirmed"),
                    Tone::Warn,
                ));
                lines.push(self.paint(
                    &format!("Check {} for errors.", spec.log_file.display()),
                    Tone::Info,
                ));
                lines
            }
        }
    }

    fn launch_lines(&self, spec: &ServeSpec, exposed: bool) -> Vec<String> {
        let mut lines = Vec::new();
        if exposed {
            lines.push(self.paint(
                &format!(
                    "WARNING: Serving on {} (all interfaces). Ensure this is intended; \
                     consider firewalling or using --bind with a specific IP.",
                    display_bind(&spec.bind)
                ),
                Tone::Warn,
            ));
        }
        lines.push(self.paint(
            &format!(
                "Starting HTTP server on {}:{} serving {}",
                display_bind(&spec.bind),
                spec.port,
                spec.dir.display()
            ),
            Tone::Info,
        ));
        lines
    }

    pub fn stop_lines(&self, outcome: &StopOutcome) -> Vec<String> {
        match outcome {
            StopOutcome::NotRunning { port: None } => {
                vec![self.paint("No running server detected", Tone::Warn)]
            }
            StopOutcome::NotRunning { port: Some(port) } => {
                vec![self.paint(&format!("No server on port {port}"), Tone::Warn)]
            }
            StopOutcome::Ambiguous { port, instances } => {
                let mut lines = vec![
                    self.paint("Multiple servers detected (ambiguous stop):", Tone::Warn),
                    self.instance_table(instances),
                ];
                if port.is_none() {
                    lines.push(
                        self.paint("Hint: specify --port to target a specific one.", Tone::Info),
                    );
                }
                lines
            }
            StopOutcome::Stopped { pid, ports, forced } => {
                let mut lines = vec![self.paint(
                    &format!("Stopping server PID {pid} (ports={})", join_ports(ports)),
                    Tone::Info,
                )];
                if *forced {
                    lines.push(self.paint("Force killing...", Tone::Warn));
                }
                lines.push(self.paint("Stopped", Tone::Good));
                lines
            }
        }
    }

    pub fn status_lines(&self, report: &StatusReport) -> Vec<String> {
        match report {
            StatusReport::NotRunning { port: None } => vec![self.paint("Not running", Tone::Bad)],
            StatusReport::NotRunning { port: Some(port) } => {
                vec![self.paint(&format!("Not running on port {port}"), Tone::Bad)]
            }
            StatusReport::Ambiguous { port, instances } => {
                let mut lines = vec![
                    self.paint("Multiple servers detected:", Tone::Warn),
                    self.instance_table(instances),
                ];
                if port.is_none() {
                    lines.push(self.paint("Specify --port for detailed health check.", Tone::Info));
                }
                lines
            }
            StatusReport::Running { instance, health } => {
                let mut lines = vec![self.paint(
                    &format!(
                        "Running (PID {}) (ports={})",
                        instance.pid,
                        join_ports(&instance.ports)
                    ),
                    Tone::Good,
                )];
                match health {
                    Some(Health::Ok { status }) => {
                        lines.push(self.paint(&format!("Health OK HTTP {status}"), Tone::Good));
                    }
                    Some(Health::Failed { detail, .. }) => {
                        lines.push(self.paint(&format!("Health check failed: {detail}"), Tone::Bad));
                        lines.push(self.paint(
                            "Possible causes: server still starting, port/firewall blocked, \
                             wrong bind/port used.",
                            Tone::Warn,
                        ));
                    }
                    None => lines.push(
                        self.paint("Specify --port for detailed health check.", Tone::Info),
                    ),
                }
                lines
            }
        }
    }

    fn instance_table(&self, instances: &[ServerInstance]) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        if self.color {
            table.enforce_styling();
        } else {
            table.force_no_tty();
        }
        table.set_header(vec![
            Cell::new("pid").add_attribute(Attribute::Bold),
            Cell::new("ports").add_attribute(Attribute::Bold),
        ]);
        for instance in instances {
            table.add_row(vec![
                Cell::new(instance.pid),
                Cell::new(join_ports(&instance.ports)),
            ]);
        }
        table.to_string()
    }

    fn paint(&self, text: &str, tone: Tone) -> String {
        if !self.color {
            return text.to_string();
        }
        match tone {
            Tone::Info => text.cyan().to_string(),
            Tone::Good => text.green().to_string(),
            Tone::Warn => text.yellow().to_string(),
            Tone::Bad => text.red().to_string(),
        }
    }
}

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn display_bind(bind: &str) -> &str {
    if bind.is_empty() { "0.0.0.0" } else { bind }
}
