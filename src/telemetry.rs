//! Model inventory and resource usage, read from the `ollama` CLI.
//!
//! Output of `ollama list` / `ollama ps` is unversioned free text, so parsing
//! here never fails: missing fields fall back to zero and are flagged on the
//! row instead.

use crate::config::AppConfig;
use crate::models::{Parsed, TelemetryRow};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

static PCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)%/(\d+)%").expect("valid regex"));
static GB_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*GB").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct Telemetry {
    binary: String,
    command_timeout: Duration,
}

impl Telemetry {
    pub fn new(binary: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            command_timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.ollama_bin.clone(), config.command_timeout)
    }

    /// Installed model names, in the order the CLI prints them.
    pub async fn list_models(&self) -> Vec<String> {
        match self.run(&["list"]).await {
            Some(output) => parse_model_list(&output),
            None => Vec::new(),
        }
    }

    /// One row per model currently loaded.
    pub async fn running_models(&self) -> Vec<TelemetryRow> {
        match self.run(&["ps"]).await {
            Some(output) => parse_running_models(&output),
            None => Vec::new(),
        }
    }

    async fn run(&self, args: &[&str]) -> Option<String> {
        let mut command = Command::new(&self.binary);
        command.args(args).kill_on_drop(true);

        let output = match timeout(self.command_timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                tracing::warn!(binary = %self.binary, ?args, error = %error, "telemetry command failed to start");
                return None;
            }
            Err(_) => {
                tracing::warn!(binary = %self.binary, ?args, "telemetry command timed out");
                return None;
            }
        };

        if !output.status.success() {
            tracing::warn!(
                binary = %self.binary,
                ?args,
                code = ?output.status.code(),
                "telemetry command exited unsuccessfully"
            );
            return None;
        }

        match String::from_utf8(output.stdout) {
            Ok(stdout) => Some(stdout.trim().to_string()),
            Err(_) => {
                tracing::warn!(binary = %self.binary, ?args, "telemetry command printed non-UTF-8 output");
                None
            }
        }
    }
}

pub fn parse_model_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(ToString::to_string)
        .collect()
}

pub fn parse_running_models(output: &str) -> Vec<TelemetryRow> {
    output.lines().skip(1).filter_map(parse_running_line).collect()
}

fn parse_running_line(line: &str) -> Option<TelemetryRow> {
    let mut tokens = line.split_whitespace();
    let (name, id) = match (tokens.next(), tokens.next()) {
        (Some(name), Some(id)) => (name, id),
        _ => return None,
    };

    let size = extract_size_gb(line);
    let usage = extract_utilization(line);

    Some(TelemetryRow {
        name: name.to_string(),
        id: id.to_string(),
        size_gb: size.value,
        cpu_pct: usage.value.0,
        gpu_pct: usage.value.1,
        raw: line.to_string(),
        memory_reported: size.valid,
        utilization_reported: usage.valid,
    })
}

/// First `<number>GB` figure on the line.
pub fn extract_size_gb(line: &str) -> Parsed<f64> {
    GB_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|value| value.as_str().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(Parsed::ok)
        .unwrap_or_else(Parsed::invalid)
}

/// First `<cpu>%/<gpu>%` pair on the line, each clamped to 100.
pub fn extract_utilization(line: &str) -> Parsed<(u8, u8)> {
    let Some(caps) = PCT_RE.captures(line) else {
        return Parsed::invalid();
    };
    // The regex only captures digit runs, so a failed parse means overflow.
    let percent = |index: usize| {
        caps.get(index)
            .map(|value| value.as_str().parse::<u64>().map_or(100, |value| value.min(100) as u8))
    };
    match (percent(1), percent(2)) {
        (Some(cpu), Some(gpu)) => Parsed::ok((cpu, gpu)),
        _ => Parsed::invalid(),
    }
}
