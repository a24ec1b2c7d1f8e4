//! Pure parsers for diagnostic command output
//!
//! Every parser here is total: malformed input falls back to zero values (or
//! is skipped, for line-oriented listings) instead of failing, so that one
//! garbled command never loses the rest of a snapshot.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::{LogLevel, LogRecord, ProcessRecord, ProcessStatus};

/// Number of processes kept from a listing (highest CPU first)
pub const TOP_PROCESSES: usize = 10;

static IDLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]+(?:[.,][0-9]+)?)\s*%?\s*id").expect("idle pattern is valid")
});

/// A single field could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParseError(pub String);

impl fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse command output: {}", self.0)
    }
}

impl std::error::Error for CommandParseError {}

/// Parse a float, tolerating surrounding whitespace, a trailing `%` and a
/// decimal comma. Non-numeric or non-finite input yields `default`.
pub fn parse_float_or(raw: &str, default: f64) -> f64 {
    let cleaned = raw.trim().trim_end_matches('%').replace(',', ".");
    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => default,
    }
}

pub fn parse_int_or(raw: &str, default: i64) -> i64 {
    raw.trim().parse::<i64>().unwrap_or(default)
}

/// Parse a byte or count value; negative numbers clamp to zero
pub fn parse_u64_or(raw: &str, default: u64) -> u64 {
    match raw.trim().parse::<i128>() {
        Ok(value) => value.clamp(0, u64::MAX as i128) as u64,
        Err(_) => default,
    }
}

/// Split `line` into exactly `n` whitespace-separated fields, the last one
/// keeping the remainder of the line (inner whitespace preserved).
///
/// Returns `None` when the line has fewer than `n` fields.
pub fn split_fields(line: &str, n: usize) -> Option<Vec<&str>> {
    if n == 0 {
        return Some(Vec::new());
    }

    let mut fields = Vec::with_capacity(n);
    let mut rest = line.trim_start();

    while fields.len() + 1 < n {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }

    let last = rest.trim_end();
    if last.is_empty() {
        return None;
    }
    fields.push(last);

    Some(fields)
}

pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

fn percent_of(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_percent(part as f64 / total as f64 * 100.0)
}

/// CPU usage from a `top -bn1` summary line (`100 - idle`)
pub fn parse_cpu_usage(output: &str) -> f64 {
    let Some(captures) = IDLE_PATTERN.captures(output) else {
        return 0.0;
    };
    let idle = parse_float_or(&captures[1], 100.0);
    clamp_percent(100.0 - idle)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub used_percent: f64,
}

/// `<total> <used>` in bytes, as printed from `free -b`
pub fn parse_memory(output: &str) -> Usage {
    let mut fields = output.split_whitespace();
    let total_bytes = fields.next().map_or(0, |raw| parse_u64_or(raw, 0));
    let used_bytes = fields.next().map_or(0, |raw| parse_u64_or(raw, 0));

    Usage {
        total_bytes,
        used_bytes,
        used_percent: percent_of(used_bytes, total_bytes),
    }
}

/// `<total> <used> <use%>` in bytes, as printed from `df -B1`
///
/// The reported percentage wins; it is derived from the byte counts only when
/// missing or unparseable.
pub fn parse_disk(output: &str) -> Usage {
    let fields: Vec<&str> = output.split_whitespace().collect();
    let total_bytes = fields.first().map_or(0, |raw| parse_u64_or(raw, 0));
    let used_bytes = fields.get(1).map_or(0, |raw| parse_u64_or(raw, 0));
    let used_percent = match fields.get(2) {
        Some(raw) => clamp_percent(parse_float_or(raw, percent_of(used_bytes, total_bytes))),
        None => percent_of(used_bytes, total_bytes),
    };

    Usage {
        total_bytes,
        used_bytes,
        used_percent,
    }
}

/// `<received> <transmitted>` byte totals
pub fn parse_network(output: &str) -> (u64, u64) {
    let mut fields = output.split_whitespace();
    let rx = fields.next().map_or(0, |raw| parse_u64_or(raw, 0));
    let tx = fields.next().map_or(0, |raw| parse_u64_or(raw, 0));
    (rx, tx)
}

/// First whitespace-separated token as a non-negative count
pub fn parse_count(output: &str) -> u64 {
    output
        .split_whitespace()
        .next()
        .map_or(0, |raw| parse_u64_or(raw, 0))
}

/// Seconds of uptime from `/proc/uptime` (fractional part dropped)
pub fn parse_uptime(output: &str) -> u64 {
    output
        .split_whitespace()
        .next()
        .map_or(0, |raw| parse_float_or(raw, 0.0).max(0.0) as u64)
}

/// `PRETTY_NAME` from `/etc/os-release`
pub fn parse_os_release(output: &str) -> String {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("PRETTY_NAME="))
        .map(|value| value.trim_matches('"').to_string())
        .unwrap_or_default()
}

/// `model name` from `/proc/cpuinfo`
pub fn parse_cpu_model(output: &str) -> String {
    output
        .lines()
        .find(|line| line.starts_with("model name"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, model)| model.trim().to_string())
        .unwrap_or_default()
}

/// One line of `ps aux` output
///
/// Columns: USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND
pub fn parse_process_line(line: &str) -> Option<ProcessRecord> {
    let fields = split_fields(line, 11)?;
    let pid = fields[1].parse::<u32>().ok()?;
    let command = fields[10].to_string();
    let executable = command.split_whitespace().next().unwrap_or_default();
    let name = if executable.starts_with('[') {
        executable.to_string()
    } else {
        executable
            .rsplit('/')
            .next()
            .unwrap_or(executable)
            .to_string()
    };

    Some(ProcessRecord {
        pid,
        owner: fields[0].to_string(),
        cpu_usage_percent: parse_float_or(fields[2], 0.0).max(0.0),
        ram_used_bytes: parse_u64_or(fields[5], 0).saturating_mul(1024),
        name,
        status: ProcessStatus::from_stat(fields[7]),
        command,
    })
}

/// A `ps aux --sort=-%cpu` listing, header and malformed lines skipped
pub fn parse_process_listing(output: &str) -> Vec<ProcessRecord> {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with("USER"))
        .filter_map(parse_process_line)
        .take(TOP_PROCESSES)
        .collect()
}

fn journal_string(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        // journald emits non-UTF-8 fields as byte arrays
        Value::Array(bytes) => {
            let bytes: Vec<u8> = bytes
                .iter()
                .filter_map(|b| b.as_u64().map(|b| b as u8))
                .collect();
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => None,
    }
}

/// One line of `journalctl -o json`
pub fn parse_journal_line(line: &str) -> Result<LogRecord, CommandParseError> {
    let entry: Value =
        serde_json::from_str(line).map_err(|e| CommandParseError(e.to_string()))?;
    if !entry.is_object() {
        return Err(CommandParseError("journal entry is not an object".to_string()));
    }

    let priority = journal_string(&entry, "PRIORITY")
        .map_or(6, |raw| parse_int_or(&raw, 6));
    let source = journal_string(&entry, "SYSLOG_IDENTIFIER")
        .or_else(|| journal_string(&entry, "_COMM"))
        .or_else(|| journal_string(&entry, "_SYSTEMD_UNIT"))
        .unwrap_or_else(|| "journal".to_string());
    let message = journal_string(&entry, "MESSAGE").unwrap_or_default();
    let timestamp = journal_string(&entry, "__REALTIME_TIMESTAMP")
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .unwrap_or_else(Utc::now);

    Ok(LogRecord {
        level: LogLevel::from_priority(priority),
        source,
        message,
        timestamp,
        raw_details: entry,
    })
}

/// Every structured entry of a journal dump; unparseable lines are dropped
pub fn parse_journal(output: &str) -> Vec<LogRecord> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| parse_journal_line(line).ok())
        .collect()
}
