// ABOUTME: Terminal rendering of execution results and instance status
// ABOUTME: Colored summaries plus the connection hint shown when the service is unreachable

use chrono::{DateTime, Utc};
use colored::*;
use sandcastle_sandbox::{ErrorKind, ExecutionResult, InstanceStatusReport};
use std::time::Duration;

/// Lines printed after a session ends; streamed output has already been shown
pub fn result_lines(result: &ExecutionResult) -> Vec<String> {
    let mut lines = Vec::new();

    if result.success {
        if result.stdout.is_empty() {
            lines.push("(sandbox finished without output)".dimmed().to_string());
        }
        return lines;
    }

    lines.push(String::new());
    match &result.error {
        Some(error) => {
            lines.push(format!("{} {}", "Error:".red().bold(), error));
            if let Some(stderr) = result.stderr.as_deref().filter(|s| !s.trim().is_empty()) {
                lines.push(stderr.trim_end().to_string());
            }
            if error.kind == ErrorKind::Connection {
                lines.push(format!(
                    "{} Is the sandbox running? Check with `sandcastle status`.",
                    "Hint:".yellow().bold()
                ));
            }
        }
        None => lines.push(format!("{} unknown failure", "Error:".red().bold())),
    }

    lines
}

/// `1h 02m 03s` style uptime
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn status_lines(report: &InstanceStatusReport, now: DateTime<Utc>) -> Vec<String> {
    let status = match report.status.as_str() {
        "running" => report.status.green().bold(),
        "error" => report.status.red().bold(),
        _ => report.status.yellow().bold(),
    };

    let mut lines = vec![
        format!("{:<8} {}", "Status:", status),
        format!("{:<8} {}", "ID:", report.id),
    ];
    if let Some(uptime) = report.uptime(now) {
        lines.push(format!("{:<8} {}", "Uptime:", format_uptime(uptime)));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case(5, "5s")]
    #[case(65, "1m 05s")]
    #[case(3723, "1h 02m 03s")]
    fn test_format_uptime(#[case] secs: u64, #[case] expected: &str) {
        assert_eq!(format_uptime(Duration::from_secs(secs)), expected);
    }

    #[test]
    fn test_connection_failure_hint() {
        colored::control::set_override(false);
        let result = ExecutionResult::failure(ErrorKind::Connection, "gave up after 10 attempts");

        let lines = result_lines(&result);

        assert!(lines.iter().any(|l| l.contains("gave up after 10 attempts")));
        assert!(lines.iter().any(|l| l.contains("sandcastle status")));
    }

    #[test]
    fn test_provisioning_failure_shows_stderr() {
        colored::control::set_override(false);
        let mut result = ExecutionResult::failure(ErrorKind::Provisioning, "start failed");
        result.stderr = Some("port is already allocated\n".to_string());

        let lines = result_lines(&result);

        assert!(lines.contains(&"port is already allocated".to_string()));
        assert!(!lines.iter().any(|l| l.contains("Hint:")));
    }

    #[test]
    fn test_status_lines_with_uptime() {
        colored::control::set_override(false);
        let report = InstanceStatusReport {
            status: "running".to_string(),
            id: "0123456789ab".to_string(),
            started_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()),
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 5).unwrap();

        let lines = status_lines(&report, now);

        assert_eq!(lines.len(), 3);
        assert!(lines[2].ends_with("1m 05s"));
    }
}
