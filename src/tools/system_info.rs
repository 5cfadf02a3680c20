//! System information tool
//!
//! Reads what it can from procfs; fields that are unavailable on the
//! current platform are left out rather than reported as errors.

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use std::path::Path;

pub struct SystemInfoTool;

fn read_trimmed(path: impl AsRef<Path>) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a `/proc/meminfo` line value (kB) into GiB
fn meminfo_gib(meminfo: &str, key: &str) -> Option<f64> {
    meminfo
        .lines()
        .find(|l| l.starts_with(key) && l[key.len()..].starts_with(':'))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<f64>().ok())
        .map(|kb| kb / (1024.0 * 1024.0))
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}

fn collect() -> String {
    let mut lines = vec!["System Status:".to_string()];

    let release = read_trimmed("/proc/sys/kernel/osrelease");
    lines.push(format!(
        "- OS: {} {}",
        std::env::consts::OS,
        release.unwrap_or_default()
    ).trim_end().to_string());
    lines.push(format!("- Architecture: {}", std::env::consts::ARCH));

    if let Some(host) = read_trimmed("/proc/sys/kernel/hostname").or_else(|| read_trimmed("/etc/hostname")) {
        lines.push(format!("- Hostname: {}", host));
    }

    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    match read_trimmed("/proc/loadavg").and_then(|l| l.split_whitespace().next().map(String::from)) {
        Some(load) => lines.push(format!("- CPU: {} cores, load average {}", cores, load)),
        None => lines.push(format!("- CPU: {} cores", cores)),
    }

    if let Some(meminfo) = read_trimmed("/proc/meminfo") {
        if let (Some(total), Some(available)) = (
            meminfo_gib(&meminfo, "MemTotal"),
            meminfo_gib(&meminfo, "MemAvailable"),
        ) {
            let used = total - available;
            let percent = if total > 0.0 { used / total * 100.0 } else { 0.0 };
            lines.push(format!(
                "- Memory: {:.1}% used ({:.2}GB / {:.2}GB)",
                percent, used, total
            ));
        }
    }

    if let Some(seconds) = read_trimmed("/proc/uptime")
        .and_then(|u| u.split_whitespace().next().and_then(|s| s.parse::<f64>().ok()))
    {
        lines.push(format!("- Uptime: {}", format_uptime(seconds as u64)));
    }

    lines.join("\n")
}

#[async_trait]
impl Tool for SystemInfoTool {
    fn name(&self) -> &str {
        "get_system_info"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::no_args(
            "get_system_info",
            "Get system information including OS, CPU, memory usage and uptime.",
        )
    }

    async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        match tokio::task::spawn_blocking(collect).await {
            Ok(info) => ToolResult::success(info),
            Err(e) => ToolResult::error(format!("Error getting system info: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::testing::test_context;

    #[test]
    fn test_meminfo_parsing() {
        let meminfo = "MemTotal:       16384000 kB\nMemFree:         1024000 kB\nMemAvailable:    8192000 kB\n";
        let total = meminfo_gib(meminfo, "MemTotal").unwrap();
        assert!((total - 15.625).abs() < 0.001);
        assert!(meminfo_gib(meminfo, "Mem").is_none());
        assert!(meminfo_gib(meminfo, "SwapTotal").is_none());
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(3_660), "1h 1m");
        assert_eq!(format_uptime(90_061), "1d 1h 1m");
    }

    #[tokio::test]
    async fn test_system_info() {
        let result = SystemInfoTool.execute(serde_json::json!({}), &test_context()).await;
        assert!(!result.is_error);
        assert!(result.output.starts_with("System Status:"));
        assert!(result.output.contains(std::env::consts::ARCH));
    }
}
