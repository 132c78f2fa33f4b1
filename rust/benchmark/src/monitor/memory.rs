use std::io::{self, Write};

use serde::Serialize;

// Status fields echoed verbatim into the report.
const REPORTED_FIELDS: [&str; 3] = ["Name:", "VmPeak:", "VmHWM:"];

/// Memory usage of the process as exposed by `/proc/<pid>/status`.
///
/// Sizes are in kB. Capture once, at the end of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryFootprint {
    pub pid: u32,
    pub name: Option<String>,
    pub vm_peak_kb: Option<u64>,
    pub vm_size_kb: Option<u64>,
    pub vm_hwm_kb: Option<u64>,
    pub vm_rss_kb: Option<u64>,
    #[serde(skip)]
    report_lines: Option<Vec<String>>,
}

fn parse_kb(value: &str) -> Option<u64> {
    value.split_whitespace().next()?.parse().ok()
}

impl MemoryFootprint {
    pub fn capture() -> Self {
        let pid = std::process::id();
        match std::fs::read_to_string(format!("/proc/{pid}/status")) {
            Ok(status) => Self::from_status(pid, &status),
            Err(e) => {
                tracing::warn!(pid, "Memory information unavailable: {e}");
                Self::unavailable(pid)
            }
        }
    }

    /// A footprint for `pid` whose status could not be read.
    pub fn unavailable(pid: u32) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }

    pub fn from_status(pid: u32, status: &str) -> Self {
        let mut footprint = Self {
            pid,
            report_lines: Some(Vec::new()),
            ..Default::default()
        };
        for line in status.lines() {
            if let Some((key, value)) = line.split_once(':') {
                match key {
                    "Name" => footprint.name = Some(value.trim().to_string()),
                    "VmPeak" => footprint.vm_peak_kb = parse_kb(value),
                    "VmSize" => footprint.vm_size_kb = parse_kb(value),
                    "VmHWM" => footprint.vm_hwm_kb = parse_kb(value),
                    "VmRSS" => footprint.vm_rss_kb = parse_kb(value),
                    _ => {}
                }
            }
            if REPORTED_FIELDS.iter().any(|field| line.starts_with(field)) {
                if let Some(lines) = footprint.report_lines.as_mut() {
                    lines.push(line.to_string());
                }
            }
        }
        footprint
    }

    pub fn is_available(&self) -> bool {
        self.report_lines.is_some()
    }

    /// Writes `PID: <pid>` followed by the process name, peak virtual size and
    /// peak resident size lines.
    pub fn write_report<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "PID: {}", self.pid)?;
        match &self.report_lines {
            Some(lines) => {
                for line in lines {
                    writeln!(writer, "{line}")?;
                }
            }
            None => writeln!(writer, "memory information open error!")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\trangebench-sear\nUmask:\t0022\nState:\tR (running)\nVmPeak:\t  204800 kB\nVmSize:\t  198000 kB\nVmHWM:\t   51200 kB\nVmRSS:\t   50000 kB\nThreads:\t3\n";

    #[test]
    fn test_from_status() {
        let footprint = MemoryFootprint::from_status(42, STATUS);
        assert_eq!(footprint.name.as_deref(), Some("rangebench-sear"));
        assert_eq!(footprint.vm_peak_kb, Some(204800));
        assert_eq!(footprint.vm_size_kb, Some(198000));
        assert_eq!(footprint.vm_hwm_kb, Some(51200));
        assert_eq!(footprint.vm_rss_kb, Some(50000));
        assert!(footprint.is_available());
    }

    #[test]
    fn test_report_lines() {
        let mut out = Vec::new();
        MemoryFootprint::from_status(42, STATUS)
            .write_report(&mut out)
            .expect("writing to memory should succeed");
        let out = String::from_utf8(out).expect("report should be utf8");
        assert_eq!(
            out,
            "PID: 42\nName:\trangebench-sear\nVmPeak:\t  204800 kB\nVmHWM:\t   51200 kB\n"
        );
    }

    #[test]
    fn test_unavailable_report() {
        let footprint = MemoryFootprint::unavailable(7);
        assert!(!footprint.is_available());
        let mut out = Vec::new();
        footprint
            .write_report(&mut out)
            .expect("writing to memory should succeed");
        assert_eq!(
            String::from_utf8(out).expect("report should be utf8"),
            "PID: 7\nmemory information open error!\n"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_capture_on_linux() {
        let footprint = MemoryFootprint::capture();
        assert_eq!(footprint.pid, std::process::id());
        assert!(footprint.is_available());
        assert!(footprint.vm_hwm_kb.is_some());
    }
}
