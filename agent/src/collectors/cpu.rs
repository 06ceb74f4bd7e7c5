use std::path::Path;

use crate::collectors::read_pseudo_file;
use crate::error::SampleError;

/// Cumulative seconds since boot from `/proc/uptime`.
///
/// `idle_secs` is summed over all CPUs, so it grows up to `cpu_count`
/// times faster than `uptime_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CpuTimes {
    pub uptime_secs: f64,
    pub idle_secs: f64,
}

impl CpuTimes {
    /// Difference since `previous`. These are floating seconds and do not wrap.
    pub fn since(self, previous: CpuTimes) -> CpuTimes {
        CpuTimes {
            uptime_secs: self.uptime_secs - previous.uptime_secs,
            idle_secs: self.idle_secs - previous.idle_secs,
        }
    }
}

/// Read `proc/uptime` below `root`.
pub fn collect_times(root: &Path) -> Result<CpuTimes, SampleError> {
    let contents = read_pseudo_file(&root.join("proc/uptime"))?;
    parse_uptime(&contents)
}

pub fn parse_uptime(contents: &str) -> Result<CpuTimes, SampleError> {
    let mut fields = contents.split_whitespace().map(str::parse::<f64>);
    match (fields.next(), fields.next()) {
        (Some(Ok(uptime_secs)), Some(Ok(idle_secs)))
            if uptime_secs.is_finite()
                && idle_secs.is_finite()
                && uptime_secs >= 0.0
                && idle_secs >= 0.0 =>
        {
            Ok(CpuTimes {
                uptime_secs,
                idle_secs,
            })
        }
        _ => Err(SampleError::unavailable("Uptime not found")),
    }
}

/// Count the CPU rows of `lscpu -p` output. Comment lines start with `#`.
pub fn count_cpus(parsable: &str) -> usize {
    parsable
        .lines()
        .filter(|line| line.starts_with(|c: char| c.is_ascii_digit()))
        .count()
}

/// Whether the `CPU op-mode(s):` line of the `lscpu` summary lists 64-bit.
///
/// Returns `None` when the line is absent.
pub fn supports_64_bit(summary: &str) -> Option<bool> {
    summary
        .lines()
        .find(|line| line.starts_with("CPU op-mode(s):"))
        .map(|line| line.contains("64-bit"))
}
