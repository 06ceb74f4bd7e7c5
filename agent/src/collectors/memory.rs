use std::path::Path;

use crate::collectors::read_pseudo_file;
use crate::error::SampleError;

/// Available and total memory as reported by `/proc/meminfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub available_kb: u64,
    pub total_kb: u64,
}

/// Read `proc/meminfo` below `root`.
pub fn collect(root: &Path) -> Result<MemoryInfo, SampleError> {
    let contents = read_pseudo_file(&root.join("proc/meminfo"))?;
    parse(&contents)
}

/// Extract `MemAvailable` and `MemTotal`; both must be reported in kB.
pub fn parse(contents: &str) -> Result<MemoryInfo, SampleError> {
    let mut available = None;
    let mut total = None;

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(label), Some(value), Some("kB")) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let Ok(value) = value.parse::<u64>() else {
            continue;
        };
        match label {
            "MemTotal:" => total = Some(value),
            "MemAvailable:" => available = Some(value),
            _ => {}
        }
    }

    let available_kb =
        available.ok_or_else(|| SampleError::unavailable("Available memory not found"))?;
    let total_kb = total.ok_or_else(|| SampleError::unavailable("Total memory not found"))?;

    Ok(MemoryInfo {
        available_kb,
        total_kb,
    })
}
