use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, warn};

use crate::collectors::counter::CounterWidth;
use crate::collectors::run_tool;
use crate::error::SampleError;

/// Filesystem types reported as logical disks.
const FILESYSTEM_TYPES: [&str; 4] = ["ext2", "ext3", "ext4", "xfs"];

/// A mounted filesystem as listed by `df`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filesystem {
    /// Block device name without the `/dev/` prefix, e.g. `sda1`.
    pub device_name: String,
    pub mount_point: String,
    pub size_bytes: u64,
    pub free_bytes: u64,
}

/// Disk activity for one block device since the previous sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskDelta {
    pub device: String,
    pub reads: u64,
    /// `None` when the device's logical sector size is unknown.
    pub bytes_read: Option<u64>,
    pub writes: u64,
    pub bytes_written: Option<u64>,
    pub delta_time_secs: f64,
}

/// List mounted filesystems using `bin/df` below `root`.
pub fn list_filesystems(root: &Path) -> Result<Vec<Filesystem>, SampleError> {
    let output = run_tool(&root.join("bin/df"), &["--block-size=1", "-T"], &[])?;
    Ok(parse_filesystems(&output))
}

/// Parse `df --block-size=1 -T` output, dropping rows that do not fit the schema.
pub fn parse_filesystems(output: &str) -> Vec<Filesystem> {
    output
        .lines()
        .filter_map(|line| match parse_df_line(line) {
            Ok(fs) => fs,
            Err(reason) => {
                debug!(category = "filesystems", line, "filesystems: {reason}");
                None
            }
        })
        .collect()
}

/// Parse one `df` row.
///
/// `Ok(None)` for rows of other filesystem types (including the header),
/// `Err` for rows of a reported type that are malformed.
fn parse_df_line(line: &str) -> Result<Option<Filesystem>, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.get(1) {
        Some(fs_type) if FILESYSTEM_TYPES.contains(fs_type) => {}
        _ => return Ok(None),
    }

    let [device, _, size, _, free, _, mount_point] = fields[..] else {
        return Err(format!("expected 7 columns, found {}", fields.len()));
    };

    let device_name = device
        .strip_prefix("/dev/")
        .ok_or_else(|| format!("device {device:?} is not under /dev/"))?;
    if !mount_point.starts_with('/') {
        return Err(format!("mount point {mount_point:?} is not absolute"));
    }
    let size_bytes = parse_decimal(size)?;
    if size_bytes == 0 {
        return Err(format!("size of {mount_point} is zero"));
    }
    let free_bytes = parse_decimal(free)?;

    Ok(Some(Filesystem {
        device_name: device_name.to_string(),
        mount_point: mount_point.to_string(),
        size_bytes,
        free_bytes,
    }))
}

fn parse_decimal(s: &str) -> Result<u64, String> {
    s.parse::<u64>()
        .map_err(|e| format!("{s:?} is not a decimal integer: {e}"))
}

/// Parse `lsblk -sd -oNAME,LOG-SEC` output into device name → logical sector size.
pub fn parse_sector_sizes(output: &str) -> HashMap<String, u64> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let size = fields.next()?.parse::<u64>().ok()?;
            Some((name.to_string(), size))
        })
        .collect()
}

/// Raw cumulative counters from `/sys/class/block/<dev>/stat`.
#[derive(Debug, Clone, Copy)]
struct RawDiskData {
    time: Instant,
    reads: u64,
    read_sectors: u64,
    writes: u64,
    write_sectors: u64,
}

impl RawDiskData {
    fn since(
        &self,
        previous: &RawDiskData,
        device: &str,
        sector_size: Option<u64>,
        width: CounterWidth,
    ) -> DiskDelta {
        let bytes = |current, previous| {
            sector_size.map(|size| width.delta(current, previous).wrapping_mul(size))
        };
        DiskDelta {
            device: device.to_string(),
            reads: width.delta(self.reads, previous.reads),
            bytes_read: bytes(self.read_sectors, previous.read_sectors),
            writes: width.delta(self.writes, previous.writes),
            bytes_written: bytes(self.write_sectors, previous.write_sectors),
            delta_time_secs: self.time.duration_since(previous.time).as_secs_f64(),
        }
    }
}

fn parse_block_stat(path: &Path, contents: &str) -> Result<RawDiskData, SampleError> {
    let fields: Vec<&str> = contents.split_whitespace().collect();
    if fields.is_empty() {
        return Err(SampleError::unavailable(format!(
            "{}: is empty",
            path.display()
        )));
    }
    let field = |i: usize| -> Result<u64, SampleError> {
        fields
            .get(i)
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                SampleError::unavailable(format!("{}: field {i} missing", path.display()))
            })
    };
    Ok(RawDiskData {
        time: Instant::now(),
        reads: field(0)?,
        read_sectors: field(2)?,
        writes: field(4)?,
        write_sectors: field(6)?,
    })
}

/// Per-device disk counter baselines and cached sector sizes.
#[derive(Debug)]
pub struct DiskInventory {
    root: PathBuf,
    sector_sizes: HashMap<String, Option<u64>>,
    saved: HashMap<String, RawDiskData>,
}

impl DiskInventory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sector_sizes: HashMap::new(),
            saved: HashMap::new(),
        }
    }

    /// Refresh sector sizes and record counters for every device `lsblk` knows.
    pub fn baseline(&mut self) {
        self.sector_sizes = self
            .query_sector_sizes()
            .into_iter()
            .map(|(dev, size)| (dev, Some(size)))
            .collect();
        self.saved.clear();

        let devices: Vec<String> = self.sector_sizes.keys().cloned().collect();
        for dev in devices {
            match self.read_disk_data(&dev) {
                Ok(data) => {
                    self.saved.insert(dev, data);
                }
                Err(e) => debug!(device = %dev, error = %e, "no baseline for disk"),
            }
        }
    }

    /// Activity on `dev` since the previous call.
    ///
    /// The first call for a device records its counters and fails with
    /// `Unavailable`; the next call succeeds.
    pub fn stats(&mut self, dev: &str, width: CounterWidth) -> Result<DiskDelta, SampleError> {
        let sector_size = self.sector_size(dev);
        let current = self.read_disk_data(dev)?;
        let previous = self.saved.insert(dev.to_string(), current);
        let previous = previous.ok_or_else(|| {
            SampleError::unavailable(format!("no previous data for {dev}"))
        })?;
        Ok(current.since(&previous, dev, sector_size, width))
    }

    fn sector_size(&mut self, dev: &str) -> Option<u64> {
        if let Some(size) = self.sector_sizes.get(dev) {
            return *size;
        }
        let size = self.query_sector_sizes().get(dev).copied();
        if size.is_none() {
            warn!(
                device = dev,
                "logical sector size unavailable; byte counters will not be reported"
            );
        }
        self.sector_sizes.insert(dev.to_string(), size);
        size
    }

    fn query_sector_sizes(&self) -> HashMap<String, u64> {
        match run_tool(&self.root.join("bin/lsblk"), &["-sd", "-oNAME,LOG-SEC"], &[]) {
            Ok(output) => parse_sector_sizes(&output),
            Err(e) => {
                debug!(tool = "lsblk", error = %e, "sector sizes unavailable");
                HashMap::new()
            }
        }
    }

    fn read_disk_data(&self, dev: &str) -> Result<RawDiskData, SampleError> {
        let path = self.root.join("sys/class/block").join(dev).join("stat");
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| SampleError::unavailable(format!("{}: {e}", path.display())))?;
        parse_block_stat(&path, &contents)
    }
}
