//! Counter sampling for the Linux pseudo-files and helper tools.
//!
//! [`CounterSource`] is the contract the polling engine drives; it is
//! implemented by [`DataCollector`] for a live system and by test doubles.

pub mod counter;
pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::SampleError;

pub use counter::CounterWidth;
pub use cpu::CpuTimes;
pub use disk::{DiskDelta, Filesystem};
pub use memory::MemoryInfo;
pub use network::NetDelta;

/// Source of OS counters, sampled once per polling tick.
///
/// `baseline()` must be called before `cpu_idle_delta`, `cpu_count`,
/// `disk_stats` and `net_stats`; those return
/// [`SampleError::BaselineMissing`] otherwise. Every delta-returning method
/// also moves that category's baseline forward.
pub trait CounterSource: Send {
    /// Capture the initial counters and return the CPU times read.
    fn baseline(&mut self) -> Result<CpuTimes, SampleError>;

    /// Called by the engine before a tick collects anything.
    fn start_sample(&mut self) {}

    /// Called by the engine after a tick has collected everything.
    fn end_sample(&mut self) {}

    fn available_memory_kb(&mut self) -> Result<MemoryInfo, SampleError>;

    /// Uptime and idle seconds elapsed since the previous call or baseline.
    fn cpu_idle_delta(&mut self) -> Result<CpuTimes, SampleError>;

    /// Number of CPUs available for scheduling.
    fn cpu_count(&mut self) -> Result<usize, SampleError>;

    fn filesystems(&mut self) -> Result<Vec<Filesystem>, SampleError>;

    /// Activity on block device `device` (e.g. `sda1`) since the previous call.
    fn disk_stats(&mut self, device: &str) -> Result<DiskDelta, SampleError>;

    /// Traffic per network interface since the previous call.
    fn net_stats(&mut self) -> Result<Vec<NetDelta>, SampleError>;
}

/// [`CounterSource`] reading `/proc`, `/sys` and the util-linux tools.
///
/// Every path is resolved below `root`, which is `/` on a live system.
#[derive(Debug)]
pub struct DataCollector {
    root: PathBuf,
    baselined: bool,
    width: CounterWidth,
    cpu_count: Result<usize, String>,
    cpu_times: Option<CpuTimes>,
    net: network::NetInventory,
    disks: disk::DiskInventory,
}

impl Default for DataCollector {
    fn default() -> Self {
        Self::new("/")
    }
}

impl DataCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            net: network::NetInventory::new(&root),
            disks: disk::DiskInventory::new(&root),
            root,
            baselined: false,
            width: CounterWidth::default(),
            cpu_count: Err("baseline has not been called".to_string()),
            cpu_times: None,
        }
    }

    /// Counter width detected at baseline.
    pub fn counter_width(&self) -> CounterWidth {
        self.width
    }

    fn require_baseline(&self) -> Result<(), SampleError> {
        if self.baselined {
            Ok(())
        } else {
            Err(SampleError::BaselineMissing)
        }
    }

    /// CPU count from `lscpu -p` and counter width from the `lscpu` summary.
    fn cpu_info(&self) -> (Result<usize, String>, CounterWidth) {
        let lscpu = self.root.join("usr/bin/lscpu");

        let count = match run_tool(&lscpu, &["-p"], &[]) {
            Ok(output) => match cpu::count_cpus(&output) {
                0 => Err("No CPUs found".to_string()),
                n => Ok(n),
            },
            Err(e) => Err(e.to_string()),
        };

        let is_64_bit = run_tool(&lscpu, &[], &[("LC_ALL", "C")])
            .ok()
            .and_then(|summary| cpu::supports_64_bit(&summary))
            .unwrap_or(true);

        (count, CounterWidth::from_64_bit(is_64_bit))
    }
}

impl CounterSource for DataCollector {
    fn baseline(&mut self) -> Result<CpuTimes, SampleError> {
        self.baselined = true;

        let (count, width) = self.cpu_info();
        self.cpu_count = count;
        self.width = width;
        debug!(width = ?width, cpu_count = ?self.cpu_count, "counter baseline");

        if let Err(e) = self.net.baseline() {
            debug!(category = "network", error = %e, "no network baseline");
        }
        self.disks.baseline();

        let times = cpu::collect_times(&self.root)?;
        self.cpu_times = Some(times);
        Ok(times)
    }

    fn available_memory_kb(&mut self) -> Result<MemoryInfo, SampleError> {
        memory::collect(&self.root)
    }

    fn cpu_idle_delta(&mut self) -> Result<CpuTimes, SampleError> {
        self.require_baseline()?;
        let current = cpu::collect_times(&self.root)?;
        match self.cpu_times.replace(current) {
            Some(previous) => Ok(current.since(previous)),
            None => Err(SampleError::unavailable("no previous data for cpu")),
        }
    }

    fn cpu_count(&mut self) -> Result<usize, SampleError> {
        self.require_baseline()?;
        self.cpu_count.clone().map_err(SampleError::Unavailable)
    }

    fn filesystems(&mut self) -> Result<Vec<Filesystem>, SampleError> {
        disk::list_filesystems(&self.root)
    }

    fn disk_stats(&mut self, device: &str) -> Result<DiskDelta, SampleError> {
        self.require_baseline()?;
        self.disks.stats(device, self.width)
    }

    fn net_stats(&mut self) -> Result<Vec<NetDelta>, SampleError> {
        self.require_baseline()?;
        self.net.stats(self.width)
    }
}

/// Read a whole pseudo-file, keeping the path in the error.
pub(crate) fn read_pseudo_file(path: &Path) -> Result<String, SampleError> {
    std::fs::read_to_string(path).map_err(|source| SampleError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Run a helper tool and return its standard output.
///
/// A tool that cannot be executed is `Unavailable`, with the tool path and
/// the OS error in the message.
pub(crate) fn run_tool(
    path: &Path,
    args: &[&str],
    envs: &[(&str, &str)],
) -> Result<String, SampleError> {
    let output = Command::new(path)
        .args(args)
        .envs(envs.iter().copied())
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| SampleError::unavailable(format!("{}: {e}", path.display())))?;

    if !output.status.success() {
        debug!(tool = %path.display(), status = %output.status, "tool exited unsuccessfully");
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fmt;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::subscriber::DefaultGuard;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
    use tracing_subscriber::registry;

    /// Write `contents` to `rel` below `root`, creating parent directories.
    pub fn write_file(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// Install an executable `/bin/sh` script at `rel` below `root`.
    pub fn write_tool(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        {
            let mut file = std::fs::File::create(&path).unwrap();
            write!(file, "#!/bin/sh\n{body}").unwrap();
            file.sync_all().unwrap();
        }
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Devices named by the WARN events seen while a [`WarnCapture`] is installed.
    #[derive(Clone, Default)]
    pub struct WarnCapture(Arc<Mutex<Vec<String>>>);

    impl WarnCapture {
        pub fn install() -> (Self, DefaultGuard) {
            let capture = Self::default();
            let guard = tracing::subscriber::set_default(registry().with(capture.clone()));
            (capture, guard)
        }

        pub fn devices(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct DeviceField(String);

    impl Visit for DeviceField {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "device" {
                self.0 = value.to_string();
            }
        }

        fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {}
    }

    impl<S: Subscriber> Layer<S> for WarnCapture {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                let mut device = DeviceField(String::new());
                event.record(&mut device);
                self.0.lock().unwrap().push(device.0);
            }
        }
    }
}
