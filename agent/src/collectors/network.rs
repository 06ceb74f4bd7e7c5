use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;

use tracing::debug;

use crate::collectors::counter::CounterWidth;
use crate::collectors::read_pseudo_file;
use crate::error::SampleError;

/// Traffic on one network interface since the previous sample.
#[derive(Debug, Clone, PartialEq)]
pub struct NetDelta {
    pub device: String,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub delta_time_secs: f64,
}

impl NetDelta {
    pub fn is_active(&self) -> bool {
        self.bytes_received > 0 || self.bytes_sent > 0
    }
}

#[derive(Debug, Clone, Copy)]
struct RawNetData {
    time: Instant,
    up: bool,
    bytes_received: u64,
    bytes_sent: u64,
}

/// Parse `/proc/net/dev` into interface → (bytes received, bytes sent).
pub fn parse_net_dev(contents: &str) -> BTreeMap<String, (u64, u64)> {
    contents
        .lines()
        .filter_map(|line| {
            let (name, counters) = line.split_once(':')?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return None;
            }
            let counters: Vec<&str> = counters.split_whitespace().collect();
            let received = counters.first()?.parse::<u64>().ok()?;
            let sent = counters.get(8)?.parse::<u64>().ok()?;
            Some((name.to_string(), (received, sent)))
        })
        .collect()
}

/// Interfaces with at least one entry in `/proc/net/route`.
pub fn parse_routes(contents: &str) -> HashSet<String> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| line.split('\t').next())
        .map(str::trim)
        .filter(|dev| !dev.is_empty())
        .map(str::to_string)
        .collect()
}

/// Per-interface byte counter baselines.
///
/// Baselines of interfaces that vanish from the device table are kept so a
/// reappearing interface continues from its last reading.
#[derive(Debug)]
pub struct NetInventory {
    root: PathBuf,
    saved: HashMap<String, RawNetData>,
    last_sample: Option<Instant>,
}

impl NetInventory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            saved: HashMap::new(),
            last_sample: None,
        }
    }

    pub fn baseline(&mut self) -> Result<(), SampleError> {
        let (now, current) = self.read_net_data()?;
        self.saved = current.into_iter().collect();
        self.last_sample = Some(now);
        Ok(())
    }

    /// Deltas for interfaces that are up or moved traffic since the last call.
    ///
    /// An interface seen for the first time is reported with zero traffic
    /// when it is up, and its counters become its baseline.
    pub fn stats(&mut self, width: CounterWidth) -> Result<Vec<NetDelta>, SampleError> {
        let (now, current) = self.read_net_data()?;
        let since_last = self
            .last_sample
            .map(|t| now.duration_since(t).as_secs_f64())
            .unwrap_or_default();

        let mut result = Vec::new();
        for (device, data) in &current {
            match self.saved.get(device) {
                None => {
                    if data.up {
                        result.push(NetDelta {
                            device: device.clone(),
                            bytes_received: 0,
                            bytes_sent: 0,
                            delta_time_secs: since_last,
                        });
                    }
                }
                Some(previous) => {
                    let delta = NetDelta {
                        device: device.clone(),
                        bytes_received: width.delta(data.bytes_received, previous.bytes_received),
                        bytes_sent: width.delta(data.bytes_sent, previous.bytes_sent),
                        delta_time_secs: data.time.duration_since(previous.time).as_secs_f64(),
                    };
                    if data.up || delta.is_active() {
                        result.push(delta);
                    }
                }
            }
        }

        self.saved.extend(current);
        self.last_sample = Some(now);
        Ok(result)
    }

    fn read_net_data(&self) -> Result<(Instant, BTreeMap<String, RawNetData>), SampleError> {
        let virtual_net = self.root.join("sys/devices/virtual/net");
        let up = self.up_devices();
        let contents = read_pseudo_file(&self.root.join("proc/net/dev"))?;
        let now = Instant::now();

        let data = parse_net_dev(&contents)
            .into_iter()
            .filter(|(dev, _)| !virtual_net.join(dev).is_dir())
            .map(|(dev, (bytes_received, bytes_sent))| {
                let raw = RawNetData {
                    time: now,
                    up: up.contains(&dev),
                    bytes_received,
                    bytes_sent,
                };
                (dev, raw)
            })
            .collect();
        Ok((now, data))
    }

    fn up_devices(&self) -> HashSet<String> {
        match read_pseudo_file(&self.root.join("proc/net/route")) {
            Ok(contents) => parse_routes(&contents),
            Err(e) => {
                debug!(category = "network", error = %e, "route table unavailable");
                HashSet::new()
            }
        }
    }
}
