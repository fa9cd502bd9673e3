#![forbid(unsafe_code)]

//! Service counters, host sampling and the Prometheus text rendering behind
//! `/health?detailed=true` and `/metrics`.

use std::{
    fmt::Write as _,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Disks, System};
use walkdir::WalkDir;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Monotonic counters shared by every request.
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    downloads_started: AtomicU64,
    downloads_succeeded: AtomicU64,
    downloads_failed: AtomicU64,
    downloaded_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub downloads_started: u64,
    pub downloads_succeeded: u64,
    pub downloads_failed: u64,
    pub downloaded_bytes: u64,
}

impl Metrics {
    pub fn request_seen(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_started(&self) {
        self.downloads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_succeeded(&self, bytes: u64) {
        self.downloads_succeeded.fetch_add(1, Ordering::Relaxed);
        self.downloaded_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            downloads_started: self.downloads_started.load(Ordering::Relaxed),
            downloads_succeeded: self.downloads_succeeded.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            downloaded_bytes: self.downloaded_bytes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_mb: f64,
    pub disk_usage_percent: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiskSpace {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub percent_used: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageUsage {
    pub downloads: u64,
    pub bytes: u64,
}

/// Host sampler. `sysinfo` needs two refreshes to report CPU usage, so one
/// `System` is kept alive for the life of the process.
pub struct HostSampler {
    system: Mutex<System>,
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }

    pub fn snapshot(&self, storage_root: &Path) -> SystemMetrics {
        let (cpu_percent, memory_percent, memory_available_mb) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            let total = system.total_memory();
            let available = system.available_memory();
            let memory_percent = if total == 0 {
                0.0
            } else {
                (total.saturating_sub(available)) as f64 / total as f64 * 100.0
            };
            (
                f64::from(system.global_cpu_usage()),
                memory_percent,
                available as f64 / BYTES_PER_MB,
            )
        };

        SystemMetrics {
            cpu_percent: round2(cpu_percent),
            memory_percent: round2(memory_percent),
            memory_available_mb: round2(memory_available_mb),
            disk_usage_percent: disk_space(storage_root)
                .map(|disk| disk.percent_used)
                .unwrap_or(0.0),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Space on the disk whose mount point is the longest prefix of `path`.
pub fn disk_space(path: &Path) -> Option<DiskSpace> {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())?;

    let total = disk.total_space();
    let free = disk.available_space();
    let used = total.saturating_sub(free);
    let percent_used = if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    };
    Some(DiskSpace {
        total_gb: round2(total as f64 / BYTES_PER_GB),
        used_gb: round2(used as f64 / BYTES_PER_GB),
        free_gb: round2(free as f64 / BYTES_PER_GB),
        percent_used: round2(percent_used),
    })
}

/// Counts download directories directly under `root` and the bytes of every
/// file below it.
pub fn storage_usage(root: &Path) -> StorageUsage {
    let mut usage = StorageUsage::default();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if entry.depth() == 1 && entry.file_type().is_dir() {
            usage.downloads += 1;
        } else if entry.file_type().is_file()
            && let Ok(meta) = entry.metadata()
        {
            usage.bytes += meta.len();
        }
    }
    usage
}

/// One `app_<name> <value>` line per metric.
pub fn render_prometheus(
    system: &SystemMetrics,
    counters: MetricsSnapshot,
    storage: StorageUsage,
) -> String {
    let mut out = String::new();
    let gauges = [
        ("cpu_percent", system.cpu_percent),
        ("memory_percent", system.memory_percent),
        ("memory_available_mb", system.memory_available_mb),
        ("disk_usage_percent", system.disk_usage_percent),
    ];
    for (name, value) in gauges {
        let _ = writeln!(out, "app_{name} {value}");
    }
    let totals = [
        ("requests_total", counters.requests),
        ("downloads_started_total", counters.downloads_started),
        ("downloads_succeeded_total", counters.downloads_succeeded),
        ("downloads_failed_total", counters.downloads_failed),
        ("downloaded_bytes_total", counters.downloaded_bytes),
        ("stored_downloads", storage.downloads),
        ("stored_bytes", storage.bytes),
    ];
    for (name, value) in totals {
        let _ = writeln!(out, "app_{name} {value}");
    }
    out
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
