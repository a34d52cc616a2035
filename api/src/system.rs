/// Host resource snapshot for `/system-info`.
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;
use sysinfo::{Disks, System};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub disk_usage: f64,
}

/// Read CPU, memory and disk usage.
///
/// CPU usage is measured since the previous refresh of `system`, so the
/// first call after startup reports 0. Disk usage is that of the mount
/// holding `download_dir`, or `/` when it cannot be matched.
pub fn snapshot(system: &Mutex<System>, download_dir: &Path) -> SystemSnapshot {
    let mut system = system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_percent = system.global_cpu_info().cpu_usage();
    let memory_percent = percent(system.used_memory(), system.total_memory());
    drop(system);

    let disks = Disks::new_with_refreshed_list();
    let target = std::fs::canonicalize(download_dir).unwrap_or_else(|_| Path::new("/").to_path_buf());
    let disk_usage = disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| percent(disk.total_space().saturating_sub(disk.available_space()), disk.total_space()))
        .unwrap_or(0.0);

    SystemSnapshot {
        cpu_percent,
        memory_percent,
        disk_usage,
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let value = used as f64 / total as f64 * 100.0;
    (value * 10.0).round() / 10.0
}
