use super::{HostMemorySample, Pid, ProcessDetails, SnapshotSource, SystemInfo, BYTES_PER_MB};
use crate::error::QueryError;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

#[derive(Clone)]
struct CpuSample {
    total_ticks: u64, // utime + stime
    timestamp: Instant,
}

struct StatFields {
    name: String,
    state: char,
    total_ticks: u64,
    threads: u64,
    start_ticks: u64,
    rss_pages: u64,
}

/// Snapshot source backed by procfs.
pub struct LinuxSnapshotSource {
    proc_root: PathBuf,
    page_size: u64,
    clock_ticks: u64,
    boot_time: u64,
    num_cpus: u64,
    self_pid: Pid,
    cpu_samples: Mutex<HashMap<Pid, CpuSample>>,
}

impl LinuxSnapshotSource {
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    /// Read from an alternate procfs mount (containers, fixtures).
    pub fn with_proc_root(root: impl Into<PathBuf>) -> Self {
        let proc_root = root.into();
        // SAFETY: sysconf only reads process-wide constants
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) }.max(1) as u64;
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) }.max(1) as u64;
        let num_cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) }.max(1) as u64;
        let boot_time = Self::read_boot_time(&proc_root);
        Self {
            proc_root,
            page_size,
            clock_ticks,
            boot_time,
            num_cpus,
            self_pid: std::process::id(),
            cpu_samples: Mutex::new(HashMap::new()),
        }
    }

    fn read_boot_time(proc_root: &Path) -> u64 {
        let stat = fs::read_to_string(proc_root.join("stat")).unwrap_or_default();
        stat.lines()
            .find_map(|line| line.strip_prefix("btime "))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    fn proc_dir(&self, pid: Pid) -> PathBuf {
        self.proc_root.join(pid.to_string())
    }

    fn read_stat(&self, pid: Pid) -> Result<StatFields, QueryError> {
        let path = self.proc_dir(pid).join("stat");
        let content = fs::read_to_string(&path)
            .map_err(|e| QueryError::from_proc_io(pid, path.display().to_string(), e))?;
        parse_stat(pid, &content)
    }

    fn read_meminfo(&self) -> Result<HashMap<String, u64>, QueryError> {
        let path = self.proc_root.join("meminfo");
        let content = fs::read_to_string(&path).map_err(|source| QueryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let info = parse_meminfo(&content);
        if info.get("MemTotal").copied().unwrap_or(0) == 0 {
            return Err(QueryError::Malformed {
                what: "meminfo",
                detail: "MemTotal missing or zero".to_string(),
            });
        }
        Ok(info)
    }

    fn rss_mb(&self, stat: &StatFields) -> f64 {
        round2((stat.rss_pages * self.page_size) as f64 / BYTES_PER_MB)
    }

    fn cpu_percent(&self, pid: Pid, total_ticks: u64) -> f64 {
        let now = Instant::now();
        let mut samples = self
            .cpu_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let percent = match samples.get(&pid) {
            Some(prev) => {
                let tick_delta = total_ticks.saturating_sub(prev.total_ticks);
                let time_delta = now.duration_since(prev.timestamp).as_secs_f64();
                if time_delta > 0.0 {
                    let cpu_seconds = tick_delta as f64 / self.clock_ticks as f64;
                    (cpu_seconds / time_delta) * 100.0
                } else {
                    0.0
                }
            }
            // First observation has no baseline
            None => 0.0,
        };
        samples.insert(pid, CpuSample { total_ticks, timestamp: now });
        samples.retain(|pid, _| self.proc_dir(*pid).exists());
        percent
    }

    fn read_trimmed(&self, relative: &str) -> String {
        fs::read_to_string(self.proc_root.join(relative))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}

impl Default for LinuxSnapshotSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for LinuxSnapshotSource {
    fn host_memory(&self) -> Result<HostMemorySample, QueryError> {
        let info = self.read_meminfo()?;
        let kb = |key: &str| info.get(key).copied().unwrap_or(0);

        let total = kb("MemTotal");
        let free = kb("MemFree");
        let available = info.get("MemAvailable").copied().unwrap_or(free);
        let cached = kb("Cached") + kb("SReclaimable");
        let used = total
            .saturating_sub(free)
            .saturating_sub(kb("Buffers"))
            .saturating_sub(cached);
        let swap_used = kb("SwapTotal").saturating_sub(kb("SwapFree"));
        let used_percent = total.saturating_sub(available) as f64 / total as f64 * 100.0;

        Ok(HostMemorySample {
            timestamp: Utc::now(),
            total_mb: kb_to_mb(total),
            used_mb: kb_to_mb(used),
            free_mb: kb_to_mb(free),
            swap_used_mb: kb_to_mb(swap_used),
            used_percent: round2(used_percent),
        })
    }

    fn self_process_memory(&self) -> Result<f64, QueryError> {
        self.process_memory(self.self_pid)
    }

    fn process_memory(&self, pid: Pid) -> Result<f64, QueryError> {
        let stat = self.read_stat(pid)?;
        // Zombies keep a stat entry but no longer own memory
        if stat.state == 'Z' || stat.state == 'X' {
            return Err(QueryError::NoSuchProcess(pid));
        }
        Ok(self.rss_mb(&stat))
    }

    fn process_exists(&self, pid: Pid) -> bool {
        pid != 0 && self.proc_dir(pid).join("stat").exists()
    }

    fn system_info(&self) -> SystemInfo {
        let (total_gb, swap_gb) = match self.read_meminfo() {
            Ok(info) => {
                let gb = |key: &str| {
                    round2(info.get(key).copied().unwrap_or(0) as f64 / (1024.0 * 1024.0))
                };
                (gb("MemTotal"), gb("SwapTotal"))
            }
            Err(_) => (0.0, 0.0),
        };
        let cpuinfo = fs::read_to_string(self.proc_root.join("cpuinfo")).unwrap_or_default();
        let logical_cores = self.num_cpus as usize;

        SystemInfo {
            system: capitalize(std::env::consts::OS),
            node: self.read_trimmed("sys/kernel/hostname"),
            release: self.read_trimmed("sys/kernel/osrelease"),
            version: self.read_trimmed("sys/kernel/version"),
            machine: std::env::consts::ARCH.to_string(),
            processor: processor_model(&cpuinfo),
            physical_cores: physical_cores(&cpuinfo).unwrap_or(logical_cores),
            logical_cores,
            total_memory_gb: total_gb,
            swap_memory_gb: swap_gb,
        }
    }

    fn process_details(&self, pid: Pid) -> Result<ProcessDetails, QueryError> {
        let stat = self.read_stat(pid)?;
        let total_kb = self
            .read_meminfo()?
            .get("MemTotal")
            .copied()
            .unwrap_or(0);
        let memory_mb = self.rss_mb(&stat);
        let memory_percent = if total_kb > 0 {
            round2(memory_mb / kb_to_mb(total_kb) * 100.0)
        } else {
            0.0
        };
        let started_secs = self.boot_time + stat.start_ticks / self.clock_ticks;

        Ok(ProcessDetails {
            pid,
            name: stat.name,
            state: stat.state,
            threads: stat.threads,
            cpu_percent: round2(self.cpu_percent(pid, stat.total_ticks)),
            memory_mb,
            memory_percent,
            started_at: epoch_to_utc(started_secs),
        })
    }
}

fn parse_stat(pid: Pid, content: &str) -> Result<StatFields, QueryError> {
    let malformed = |detail: String| QueryError::Malformed {
        what: "process stat",
        detail,
    };
    // The command name may itself contain spaces or parentheses
    let (open, close) = match (content.find('('), content.rfind(')')) {
        (Some(open), Some(close)) if close > open => (open, close),
        _ => return Err(malformed(format!("PID {pid}: missing command name"))),
    };
    let name = content[open + 1..close].to_string();
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() < 22 {
        return Err(malformed(format!("PID {pid}: only {} fields", rest.len())));
    }
    let field = |idx: usize| -> u64 {
        rest.get(idx)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    };

    Ok(StatFields {
        name,
        state: rest.first().and_then(|s| s.chars().next()).unwrap_or('?'),
        total_ticks: field(11) + field(12),
        threads: field(17),
        start_ticks: field(19),
        rss_pages: field(21),
    })
}

fn parse_meminfo(content: &str) -> HashMap<String, u64> {
    content
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim().to_string(), value))
        })
        .collect()
}

fn processor_model(cpuinfo: &str) -> String {
    cpuinfo
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            matches!(key.trim(), "model name" | "Hardware" | "cpu model")
                .then(|| value.trim().to_string())
        })
        .unwrap_or_else(|| std::env::consts::ARCH.to_string())
}

fn physical_cores(cpuinfo: &str) -> Option<usize> {
    let mut cores = HashSet::new();
    let mut physical_id = None;
    for line in cpuinfo.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "physical id" => physical_id = Some(value.trim().to_string()),
            "core id" => {
                cores.insert((physical_id.clone(), value.trim().to_string()));
            }
            _ => {}
        }
    }
    (!cores.is_empty()).then_some(cores.len())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn epoch_to_utc(secs: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_default()
}

fn kb_to_mb(kb: u64) -> f64 {
    round2(kb as f64 / 1024.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_name_with_spaces_and_parens() {
        let line = "4242 (tmux: server (1)) S 1 4242 4242 0 -1 4194560 500 0 0 0 \
                    17 9 0 0 20 0 3 0 12345 102400 2048 18446744073709551615";
        let stat = parse_stat(4242, line).unwrap();
        assert_eq!(stat.name, "tmux: server (1)");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.total_ticks, 26);
        assert_eq!(stat.threads, 3);
        assert_eq!(stat.start_ticks, 12345);
        assert_eq!(stat.rss_pages, 2048);
    }

    #[test]
    fn truncated_stat_is_malformed() {
        let err = parse_stat(7, "7 (x) R 1 2").err().unwrap();
        assert!(matches!(err, QueryError::Malformed { .. }));
    }

    #[test]
    fn meminfo_values_in_kb() {
        let info = parse_meminfo("MemTotal:       16384000 kB\nMemFree: 2048 kB\nbogus line\n");
        assert_eq!(info.get("MemTotal"), Some(&16384000));
        assert_eq!(info.get("MemFree"), Some(&2048));
        assert_eq!(info.len(), 2);
    }

    #[test]
    fn physical_core_pairs() {
        let cpuinfo = "processor\t: 0\nphysical id\t: 0\ncore id\t: 0\n\n\
                       processor\t: 1\nphysical id\t: 0\ncore id\t: 0\n\n\
                       processor\t: 2\nphysical id\t: 0\ncore id\t: 1\n";
        assert_eq!(physical_cores(cpuinfo), Some(2));
        assert_eq!(physical_cores(""), None);
    }
}
