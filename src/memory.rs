//! Paged virtual memory: frame pool, per-process page tables, demand
//! paging with FIFO eviction, and the backing-store log.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::path::Path;

use chrono::Local;
use tracing::{debug, warn};

use crate::error::{FaultKind, MemoryError};

/// A single page's bookkeeping. `value` does double duty as a resident
/// page's frame contents and a non-resident page's backing-store shadow:
/// this emulator never models raw frame bytes separately from the
/// descriptor, so the same field is authoritative in both states, and
/// re-faulting a page always observes its last value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageEntry {
    pub resident: bool,
    pub frame: Option<usize>,
    pub dirty: bool,
    pub value: u16,
}

#[derive(Debug)]
struct ProcessMemory {
    pid: u32,
    base: usize,
    limit: usize,
    pages: Vec<PageEntry>,
}

/// A resident frame's owning (process name, page number) tag.
pub type FrameTag = (String, u32);

pub struct MemoryManager {
    page_size: usize,
    total_memory: usize,
    frames: Vec<Option<FrameTag>>,
    /// Frame indices in residency order — the FIFO eviction queue. Its
    /// length always equals the number of non-empty frames.
    fifo: VecDeque<usize>,
    processes: HashMap<String, ProcessMemory>,
    high_water_mark: usize,
    backing_log: Vec<String>,
    backing_log_path: Option<std::path::PathBuf>,
}

impl MemoryManager {
    pub fn new(total_memory: usize, page_size: usize) -> Self {
        let frame_count = total_memory / page_size;
        Self {
            page_size,
            total_memory,
            frames: vec![None; frame_count],
            fifo: VecDeque::new(),
            processes: HashMap::new(),
            high_water_mark: 0,
            backing_log: Vec::new(),
            backing_log_path: None,
        }
    }

    pub fn with_backing_log_path(mut self, path: std::path::PathBuf) -> Self {
        self.backing_log_path = Some(path);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn total_memory(&self) -> usize {
        self.total_memory
    }

    /// Allocate address space for a new process, keyed by the process id
    /// its owner (the scheduler) has already assigned — a single counter
    /// shared with the scheduler rather than two ids that could drift
    /// apart.
    pub fn allocate(&mut self, name: &str, bytes: usize, pid: u32) -> Result<(), MemoryError> {
        if self.processes.contains_key(name) {
            return Err(MemoryError::NameInUse);
        }
        let valid_size = bytes.is_power_of_two()
            && (64..=65536).contains(&bytes)
            && bytes >= self.page_size;
        if !valid_size {
            return Err(MemoryError::InvalidSize);
        }
        if self.high_water_mark + bytes > self.total_memory {
            return Err(MemoryError::OutOfMemory);
        }

        let page_count = bytes.div_ceil(self.page_size);
        let base = self.high_water_mark;
        self.high_water_mark += bytes;

        self.processes.insert(
            name.to_string(),
            ProcessMemory {
                pid,
                base,
                limit: bytes,
                pages: vec![PageEntry::default(); page_count],
            },
        );
        debug!(process = name, pid, base, bytes, "allocated address space");
        Ok(())
    }

    /// Pages out every resident page and drops the process's record.
    /// Idempotent for unknown names.
    pub fn deallocate(&mut self, name: &str) {
        let Some(proc_mem) = self.processes.remove(name) else {
            return;
        };
        for frame in proc_mem.pages.iter().filter_map(|p| p.frame) {
            self.frames[frame] = None;
            self.fifo.retain(|&f| f != frame);
        }
        debug!(process = name, "deallocated address space");
    }

    pub fn is_valid_access(&self, name: &str, page_number: usize) -> bool {
        self.processes
            .get(name)
            .is_some_and(|p| page_number < p.pages.len())
    }

    /// Translate an absolute address against a process's address space,
    /// yielding the page number or an `AccessViolation`.
    pub fn translate(&self, name: &str, addr: u32) -> Result<usize, FaultKind> {
        let proc_mem = self
            .processes
            .get(name)
            .ok_or(FaultKind::AccessViolation)?;
        let addr = addr as usize;
        if addr < proc_mem.base || addr >= proc_mem.base + proc_mem.limit {
            return Err(FaultKind::AccessViolation);
        }
        Ok((addr - proc_mem.base) / self.page_size)
    }

    /// Fault the page in if it is not already resident.
    pub fn access_page(&mut self, name: &str, page_number: usize) {
        let already_resident = self
            .processes
            .get(name)
            .and_then(|p| p.pages.get(page_number))
            .map(|p| p.resident)
            .unwrap_or(true);
        if already_resident {
            return;
        }

        let frame = self.find_free_frame().unwrap_or_else(|| self.replace_page());
        self.frames[frame] = Some((name.to_string(), page_number as u32));
        self.fifo.push_back(frame);

        if let Some(proc_mem) = self.processes.get_mut(name) {
            if let Some(page) = proc_mem.pages.get_mut(page_number) {
                page.resident = true;
                page.frame = Some(frame);
            }
        }
        self.log_backing_event(&format!("[LOAD] {name} page {page_number} -> frame {frame}"));
    }

    pub fn read_page(&self, name: &str, page_number: usize) -> u16 {
        self.processes
            .get(name)
            .and_then(|p| p.pages.get(page_number))
            .map(|p| p.value)
            .unwrap_or(0)
    }

    /// Store a value into a page, marking it dirty. The caller must have
    /// already faulted the page in via [`Self::access_page`].
    pub fn write_page(&mut self, name: &str, page_number: usize, value: u16) {
        if let Some(proc_mem) = self.processes.get_mut(name) {
            if let Some(page) = proc_mem.pages.get_mut(page_number) {
                page.value = value;
                page.dirty = true;
            }
        }
    }

    fn find_free_frame(&self) -> Option<usize> {
        self.frames.iter().position(Option::is_none)
    }

    /// Evict the oldest resident frame per strict FIFO order.
    fn replace_page(&mut self) -> usize {
        let frame = self
            .fifo
            .pop_front()
            .expect("replace_page called with no resident frames and no free frame");
        let (name, page_number) = self.frames[frame]
            .take()
            .expect("FIFO-tracked frame was already empty");

        if let Some(proc_mem) = self.processes.get_mut(&name) {
            if let Some(page) = proc_mem.pages.get_mut(page_number as usize) {
                // dirty contents already live in `page.value`; nothing further
                // to persist beyond clearing residency (see PageEntry docs).
                page.resident = false;
                page.frame = None;
            }
        }
        self.log_backing_event(&format!(
            "[EVICT] {name} page {page_number} from frame {frame}"
        ));
        frame
    }

    fn log_backing_event(&mut self, line: &str) {
        debug!(%line, "backing store");
        self.backing_log.push(line.to_string());
        if let Some(path) = &self.backing_log_path {
            use std::io::Write;
            let result = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut f| writeln!(f, "{line}"));
            if let Err(e) = result {
                warn!(error = %e, path = %path.display(), "failed to append backing-store log");
            }
        }
    }

    pub fn backing_log(&self) -> &[String] {
        &self.backing_log
    }

    /// Snapshot of frame occupancy, indexed by frame number.
    pub fn frame_table(&self) -> &[Option<FrameTag>] {
        &self.frames
    }

    pub fn process_names(&self) -> impl Iterator<Item = &str> {
        self.processes.keys().map(String::as_str)
    }

    pub fn page_table_of(&self, name: &str) -> Option<&[PageEntry]> {
        self.processes.get(name).map(|p| p.pages.as_slice())
    }

    pub fn region_of(&self, name: &str) -> Option<(usize, usize)> {
        self.processes.get(name).map(|p| (p.base, p.limit))
    }

    pub fn pid_of(&self, name: &str) -> Option<u32> {
        self.processes.get(name).map(|p| p.pid)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Sum of gaps between sorted allocated regions plus the tail gap, in
    /// KiB.
    pub fn external_fragmentation_kib(&self) -> f64 {
        let mut regions: Vec<(usize, usize)> = self
            .processes
            .values()
            .map(|p| (p.base, p.limit))
            .collect();
        regions.sort_by_key(|&(base, _)| base);

        let mut gap_bytes = 0usize;
        let mut cursor = 0usize;
        for (base, limit) in &regions {
            gap_bytes += base.saturating_sub(cursor);
            cursor = base + limit;
        }
        gap_bytes += self.total_memory.saturating_sub(cursor);
        gap_bytes as f64 / 1024.0
    }

    /// Write a `memory_stamp_<quantum>.txt`-shaped snapshot.
    pub fn write_memory_stamp(&self, quantum: u64, dir: &Path) -> std::io::Result<()> {
        let body = self.render_memory_stamp();
        let path = dir.join(format!("memory_stamp_{quantum}.txt"));
        std::fs::write(path, body)
    }

    fn render_memory_stamp(&self) -> String {
        let mut out = String::new();
        let now = Local::now().format("(%m/%d/%Y %I:%M:%S%p)");
        let _ = writeln!(out, "{now}");
        let _ = writeln!(out, "Processes in memory: {}", self.processes.len());
        let _ = writeln!(
            out,
            "External fragmentation in KiB: {:.2}",
            self.external_fragmentation_kib()
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "----end---- = {}", self.total_memory);

        let mut regions: Vec<&ProcessMemory> = self.processes.values().collect();
        regions.sort_by(|a, b| b.base.cmp(&a.base));
        for p in regions {
            let _ = writeln!(out, "{}", p.base + p.limit);
            let _ = writeln!(out, "P{}", p.pid);
            let _ = writeln!(out, "{}", p.base);
        }
        let _ = writeln!(out, "----start---- = 0");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> MemoryManager {
        MemoryManager::new(192, 64)
    }

    #[test]
    fn allocate_assigns_ascending_bases() {
        let mut m = manager();
        m.allocate("P1", 64, 1).unwrap();
        m.allocate("P2", 64, 2).unwrap();
        assert_eq!(m.region_of("P1"), Some((0, 64)));
        assert_eq!(m.region_of("P2"), Some((64, 64)));
        assert_eq!(m.pid_of("P1"), Some(1));
        assert_eq!(m.pid_of("P2"), Some(2));
    }

    #[test]
    fn rejects_non_power_of_two_or_out_of_range_sizes() {
        let mut m = manager();
        assert_eq!(
            m.allocate("bad", 100, 1).unwrap_err(),
            MemoryError::InvalidSize
        );
        assert_eq!(
            m.allocate("tiny", 32, 1).unwrap_err(),
            MemoryError::InvalidSize
        );
        assert_eq!(
            m.allocate("huge", 1 << 20, 1).unwrap_err(),
            MemoryError::InvalidSize
        );
    }

    #[test]
    fn rejects_duplicate_name() {
        let mut m = manager();
        m.allocate("P1", 64, 1).unwrap();
        assert_eq!(
            m.allocate("P1", 64, 2).unwrap_err(),
            MemoryError::NameInUse
        );
    }

    #[test]
    fn rejects_allocation_once_address_space_is_exhausted() {
        let mut m = manager(); // 192 total, 64-byte frames
        m.allocate("P1", 128, 1).unwrap();
        m.allocate("P2", 64, 2).unwrap(); // high-water mark now at 192
        assert_eq!(
            m.allocate("P3", 64, 3).unwrap_err(),
            MemoryError::OutOfMemory
        );
        // deallocating P1 doesn't lower the append-only high-water mark,
        // so the pool stays exhausted (spec §4.3: allocations are
        // append-only until a matching deallocate frees *frames*, not
        // address space).
        m.deallocate("P1");
        assert_eq!(
            m.allocate("P3", 64, 3).unwrap_err(),
            MemoryError::OutOfMemory
        );
    }

    #[test]
    fn fifo_eviction_evicts_oldest_page_first() {
        // mem-per-frame=64, a process of 256 bytes (4 pages), frameCount=3.
        let mut m = MemoryManager::new(192, 64);
        m.allocate("P1", 256, 1).unwrap();
        assert_eq!(m.frame_count(), 3);

        m.access_page("P1", 0);
        m.access_page("P1", 1);
        m.access_page("P1", 2);
        // frames full; next fault evicts page 0 (oldest).
        m.access_page("P1", 3);
        assert!(!m.page_table_of("P1").unwrap()[0].resident);
        assert!(m.page_table_of("P1").unwrap()[3].resident);

        // next fault evicts page 1.
        m.access_page("P1", 0);
        assert!(!m.page_table_of("P1").unwrap()[1].resident);
        assert!(m.page_table_of("P1").unwrap()[0].resident);
    }

    #[test]
    fn repeated_access_to_resident_page_is_noop() {
        let mut m = manager();
        m.allocate("P1", 64, 1).unwrap();
        m.access_page("P1", 0);
        let frame_before = m.page_table_of("P1").unwrap()[0].frame;
        m.access_page("P1", 0);
        assert_eq!(m.page_table_of("P1").unwrap()[0].frame, frame_before);
    }

    #[test]
    fn write_then_evict_then_refault_preserves_value() {
        let mut m = MemoryManager::new(128, 64);
        m.allocate("P1", 128, 1).unwrap();
        m.access_page("P1", 0);
        m.write_page("P1", 0, 42);
        m.access_page("P1", 1); // fills remaining frame
        // no free frames now: third distinct page forces eviction of page 0
        m.allocate("P2", 64, 2).unwrap();
        m.access_page("P2", 0);
        assert!(!m.page_table_of("P1").unwrap()[0].resident);
        assert_eq!(m.read_page("P1", 0), 42);
        m.access_page("P1", 0);
        assert_eq!(m.read_page("P1", 0), 42);
    }

    #[test]
    fn deallocate_is_idempotent_for_unknown_name() {
        let mut m = manager();
        m.deallocate("ghost");
    }

    #[test]
    fn translate_rejects_out_of_range_address() {
        let mut m = manager();
        m.allocate("P1", 128, 1).unwrap();
        assert_eq!(m.translate("P1", 0).unwrap(), 0);
        assert_eq!(m.translate("P1", 0x200).unwrap_err(), FaultKind::AccessViolation);
    }

    #[test]
    fn external_fragmentation_counts_gaps_between_regions() {
        let mut m = MemoryManager::new(1024, 64);
        m.allocate("P1", 64, 1).unwrap(); // [0, 64)
        m.allocate("P2", 128, 2).unwrap(); // [64, 192)
        m.deallocate("P1"); // reopens [0, 64) as a gap
        // tail gap: 1024 - 192 = 832; leading gap: 64
        assert_eq!(m.external_fragmentation_kib(), (64.0 + 832.0) / 1024.0);
    }
}
