//! The `System` context handle: the one long-lived object the REPL holds
//! (spec §9 "Global singletons" — explicit context instead of the
//! reference's `scheduler`/`memManager`/`varManager` globals).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::config::{self, SystemConfig};
use crate::error::{CoreError, CoreResult, ProcessError};
use crate::instruction::{parse_instruction_list, Instruction};
use crate::memory::MemoryManager;
use crate::process::{Process, TerminalReason};
use crate::scheduler::Scheduler;
use crate::testgen;

/// Everything a running emulator session needs, built from a validated
/// [`SystemConfig`] (spec §6 `initialize`).
pub struct System {
    config: SystemConfig,
    scheduler: Arc<Scheduler>,
    report_dir: PathBuf,
    memory_stamp_dir: PathBuf,
}

impl System {
    /// `initialize`: load and validate a configuration file, then build the
    /// scheduler and memory manager (spec §6). Nothing is started yet —
    /// callers issue `scheduler-start` to begin batch spawning; the worker
    /// pool itself starts with the first `screen -s`/`-c`.
    pub fn initialize(config_path: &Path, backing_store_path: &Path) -> CoreResult<Self> {
        let config = config::load(config_path)?;
        Self::from_config(config, backing_store_path)
    }

    pub fn from_config(config: SystemConfig, backing_store_path: &Path) -> CoreResult<Self> {
        let memory = MemoryManager::new(config.max_overall_mem, config.mem_per_frame)
            .with_backing_log_path(backing_store_path.to_path_buf());
        let scheduler = Scheduler::new(config.scheduler_config(), memory);
        info!("system initialized");
        Ok(Self {
            config,
            scheduler,
            report_dir: PathBuf::from("."),
            memory_stamp_dir: PathBuf::from("."),
        })
    }

    pub fn with_report_dir(mut self, dir: PathBuf) -> Self {
        self.report_dir = dir;
        self
    }

    pub fn with_memory_stamp_dir(mut self, dir: PathBuf) -> Self {
        self.memory_stamp_dir = dir;
        self
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// `screen -s <name> <bytes>`: create a process with a generated
    /// default instruction stream (spec §6).
    pub fn create_with_default_program(&self, name: &str, bytes: usize) -> Result<u64, ProcessError> {
        let mut rng = rand::thread_rng();
        let program = testgen::random_program(
            &mut rng,
            self.config.min_instructions,
            self.config.max_instructions,
        );
        self.create_process(name, bytes, program)
    }

    /// `screen -c <name> <bytes> "i1;i2;..."`: create a process with an
    /// explicit instruction list (spec §6).
    pub fn create_with_program_text(
        &self,
        name: &str,
        bytes: usize,
        program_text: &str,
    ) -> Result<u64, ProcessError> {
        let program = parse_instruction_list(program_text)?;
        self.create_process(name, bytes, program)
    }

    fn create_process(
        &self,
        name: &str,
        bytes: usize,
        program: Vec<Instruction>,
    ) -> Result<u64, ProcessError> {
        let id = self.scheduler.submit(name, bytes, program)?;
        self.scheduler.start();
        Ok(id)
    }

    /// `screen -r <name>`: re-enter an existing process's view. Refuses
    /// terminal or access-violated processes (spec §6).
    pub fn enter_process(&self, name: &str) -> Result<Arc<Mutex<Process>>, ProcessError> {
        let handle = self
            .scheduler
            .process_handle(name)
            .ok_or_else(|| ProcessError::NotFound(name.to_string()))?;
        if handle.lock().is_terminal() {
            return Err(ProcessError::AlreadyFinished(name.to_string()));
        }
        Ok(handle)
    }

    /// `screen -ls`: running and finished processes (spec §6).
    pub fn list_processes(&self) -> Vec<crate::scheduler::ProcessSummary> {
        self.scheduler.snapshot()
    }

    /// `scheduler-start` (batch spawning, spec §4.4/§6).
    pub fn enable_batch_spawning(&self) {
        self.scheduler.start();
        self.scheduler.enable_batch();
    }

    /// `scheduler-stop`.
    pub fn disable_batch_spawning(&self) {
        self.scheduler.disable_batch();
    }

    /// Full shutdown (spec §5 "Cancellation"): stop batch spawning, then
    /// stop the worker pool. Always safe to call.
    pub fn shutdown(&self) {
        self.scheduler.disable_batch();
        self.scheduler.stop();
    }

    /// `process-smi`: memory manager snapshot (spec §6).
    pub fn process_smi(&self) -> String {
        let memory = self.scheduler.memory();
        let memory = memory.lock();
        let mut out = String::new();
        use std::fmt::Write as _;
        let used = memory.frame_table().iter().filter(|f| f.is_some()).count();
        let _ = writeln!(out, "========== process-smi ==========");
        let _ = writeln!(
            out,
            "Total Memory: {} bytes ({} frames)",
            memory.total_memory(),
            memory.frame_count()
        );
        let _ = writeln!(out, "Used Frames : {used}");
        let _ = writeln!(out, "Free Frames : {}", memory.frame_count() - used);
        let _ = writeln!(out, "\nFrame Table:");
        for (i, tag) in memory.frame_table().iter().enumerate() {
            let shown = match tag {
                Some((name, page)) => format!("{name}@{page}"),
                None => "EMPTY".to_string(),
            };
            let _ = writeln!(out, "  Frame[{i:>2}]: {shown}");
        }
        let _ = writeln!(out, "\nProcess List:");
        let mut names: Vec<&str> = memory.process_names().collect();
        names.sort_unstable();
        for name in names {
            if let Some((_, limit)) = memory.region_of(name) {
                let pages = memory.page_table_of(name).map(|p| p.len()).unwrap_or(0);
                let _ = writeln!(out, "  {name}: {limit} bytes, {pages} pages");
            }
        }
        let _ = writeln!(out, "=================================");
        out
    }

    /// `vmstat`: frame utilization and per-process page residency (spec §6).
    pub fn vmstat(&self) -> String {
        let memory = self.scheduler.memory();
        let memory = memory.lock();
        let mut out = String::new();
        use std::fmt::Write as _;
        let used = memory.frame_table().iter().filter(|f| f.is_some()).count();
        let _ = writeln!(out, "========== vmstat ==========");
        let _ = writeln!(out, "Total Frames: {}", memory.frame_count());
        let _ = writeln!(out, "Free Frames : {}", memory.frame_count() - used);
        let _ = writeln!(out, "Used Frames : {used}");
        let _ = writeln!(out, "\nActive Processes:");
        let mut names: Vec<&str> = memory.process_names().collect();
        names.sort_unstable();
        for name in names {
            let pages = memory.page_table_of(name).unwrap_or(&[]);
            let _ = writeln!(out, "  {name} ({} pages):", pages.len());
            for (i, page) in pages.iter().enumerate() {
                let where_ = match page.frame {
                    Some(f) => format!("Frame {f}"),
                    None => "NOT IN MEMORY".to_string(),
                };
                let _ = writeln!(out, "    Page[{i}] -> {where_}");
            }
        }
        let _ = writeln!(out, "============================");
        out
    }

    /// Render the same status lines `screen -ls` prints, for `report-util`
    /// (spec §6; the original has no equivalent, shape follows §6 directly).
    pub fn report_text(&self) -> String {
        let mut out = String::new();
        use std::fmt::Write as _;
        let summaries = self.list_processes();
        let (running, finished): (Vec<_>, Vec<_>) =
            summaries.into_iter().partition(|p| p.terminal.is_none());

        let _ = writeln!(out, "Running processes:");
        for p in &running {
            let core = p.core.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "  {} (id {}) core:{} {}/{}",
                p.name, p.id, core, p.current_line, p.total_lines
            );
        }

        let _ = writeln!(out, "\nFinished processes:");
        for p in &finished {
            let annotation = match p.terminal {
                Some(TerminalReason::AccessViolation) => " [AccessViolation]",
                _ => "",
            };
            let _ = writeln!(
                out,
                "  {} (id {}) {}/{}{}",
                p.name, p.id, p.current_line, p.total_lines, annotation
            );
        }
        out
    }

    /// `report-util`: write [`Self::report_text`] to the configured path.
    pub fn write_report(&self, file_name: &str) -> CoreResult<PathBuf> {
        std::fs::create_dir_all(&self.report_dir)?;
        let path = self.report_dir.join(file_name);
        std::fs::write(&path, self.report_text())
            .map_err(CoreError::Io)?;
        Ok(path)
    }

    /// Write a `memory_stamp_<quantum>.txt` snapshot (spec §6), using the
    /// scheduler's current tick as the quantum index.
    pub fn write_memory_stamp(&self) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.memory_stamp_dir)?;
        let quantum = self.scheduler.tick_count();
        let memory = self.scheduler.memory();
        memory
            .lock()
            .write_memory_stamp(quantum, &self.memory_stamp_dir)?;
        Ok(self
            .memory_stamp_dir
            .join(format!("memory_stamp_{quantum}.txt")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config() -> SystemConfig {
        crate::config::parse(
            r#"
num-cpu 1
scheduler "fcfs"
quantum-cycles 4
batch-process-freq 1
min-ins 1
max-ins 1
delay-per-exec 0
max-overall-mem 1024
mem-per-frame 64
mem-per-proc 64
"#,
        )
        .unwrap()
    }

    #[test]
    fn create_and_list_roundtrips() {
        let dir = tempdir().unwrap();
        let backing = dir.path().join("backing.txt");
        let sys = System::from_config(test_config(), &backing).unwrap();
        sys.create_with_program_text("P1", 64, "PRINT(\"hi\")").unwrap();
        let summaries = sys.list_processes();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "P1");
        sys.shutdown();
    }

    #[test]
    fn enter_process_refuses_unknown_name() {
        let dir = tempdir().unwrap();
        let backing = dir.path().join("backing.txt");
        let sys = System::from_config(test_config(), &backing).unwrap();
        assert!(matches!(
            sys.enter_process("ghost"),
            Err(ProcessError::NotFound(_))
        ));
        sys.shutdown();
    }

    #[test]
    fn process_smi_mentions_header() {
        let dir = tempdir().unwrap();
        let backing = dir.path().join("backing.txt");
        let sys = System::from_config(test_config(), &backing).unwrap();
        let text = sys.process_smi();
        assert!(text.contains("process-smi"));
        sys.shutdown();
    }

    #[test]
    fn write_report_creates_file() {
        let dir = tempdir().unwrap();
        let backing = dir.path().join("backing.txt");
        let sys = System::from_config(test_config(), &backing)
            .unwrap()
            .with_report_dir(dir.path().to_path_buf());
        let path = sys.write_report("report.txt").unwrap();
        assert!(path.exists());
        sys.shutdown();
    }
}
