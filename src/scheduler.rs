//! The multi-core scheduler: ready queue, worker pool, tick loop, and the
//! FCFS/RR policies (spec §4.4, §5).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::ProcessError;
use crate::instruction::Instruction;
use crate::memory::MemoryManager;
use crate::process::{MemoryTouch, Process, TerminalReason};
use crate::testgen;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Fcfs,
    Rr,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub core_count: usize,
    pub policy: Policy,
    pub quantum_cycles: u32,
    pub delay_per_exec: u32,
    pub tick_period: Duration,
    pub batch_process_freq: u32,
    pub min_instructions: u32,
    pub max_instructions: u32,
    pub mem_per_proc: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            core_count: num_cpus::get().max(1),
            policy: Policy::Rr,
            quantum_cycles: 4,
            delay_per_exec: 0,
            tick_period: Duration::from_millis(150),
            batch_process_freq: 1,
            min_instructions: 100,
            max_instructions: 100,
            mem_per_proc: 64,
        }
    }
}

/// Everything the scheduler lock guards: the ready queue, running slots,
/// finished list, and the process registry (spec §3, §5).
struct SchedulerState {
    ready: VecDeque<u64>,
    running: Vec<Option<u64>>,
    finished: Vec<u64>,
    registry: HashMap<u64, Arc<Mutex<Process>>>,
    by_name: HashMap<String, u64>,
    next_id: u64,
}

impl SchedulerState {
    fn new(core_count: usize) -> Self {
        Self {
            ready: VecDeque::new(),
            running: vec![None; core_count],
            finished: Vec::new(),
            registry: HashMap::new(),
            by_name: HashMap::new(),
            next_id: 1,
        }
    }
}

/// A point-in-time view for `screen -ls`/`process-smi`-style snapshots
/// (spec §4.5: read-only, consistent, taken under the scheduler lock).
pub struct ProcessSummary {
    pub id: u64,
    pub name: String,
    pub core: Option<usize>,
    pub current_line: u64,
    pub total_lines: u64,
    pub terminal: Option<TerminalReason>,
}

pub struct Scheduler {
    config: Mutex<SchedulerConfig>,
    state: Arc<Mutex<SchedulerState>>,
    memory: Arc<Mutex<MemoryManager>>,
    tick: Arc<AtomicU64>,
    workers_running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    batch_running: Arc<AtomicBool>,
    batch_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, memory: MemoryManager) -> Arc<Self> {
        let core_count = config.core_count;
        Arc::new(Self {
            config: Mutex::new(config),
            state: Arc::new(Mutex::new(SchedulerState::new(core_count))),
            memory: Arc::new(Mutex::new(memory)),
            tick: Arc::new(AtomicU64::new(0)),
            workers_running: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            batch_running: Arc::new(AtomicBool::new(false)),
            batch_thread: Mutex::new(None),
        })
    }

    pub fn tick_count(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    pub fn memory(&self) -> Arc<Mutex<MemoryManager>> {
        Arc::clone(&self.memory)
    }

    /// Spawn the `C` worker threads (spec §4.4, §5). Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.workers_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let core_count = self.config.lock().core_count;
        let mut handles = self.workers.lock();
        for core in 0..core_count {
            let me = Arc::clone(self);
            handles.push(std::thread::spawn(move || me.worker_loop(core)));
        }
        info!(cores = core_count, "scheduler started");
    }

    /// Signal workers to exit and join them (spec §5 "Cancellation").
    /// Always safe to call, including when not running.
    ///
    /// This is "scheduler teardown" in spec §3's process lifecycle: finished
    /// processes retain their final state (and page tables, for
    /// introspection via `process-smi`/`vmstat`) up to this point, and have
    /// their memory released here, not at the moment each one completed.
    ///
    /// Any process still occupying a running slot (including one paused
    /// mid-sleep) is released back to the ready queue so a later `start()`
    /// resumes it (spec §5, §8 testable property 6: no process keeps
    /// `assignedCore >= 0` once `stop()` returns).
    pub fn stop(&self) {
        if !self.workers_running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for h in handles {
            let _ = h.join();
        }

        let mut state = self.state.lock();
        let slots = std::mem::replace(&mut state.running, vec![None; state.running.len()]);
        for pid in slots.into_iter().flatten() {
            if let Some(handle) = state.registry.get(&pid) {
                let mut proc = handle.lock();
                proc.clear_core();
                if !proc.is_terminal() {
                    drop(proc);
                    state.ready.push_back(pid);
                }
            }
        }

        let finished_names: Vec<String> = state
            .finished
            .iter()
            .filter_map(|pid| state.registry.get(pid))
            .map(|handle| handle.lock().name.clone())
            .collect();
        drop(state);

        let mut memory = self.memory.lock();
        for name in finished_names {
            memory.deallocate(&name);
        }
        drop(memory);

        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.workers_running.load(Ordering::SeqCst)
    }

    /// Enable the batch-spawner thread (the `scheduler-start` command,
    /// spec §4.4/§6 — distinct from the worker pool's own `start`/`stop`).
    pub fn enable_batch(self: &Arc<Self>) {
        if self.batch_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let me = Arc::clone(self);
        *self.batch_thread.lock() = Some(std::thread::spawn(move || me.batch_loop()));
        info!("batch spawner enabled");
    }

    pub fn disable_batch(&self) {
        if !self.batch_running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(h) = self.batch_thread.lock().take() {
            let _ = h.join();
        }
        info!("batch spawner disabled");
    }

    pub fn is_batch_enabled(&self) -> bool {
        self.batch_running.load(Ordering::SeqCst)
    }

    /// Create a process, reserving its address space first (spec §3
    /// "Lifecycles"). Fails without creating a record if the allocation is
    /// rejected or the name is already live.
    pub fn submit(
        &self,
        name: &str,
        bytes: usize,
        program: Vec<Instruction>,
    ) -> Result<u64, ProcessError> {
        {
            let state = self.state.lock();
            if state.by_name.contains_key(name) {
                return Err(ProcessError::NameInUse(name.to_string()));
            }
        }

        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            id
        };

        self.memory.lock().allocate(name, bytes, id as u32)?;

        let process = Process::new(id, name.to_string(), program, Local::now());
        let handle = Arc::new(Mutex::new(process));

        let mut state = self.state.lock();
        state.registry.insert(id, handle);
        state.by_name.insert(name.to_string(), id);
        state.ready.push_back(id);
        info!(process = name, id, "process created");
        Ok(id)
    }

    pub fn process_handle(&self, name: &str) -> Option<Arc<Mutex<Process>>> {
        let state = self.state.lock();
        let id = *state.by_name.get(name)?;
        state.registry.get(&id).cloned()
    }

    /// Consistent snapshot of all known processes (spec §4.5).
    pub fn snapshot(&self) -> Vec<ProcessSummary> {
        let state = self.state.lock();
        let mut ids: Vec<u64> = state.registry.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .map(|id| {
                let handle = &state.registry[&id];
                let proc = handle.lock();
                ProcessSummary {
                    id,
                    name: proc.name.clone(),
                    core: proc.assigned_core,
                    current_line: proc.current_line,
                    total_lines: proc.total_lines,
                    terminal: proc.terminal,
                }
            })
            .collect()
    }

    fn worker_loop(self: Arc<Self>, core: usize) {
        debug!(core, "worker started");
        let tick_period = self.config.lock().tick_period;
        while self.workers_running.load(Ordering::SeqCst) {
            std::thread::sleep(tick_period);
            if !self.workers_running.load(Ordering::SeqCst) {
                break;
            }
            self.tick.fetch_add(1, Ordering::Relaxed);

            let pid = {
                let mut state = self.state.lock();
                if state.running[core].is_none() {
                    if let Some(next) = state.ready.pop_front() {
                        if let Some(handle) = state.registry.get(&next) {
                            handle.lock().assigned_core = Some(core);
                        }
                        state.running[core] = Some(next);
                    }
                }
                state.running[core]
            };

            let Some(pid) = pid else { continue };
            self.run_one_tick(core, pid);
        }
        debug!(core, "worker stopped");
    }

    /// Advance `pid` by one tick. Each lock (scheduler state, memory,
    /// process) is taken and released on its own — never two at once — so
    /// the acquisition order scheduler → memory → process from spec §5
    /// holds literally, not just "no two threads disagree" (spec §9 calls
    /// out exactly this reference bug: the process mutex taken inside the
    /// scheduler mutex in one place and outside it in another).
    fn run_one_tick(self: &Arc<Self>, core: usize, pid: u64) {
        let handle = {
            let state = self.state.lock();
            state.registry.get(&pid).cloned()
        };
        let Some(handle) = handle else { return };

        {
            let mut proc = handle.lock();
            if proc.is_sleeping() {
                proc.tick_sleep();
                return;
            }
            if proc.idle_remaining > 0 {
                proc.tick_idle();
                return;
            }
        }

        // READ/WRITE must be validated and faulted in *before* the
        // instruction executes (spec §4.4 step 3). `name` is cloned so the
        // memory calls below never need the process lock held alongside.
        let (name, mem_addr) = {
            let proc = handle.lock();
            let addr = match proc.peek_next() {
                Some(Instruction::Read { addr, .. }) => Some(*addr),
                Some(Instruction::Write { addr, .. }) => Some(*addr),
                _ => None,
            };
            (proc.name.clone(), addr)
        };

        let mut resolved_page = None;
        if let Some(addr) = mem_addr {
            let page = self.memory.lock().translate(&name, addr);
            match page {
                Err(_) => {
                    handle.lock().mark_access_violation();
                    self.finish(core, pid, Some(TerminalReason::AccessViolation));
                    return;
                }
                Ok(page) => {
                    self.memory.lock().access_page(&name, page);
                    resolved_page = Some(page);
                }
            }
        }

        let touch = {
            let mut proc = handle.lock();
            let touch = proc.step();
            let delay = self.config.lock().delay_per_exec;
            if delay > 0 {
                proc.idle_remaining = delay;
            }
            touch
        };

        let payload = match touch {
            Some(MemoryTouch::Read { addr, var }) => {
                let page = resolved_page.expect("page resolved before step for READ");
                let value = self.memory.lock().read_page(&name, page);
                handle.lock().complete_read(&var, value);
                format!("READ {var} 0x{addr:X}")
            }
            Some(MemoryTouch::Write { addr, value_expr }) => {
                let page = resolved_page.expect("page resolved before step for WRITE");
                let value = handle.lock().eval(&value_expr);
                self.memory.lock().write_page(&name, page, value);
                format!("WRITE 0x{addr:X} {value}")
            }
            _ => handle.lock().last_rendered_payload().unwrap_or_default(),
        };

        let log_line = format!("{payload} from {name}");
        let (is_terminal, should_preempt, reason) = {
            let mut proc = handle.lock();
            proc.push_log(core, log_line);

            let is_terminal = proc.is_terminal();
            let policy = self.config.lock().policy;
            if !is_terminal && policy == Policy::Rr {
                proc.quantum_used += 1;
            }
            let quantum_cycles = self.config.lock().quantum_cycles;
            let should_preempt =
                !is_terminal && policy == Policy::Rr && proc.quantum_used >= quantum_cycles;
            (is_terminal, should_preempt, proc.terminal)
        };

        if is_terminal {
            self.finish(core, pid, reason);
        } else if should_preempt {
            {
                let mut proc = handle.lock();
                proc.quantum_used = 0;
                proc.clear_core();
            }
            let mut state = self.state.lock();
            state.running[core] = None;
            state.ready.push_back(pid);
        }
    }

    /// Move a process from its running slot to the finished list. Its
    /// memory is *not* released here — spec §3 "Lifecycles" keeps a
    /// finished process's final state (including its page table) available
    /// for introspection until scheduler teardown (see [`Self::stop`]).
    fn finish(&self, core: usize, pid: u64, _reason: Option<TerminalReason>) {
        let mut state = self.state.lock();
        state.running[core] = None;
        state.finished.push(pid);
        if let Some(handle) = state.registry.get(&pid) {
            handle.lock().clear_core();
        }
    }

    fn batch_loop(self: Arc<Self>) {
        let mut rng = rand::thread_rng();
        let mut counter: u64 = 0;
        loop {
            if !self.batch_running.load(Ordering::SeqCst) {
                break;
            }
            let freq = self.config.lock().batch_process_freq as u64;
            let tick_period = self.config.lock().tick_period;
            std::thread::sleep(tick_period);
            counter += 1;
            if counter % freq != 0 {
                continue;
            }
            let (min_ins, max_ins) = {
                let cfg = self.config.lock();
                (cfg.min_instructions, cfg.max_instructions)
            };
            let program = testgen::random_program(&mut rng, min_ins, max_ins);
            let name = format!("auto-{}", self.tick.load(Ordering::Relaxed));
            let bytes = self.config.lock().mem_per_proc;
            match self.submit(&name, bytes, program) {
                Ok(id) => debug!(process = name, id, "batch process spawned"),
                Err(e) => warn!(error = %e, "batch spawn failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::parse_instruction_list;
    use std::time::Duration;

    fn tiny_scheduler(policy: Policy, core_count: usize, quantum: u32) -> Arc<Scheduler> {
        let memory = MemoryManager::new(1024, 64);
        let config = SchedulerConfig {
            core_count,
            policy,
            quantum_cycles: quantum,
            delay_per_exec: 0,
            tick_period: Duration::from_millis(5),
            batch_process_freq: 1,
            min_instructions: 1,
            max_instructions: 1,
            mem_per_proc: 64,
        };
        Scheduler::new(config, memory)
    }

    #[test]
    fn submit_rejects_duplicate_names() {
        let sched = tiny_scheduler(Policy::Fcfs, 1, 4);
        let prog = parse_instruction_list("PRINT(\"hi\")").unwrap();
        sched.submit("P1", 64, prog.clone()).unwrap();
        assert!(matches!(
            sched.submit("P1", 64, prog),
            Err(ProcessError::NameInUse(_))
        ));
    }

    #[test]
    fn scenario_1_end_to_end() {
        let sched = tiny_scheduler(Policy::Fcfs, 1, 4);
        let prog =
            parse_instruction_list("DECLARE(x,5);ADD(x,x,10);SUBTRACT(x,x,3);PRINT(\"v=\" + x)")
                .unwrap();
        sched.submit("P1", 64, prog).unwrap();
        sched.start();
        let handle = sched.process_handle("P1").unwrap();
        for _ in 0..200 {
            if handle.lock().is_terminal() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        sched.stop();
        let proc = handle.lock();
        assert!(proc.is_terminal());
        assert_eq!(proc.current_line, 4);
        assert_eq!(proc.vars().get("x"), 12);
        let last_log = proc.logs().next_back().unwrap();
        assert_eq!(last_log.text, "v=12 from P1");
    }

    #[test]
    fn stop_clears_all_running_slots() {
        let sched = tiny_scheduler(Policy::Rr, 2, 2);
        let prog = parse_instruction_list(
            "PRINT(\"a\");PRINT(\"a\");PRINT(\"a\");PRINT(\"a\");PRINT(\"a\");PRINT(\"a\");PRINT(\"a\");PRINT(\"a\")",
        )
        .unwrap();
        sched.submit("P1", 64, prog.clone()).unwrap();
        sched.submit("P2", 64, prog).unwrap();
        sched.start();
        std::thread::sleep(Duration::from_millis(50));
        sched.stop();
        for summary in sched.snapshot() {
            assert!(summary.core.is_none());
        }
    }
}
