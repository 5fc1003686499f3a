//! Process records: instruction cursor, loop-frame stack, per-process
//! variables, sleep state, and the bounded log ring.

use std::collections::VecDeque;

use chrono::{DateTime, Local};

use crate::instruction::{leaf_count, Instruction};
use crate::vars::VariableStore;

/// Maximum number of recent log lines a process retains.
pub const LOG_CAPACITY: usize = 10;

/// Why a process stopped ticking for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    Completed,
    AccessViolation,
}

/// Execution position inside a (possibly `FOR`-nested) instruction tree.
///
/// `path` is non-empty while the process still has work: `path[0]` indexes
/// the top-level instruction list, and each further entry indexes one level
/// deeper into a `FOR` body currently being iterated. `loop_counts` holds
/// the remaining-iterations (inclusive of the iteration in progress) for
/// each nesting level below the top, so `loop_counts.len() == path.len() -
/// 1`. This run-time loop-frame stack avoids expanding `FOR` bodies into a
/// flat instruction list ahead of time, which blows up exponentially for
/// nested loops with large repeat counts.
#[derive(Debug, Clone, Default)]
struct Cursor {
    path: Vec<usize>,
    loop_counts: Vec<u32>,
}

impl Cursor {
    fn start(top_len: usize) -> Self {
        if top_len == 0 {
            Self::default()
        } else {
            Self {
                path: vec![0],
                loop_counts: Vec::new(),
            }
        }
    }

    fn is_terminal(&self) -> bool {
        self.path.is_empty()
    }

    fn slice_len_at_depth<'a>(top: &'a [Instruction], path: &[usize], depth: usize) -> usize {
        let mut slice = top;
        for &idx in &path[..depth] {
            match &slice[idx] {
                Instruction::For { body, .. } => slice = body,
                _ => unreachable!("path depth above a non-FOR instruction"),
            }
        }
        slice.len()
    }

    fn node<'a>(&self, top: &'a [Instruction]) -> Option<&'a Instruction> {
        if self.path.is_empty() {
            return None;
        }
        let mut slice = top;
        for &idx in &self.path[..self.path.len() - 1] {
            match &slice[idx] {
                Instruction::For { body, .. } => slice = body,
                _ => unreachable!("path depth above a non-FOR instruction"),
            }
        }
        slice.get(*self.path.last().unwrap())
    }

    fn enter_loop(&mut self, repeats: u32) {
        self.loop_counts.push(repeats);
        self.path.push(0);
    }

    /// Move past the instruction just executed, repeating or unwinding
    /// loop frames as needed.
    fn advance(&mut self, top: &[Instruction]) {
        loop {
            *self.path.last_mut().unwrap() += 1;
            let depth = self.path.len() - 1;
            let len = Self::slice_len_at_depth(top, &self.path, depth);
            if *self.path.last().unwrap() < len {
                return;
            }
            if self.path.len() == 1 {
                self.path.clear();
                return;
            }
            self.path.pop();
            let remaining = self.loop_counts.last_mut().unwrap();
            *remaining -= 1;
            if *remaining > 0 {
                self.path.push(0);
                return;
            }
            self.loop_counts.pop();
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub core: usize,
    pub text: String,
}

/// Outcome of ticking a process's memory-touching instruction, surfaced to
/// the scheduler so it can fault pages in via the memory manager.
pub enum MemoryTouch {
    None,
    Read { addr: u32, var: String },
    Write { addr: u32, value_expr: String },
}

pub struct Process {
    pub id: u64,
    pub name: String,
    pub created_at: DateTime<Local>,
    pub assigned_core: Option<usize>,
    pub sleep_ticks: u16,
    pub total_lines: u64,
    pub current_line: u64,
    pub terminal: Option<TerminalReason>,
    pub quantum_used: u32,
    /// Remaining idle ticks imposed by `delayPerExec` between two
    /// instructions of this process; the pc does not advance while this is
    /// nonzero.
    pub idle_remaining: u32,

    top: Vec<Instruction>,
    cursor: Cursor,
    vars: VariableStore,
    logs: VecDeque<LogLine>,
    last_executed: Option<Instruction>,
}

impl Process {
    pub fn new(id: u64, name: String, program: Vec<Instruction>, created_at: DateTime<Local>) -> Self {
        let total_lines = leaf_count(&program);
        let cursor = Cursor::start(program.len());
        let terminal = if cursor.is_terminal() {
            Some(TerminalReason::Completed)
        } else {
            None
        };
        Self {
            id,
            name,
            created_at,
            assigned_core: None,
            sleep_ticks: 0,
            total_lines,
            current_line: 0,
            terminal,
            quantum_used: 0,
            idle_remaining: 0,
            top: program,
            cursor,
            vars: VariableStore::new(),
            logs: VecDeque::with_capacity(LOG_CAPACITY),
            last_executed: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleep_ticks > 0
    }

    pub fn vars(&self) -> &VariableStore {
        &self.vars
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogLine> {
        self.logs.iter()
    }

    pub fn push_log(&mut self, core: usize, text: String) {
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(LogLine {
            timestamp: Local::now(),
            core,
            text,
        });
    }

    /// Decrement the sleep countdown by one tick; returns `true` once it
    /// reaches zero this call.
    pub fn tick_sleep(&mut self) -> bool {
        self.sleep_ticks -= 1;
        self.sleep_ticks == 0
    }

    pub fn mark_access_violation(&mut self) {
        self.terminal = Some(TerminalReason::AccessViolation);
        self.assigned_core = None;
    }

    pub fn clear_core(&mut self) {
        self.assigned_core = None;
    }

    /// Decrement the inter-instruction idle counter; returns `true` once
    /// it reaches zero (the process may execute its next instruction).
    pub fn tick_idle(&mut self) -> bool {
        self.idle_remaining -= 1;
        self.idle_remaining == 0
    }

    /// Resolve the next leaf instruction to execute, descending through any
    /// `FOR` headers on the way, without mutating the cursor. Used by the
    /// scheduler to classify
    /// memory-touching instructions before faulting a page in.
    pub fn peek_next(&self) -> Option<&Instruction> {
        let mut cursor = self.cursor.clone();
        loop {
            match cursor.node(&self.top) {
                Some(Instruction::For { repeats, .. }) => {
                    let repeats = *repeats;
                    cursor.enter_loop(repeats);
                }
                other => return other,
            }
        }
    }

    /// Execute exactly one leaf instruction. Applies DECLARE/ADD/SUBTRACT/
    /// SLEEP immediately; returns the memory-touching intent for
    /// READ/WRITE/PRINT so the caller can consult the memory manager and
    /// render substituted log text under the right lock order
    /// (scheduler -> memory -> process).
    pub fn step(&mut self) -> Option<MemoryTouch> {
        // Descend through FOR headers in place first.
        loop {
            match self.cursor.node(&self.top) {
                Some(Instruction::For { repeats, .. }) => {
                    let repeats = *repeats;
                    self.cursor.enter_loop(repeats);
                }
                Some(_) => break,
                None => {
                    self.terminal = Some(TerminalReason::Completed);
                    return None;
                }
            }
        }

        let instr = self.cursor.node(&self.top).unwrap().clone();
        self.last_executed = Some(instr.clone());
        let touch = match instr {
            Instruction::Declare { var, expr } => {
                let v = self.vars.eval(&expr);
                self.vars.set(&var, v);
                MemoryTouch::None
            }
            Instruction::Add { dst, a, b } => {
                let sum = self.vars.eval(&a) as i64 + self.vars.eval(&b) as i64;
                self.vars.set(&dst, crate::vars::clamp16(sum));
                MemoryTouch::None
            }
            Instruction::Subtract { dst, a, b } => {
                let diff = self.vars.eval(&a) as i64 - self.vars.eval(&b) as i64;
                self.vars.set(&dst, crate::vars::clamp16(diff.max(0)));
                MemoryTouch::None
            }
            Instruction::Sleep { ticks } => {
                self.sleep_ticks = ticks;
                MemoryTouch::None
            }
            Instruction::Print { .. } => MemoryTouch::None,
            Instruction::Read { var, addr } => MemoryTouch::Read { addr, var },
            Instruction::Write { addr, value } => MemoryTouch::Write {
                addr,
                value_expr: value,
            },
            Instruction::For { .. } => unreachable!("FOR headers are descended above"),
        };

        self.current_line += 1;
        self.cursor.advance(&self.top);
        if self.cursor.is_terminal() && self.terminal.is_none() {
            self.terminal = Some(TerminalReason::Completed);
        }
        Some(touch)
    }

    /// Render the variable-substituted payload text for the instruction
    /// just executed by [`Self::step`]. For `READ`/`WRITE`, the caller fills
    /// in the resolved
    /// address/value once the memory manager has handled the touch.
    pub fn last_rendered_payload(&self) -> Option<String> {
        self.last_executed.as_ref().map(|instr| match instr {
            Instruction::Print { literal, var: None } => literal.clone(),
            Instruction::Print {
                literal,
                var: Some(v),
            } => format!("{literal}{}", self.vars.get(v)),
            other => other.render(),
        })
    }

    /// Finish applying a READ after the memory manager has resolved its
    /// value (called by the scheduler once it has faulted the page in).
    pub fn complete_read(&mut self, var: &str, value: u16) {
        self.vars.set(var, value);
    }

    pub fn eval(&self, token: &str) -> u16 {
        self.vars.eval(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::parse_instruction_list;

    fn process(src: &str) -> Process {
        let program = parse_instruction_list(src).unwrap();
        Process::new(1, "P1".to_string(), program, Local::now())
    }

    #[test]
    fn scenario_1_straight_line_program() {
        let mut p = process("DECLARE(x,5);ADD(x,x,10);SUBTRACT(x,x,3);PRINT(\"v=\" + x)");
        while !p.is_terminal() {
            p.step();
        }
        assert_eq!(p.vars().get("x"), 12);
        assert_eq!(p.current_line, 4);
        assert_eq!(p.total_lines, 4);
        assert!(p.is_terminal());
    }

    #[test]
    fn scenario_4_nested_for_expands_correctly() {
        let mut p = process("FOR([DECLARE(x,0) @@ ADD(x,x,1)], 3)");
        assert_eq!(p.total_lines, 6);
        while !p.is_terminal() {
            p.step();
        }
        assert_eq!(p.vars().get("x"), 3);
        assert_eq!(p.current_line, 6);
    }

    #[test]
    fn subtract_floors_at_zero() {
        let mut p = process("DECLARE(v,3);SUBTRACT(v,v,10)");
        while !p.is_terminal() {
            p.step();
        }
        assert_eq!(p.vars().get("v"), 0);
    }

    #[test]
    fn add_saturates() {
        let mut p = process("DECLARE(v,65530);ADD(v,v,10)");
        while !p.is_terminal() {
            p.step();
        }
        assert_eq!(p.vars().get("v"), 65535);
    }

    #[test]
    fn read_instruction_surfaces_as_memory_touch() {
        let mut p = process("READ v 0x10");
        let touch = p.step().unwrap();
        assert!(matches!(touch, MemoryTouch::Read { addr: 0x10, .. }));
    }

    #[test]
    fn empty_program_is_immediately_terminal() {
        let p = Process::new(1, "P1".to_string(), vec![], Local::now());
        assert!(p.is_terminal());
        assert_eq!(p.total_lines, 0);
    }

    #[test]
    fn log_ring_caps_at_ten() {
        let mut p = process("PRINT(\"hi\")");
        for i in 0..15 {
            p.push_log(0, format!("line {i}"));
        }
        assert_eq!(p.logs().count(), LOG_CAPACITY);
        assert_eq!(p.logs().next().unwrap().text, "line 5");
    }
}
