//! coresim — a teaching emulator for a tiny multi-core operating system.
//!
//! Three subsystems stay mutually consistent under concurrent execution:
//!
//! - [`instruction`]/[`process`]: a tiny interpreter for a toy instruction
//!   language (named variables, nested counted loops, cooperative sleep).
//! - [`scheduler`]: a pool of worker threads that tick ready processes
//!   under FCFS (run-to-completion) or Round-Robin (quantum preemption).
//! - [`memory`]: per-process paged address spaces backed by a fixed frame
//!   pool, demand paging with FIFO eviction, and a backing store.
//!
//! [`system::System`] wires the three together from a validated
//! [`config::SystemConfig`] and is the one long-lived handle a REPL (or any
//! other caller) should hold.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use coresim::System;
//!
//! let system = System::initialize(
//!     Path::new("config.txt"),
//!     Path::new("csopesy-backing-store.txt"),
//! )?;
//! system.create_with_default_program("process1", 64)?;
//! println!("{}", system.process_smi());
//! system.shutdown();
//! # Ok::<(), coresim::CoreError>(())
//! ```

pub mod config;
pub mod error;
pub mod instruction;
pub mod memory;
pub mod process;
pub mod repl;
pub mod scheduler;
pub mod system;
pub mod testgen;
pub mod vars;

pub use config::SystemConfig;
pub use error::{CoreError, CoreResult};
pub use memory::MemoryManager;
pub use process::Process;
pub use scheduler::{Policy, Scheduler, SchedulerConfig};
pub use system::System;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
