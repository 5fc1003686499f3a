//! Interactive console (spec §1 "out of scope... any implementation is
//! acceptable", §6 "Console commands"). Modeled on the teacher crate's
//! `cli::shell::Shell` — a read-eval-print loop over whitespace-split
//! commands with a dedicated process view entered by `screen -r`/`-s`/`-c`.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use crate::instruction::MAX_INSTRUCTION_LIST;
use crate::system::System;

const BANNER: &str = r#"
  ____              ____  _
 / ___|___  _ __ ___/ ___|(_)_ __ ___
| |   / _ \| '__/ _ \___ \| | '_ ` _ \
| |__| (_) | | |  __/___) | | | | | | |
 \____\___/|_|  \___|____/|_|_| |_| |_|

Type 'initialize' to load a configuration, or 'exit' to quit.
"#;

pub struct Repl {
    system: Option<System>,
    config_path: PathBuf,
    backing_store_path: PathBuf,
    report_dir: PathBuf,
}

impl Repl {
    pub fn new(config_path: PathBuf, backing_store_path: PathBuf, report_dir: PathBuf) -> Self {
        Self {
            system: None,
            config_path,
            backing_store_path,
            report_dir,
        }
    }

    pub fn run(&mut self) -> io::Result<()> {
        println!("{BANNER}");
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("coresim> ");
            stdout.flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match self.execute(line) {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => eprintln!("error: {err:#}"),
            }
        }

        if let Some(system) = &self.system {
            system.shutdown();
        }
        Ok(())
    }

    /// Returns `Ok(true)` when the REPL should exit.
    fn execute(&mut self, line: &str) -> Result<bool> {
        if line == "exit" {
            return Ok(true);
        }
        if line == "clear" {
            print!("\x1B[2J\x1B[1;1H");
            println!("{BANNER}");
            return Ok(false);
        }
        if line == "initialize" {
            let system = System::initialize(&self.config_path, &self.backing_store_path)
                .context("initialize failed")?
                .with_report_dir(self.report_dir.clone())
                .with_memory_stamp_dir(self.report_dir.clone());
            self.system = Some(system);
            println!("system initialized from {}", self.config_path.display());
            return Ok(false);
        }

        let system = self
            .system
            .as_ref()
            .ok_or_else(|| anyhow!("system has not been initialized; run `initialize` first"))?;

        if let Some(rest) = line.strip_prefix("screen ") {
            return self.handle_screen(system, rest.trim()).map(|_| false);
        }
        match line {
            "scheduler-start" => {
                system.enable_batch_spawning();
                println!("batch spawning enabled");
            }
            "scheduler-stop" => {
                system.disable_batch_spawning();
                println!("batch spawning disabled");
            }
            "process-smi" => print!("{}", system.process_smi()),
            "vmstat" => print!("{}", system.vmstat()),
            "report-util" => {
                let path = system
                    .write_report("csopesy-report-util.txt")
                    .context("report-util failed")?;
                println!("report written to {}", path.display());
            }
            other => bail!("unknown command: {other:?}"),
        }
        Ok(false)
    }

    fn handle_screen(&mut self, system: &System, args: &str) -> Result<()> {
        if let Some(rest) = args.strip_prefix("-s ") {
            let (name, bytes) = parse_name_and_size(rest)?;
            system
                .create_with_default_program(&name, bytes)
                .context("screen -s failed")?;
            println!("process {name} created");
            let handle = system.enter_process(&name)?;
            run_process_view(&name, &handle);
            return Ok(());
        }
        if let Some(rest) = args.strip_prefix("-c ") {
            let (name, bytes, program_text) = parse_name_size_and_program(rest)?;
            system
                .create_with_program_text(&name, bytes, &program_text)
                .context("screen -c failed")?;
            println!("process {name} created");
            let handle = system.enter_process(&name)?;
            run_process_view(&name, &handle);
            return Ok(());
        }
        if let Some(name) = args.strip_prefix("-r ") {
            let name = name.trim();
            let handle = system.enter_process(name)?;
            run_process_view(name, &handle);
            return Ok(());
        }
        if args == "-ls" {
            print_process_list(system);
            return Ok(());
        }
        bail!("unrecognized screen subcommand: {args:?}")
    }
}

fn parse_name_and_size(rest: &str) -> Result<(String, usize)> {
    let mut parts = rest.split_whitespace();
    let name = parts
        .next()
        .ok_or_else(|| anyhow!("expected: screen -s <name> <bytes>"))?
        .to_string();
    let bytes: usize = parts
        .next()
        .ok_or_else(|| anyhow!("expected: screen -s <name> <bytes>"))?
        .parse()
        .context("bytes must be an integer")?;
    Ok((name, bytes))
}

fn parse_name_size_and_program(rest: &str) -> Result<(String, usize, String)> {
    let mut parts = rest.splitn(3, char::is_whitespace);
    let name = parts.next().ok_or_else(program_usage)?.to_string();
    let bytes_src = parts.next().ok_or_else(program_usage)?;
    let bytes: usize = bytes_src.parse().context("bytes must be an integer")?;
    let program_src = parts.next().ok_or_else(program_usage)?.trim();
    let program = program_src
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(program_usage)?;
    Ok((name, bytes, program.to_string()))
}

fn program_usage() -> anyhow::Error {
    anyhow!(
        "expected: screen -c <name> <bytes> \"i1;i2;...\" (1..={MAX_INSTRUCTION_LIST} instructions)"
    )
}

fn print_process_list(system: &System) {
    let summaries = system.list_processes();
    let (running, finished): (Vec<_>, Vec<_>) =
        summaries.into_iter().partition(|p| p.terminal.is_none());

    println!("Running processes:");
    for p in &running {
        let core = p
            .core
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} (id {})  core:{}  {}/{}",
            p.name, p.id, core, p.current_line, p.total_lines
        );
    }

    println!("\nFinished processes:");
    for p in &finished {
        let annotation = match p.terminal {
            Some(crate::process::TerminalReason::AccessViolation) => "  [AccessViolation]",
            _ => "",
        };
        println!(
            "  {} (id {})  {}/{}{}",
            p.name, p.id, p.current_line, p.total_lines, annotation
        );
    }
}

/// `screen -r <name>`-style dedicated view: print the process report, then
/// accept `process-smi`-style introspection commands until `exit`/`back`.
fn run_process_view(name: &str, handle: &std::sync::Arc<parking_lot::Mutex<crate::process::Process>>) {
    print_process_report(name, handle);
    let stdin = io::stdin();
    loop {
        print!("{name}> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        match line.trim() {
            "exit" | "back" => break,
            "process-smi" | "" => print_process_report(name, handle),
            other => println!("unknown command: {other:?} (try 'process-smi' or 'exit')"),
        }
    }
}

fn print_process_report(name: &str, handle: &std::sync::Arc<parking_lot::Mutex<crate::process::Process>>) {
    let proc = handle.lock();
    println!("process: {name}  (id {})", proc.id);
    println!("created: {}", proc.created_at.format("%m/%d/%Y %I:%M:%S%p"));
    println!(
        "core: {}  line {}/{}  terminal: {}",
        proc.assigned_core
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string()),
        proc.current_line,
        proc.total_lines,
        proc.is_terminal()
    );
    println!("log:");
    for entry in proc.logs() {
        println!(
            "  ({}) Core:{} \"{}\"",
            entry.timestamp.format("%m/%d/%Y %I:%M:%S%p"),
            entry.core,
            entry.text
        );
    }
}
