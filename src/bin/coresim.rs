//! coresim - interactive teaching emulator for a tiny multi-core OS.
//!
//! Usage: coresim [--config PATH] [--backing-store PATH] [--report-dir PATH]

use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Ctrl-C only needs to stop the process promptly; scheduler teardown
    // inside the REPL's own `exit` path is the clean shutdown route (spec
    // §5 "exit from the REPL performs stop() and tears down").
    ctrlc::set_handler(|| {
        eprintln!("\ninterrupted");
        std::process::exit(130);
    })
    .expect("failed to install Ctrl-C handler");

    let mut config_path = PathBuf::from("config.txt");
    let mut backing_store_path = PathBuf::from("csopesy-backing-store.txt");
    let mut report_dir = PathBuf::from(".");

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if let Some(v) = args.get(i) {
                    config_path = PathBuf::from(v);
                }
            }
            "--backing-store" => {
                i += 1;
                if let Some(v) = args.get(i) {
                    backing_store_path = PathBuf::from(v);
                }
            }
            "--report-dir" => {
                i += 1;
                if let Some(v) = args.get(i) {
                    report_dir = PathBuf::from(v);
                }
            }
            "-h" | "--help" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            other => {
                eprintln!("unknown option: {other}");
                print_usage();
                return ExitCode::from(1);
            }
        }
        i += 1;
    }

    let mut repl = coresim::repl::Repl::new(config_path, backing_store_path, report_dir);
    match repl.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::from(1)
        }
    }
}

fn print_usage() {
    eprintln!(
        "coresim [--config PATH] [--backing-store PATH] [--report-dir PATH]\n\
         \n\
         Console commands once running: initialize, screen -s/-c/-r/-ls,\n\
         scheduler-start, scheduler-stop, process-smi, vmstat, report-util,\n\
         clear, exit."
    );
}
