//! End-to-end scenarios driving the public `System` handle, the way the
//! console REPL would (spec §8 "End-to-end scenarios").

use std::time::Duration;

use coresim::config;
use coresim::process::TerminalReason;
use coresim::System;
use tempfile::tempdir;

fn boot(config_text: &str) -> (System, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let backing = dir.path().join("backing.txt");
    let cfg = config::parse(config_text).unwrap();
    let system = System::from_config(cfg, &backing)
        .unwrap()
        .with_report_dir(dir.path().to_path_buf())
        .with_memory_stamp_dir(dir.path().to_path_buf());
    (system, dir)
}

fn wait_until_terminal(system: &System, name: &str, timeout: Duration) -> bool {
    // Use the scheduler directly rather than `enter_process`, which refuses
    // already-terminal processes and would race against a fast finish.
    let handle = system.scheduler().process_handle(name).unwrap();
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if handle.lock().is_terminal() {
            return true;
        }
        if std::time::Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

const FCFS_CONFIG: &str = r#"
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
"#;

#[test]
fn scenario_1_straight_line_program() {
    let (system, _dir) = boot(FCFS_CONFIG);
    system
        .create_with_program_text(
            "P1",
            64,
            "DECLARE(x, 5);ADD(x, x, 10);SUBTRACT(x, x, 3);PRINT(\"v=\" + x)",
        )
        .unwrap();

    assert!(wait_until_terminal(&system, "P1", Duration::from_secs(2)));

    // enter_process refuses terminal processes; inspect via the snapshot.
    assert!(system.enter_process("P1").is_err());

    let summaries = system.list_processes();
    let p1 = summaries.iter().find(|p| p.name == "P1").unwrap();
    assert_eq!(p1.current_line, 4);
    assert_eq!(p1.total_lines, 4);
    assert!(p1.terminal.is_some());

    system.shutdown();
}

#[test]
fn scenario_2_round_robin_rotates_and_finishes_both() {
    let config_text = FCFS_CONFIG
        .replace("scheduler \"fcfs\"", "scheduler \"rr\"")
        .replace("num-cpu 1", "num-cpu 2")
        .replace("quantum-cycles 4", "quantum-cycles 2");
    let (system, _dir) = boot(&config_text);

    let eight_prints = (0..8).map(|_| "PRINT(\"hi\")").collect::<Vec<_>>().join(";");
    system.create_with_program_text("P1", 64, &eight_prints).unwrap();
    system.create_with_program_text("P2", 64, &eight_prints).unwrap();

    assert!(wait_until_terminal(&system, "P1", Duration::from_secs(3)));
    assert!(wait_until_terminal(&system, "P2", Duration::from_secs(3)));

    let summaries = system.list_processes();
    for p in &summaries {
        assert!(p.core.is_none(), "finished processes release their core");
        assert_eq!(p.current_line, 8);
    }
    system.shutdown();
}

#[test]
fn scenario_5_access_violation_marks_process_finished_with_error() {
    let (system, _dir) = boot(FCFS_CONFIG);
    // 128-byte process at base 0; 0x200 is well outside [0, 128).
    system
        .create_with_program_text("P1", 128, "READ v 0x200")
        .unwrap();

    assert!(wait_until_terminal(&system, "P1", Duration::from_secs(2)));

    let summaries = system.list_processes();
    let p1 = summaries.iter().find(|p| p.name == "P1").unwrap();
    assert_eq!(p1.terminal, Some(TerminalReason::AccessViolation));
    assert!(system.enter_process("P1").is_err());
    system.shutdown();
}

#[test]
fn scenario_6_stop_then_restart_is_safe() {
    let config_text = FCFS_CONFIG.replace("num-cpu 1", "num-cpu 2");
    let (system, _dir) = boot(&config_text);

    let long_program = (0..50).map(|_| "SLEEP(5)").collect::<Vec<_>>().join(";");
    system.create_with_program_text("P1", 64, &long_program).unwrap();
    system.create_with_program_text("P2", 64, &long_program).unwrap();

    std::thread::sleep(Duration::from_millis(50));
    system.shutdown();

    for summary in system.list_processes() {
        assert!(summary.core.is_none());
    }

    // restart is safe and resumes scheduling of still-ready processes.
    system.scheduler().start();
    std::thread::sleep(Duration::from_millis(50));
    system.shutdown();
}

#[test]
fn report_util_writes_running_and_finished_sections() {
    let (system, _dir) = boot(FCFS_CONFIG);
    system
        .create_with_program_text("P1", 64, "PRINT(\"hi\")")
        .unwrap();
    assert!(wait_until_terminal(&system, "P1", Duration::from_secs(2)));

    let path = system.write_report("report.txt").unwrap();
    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.contains("Running processes:"));
    assert!(text.contains("Finished processes:"));
    assert!(text.contains("P1"));
    system.shutdown();
}

#[test]
fn memory_stamp_reports_fragmentation_and_region_map() {
    let (system, _dir) = boot(FCFS_CONFIG);
    system
        .create_with_program_text("P1", 64, "PRINT(\"hi\")")
        .unwrap();
    let path = system.write_memory_stamp().unwrap();
    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.contains("----end---- = 1024"));
    assert!(text.contains("----start---- = 0"));
    system.shutdown();
}

#[test]
fn invalid_config_leaves_no_system_initialized() {
    let bad = FCFS_CONFIG.replace("num-cpu 1", "num-cpu 0");
    let dir = tempdir().unwrap();
    let err = config::parse(&bad);
    assert!(err.is_err());
    drop(dir);
}
