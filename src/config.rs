//! Configuration file loading (spec §6 "Configuration file").
//!
//! The format is a small bespoke `key value` grammar, one pair per line,
//! values optionally double-quoted — not TOML/YAML, matching the shape of
//! the original `config.h` struct it replaces (SPEC_FULL.md §A.3). An
//! unknown key or an out-of-range value fails the whole load; no partial
//! configuration is ever returned (spec §7).

use std::path::Path;

use tracing::info;

use crate::error::ConfigError;
use crate::scheduler::{Policy, SchedulerConfig};

/// Fully validated system configuration (spec §6 table).
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub num_cpu: usize,
    pub scheduler: Policy,
    pub quantum_cycles: u32,
    pub batch_process_freq: u32,
    pub min_instructions: u32,
    pub max_instructions: u32,
    pub delay_per_exec: u32,
    pub max_overall_mem: usize,
    pub mem_per_frame: usize,
    pub mem_per_proc: usize,
}

impl SystemConfig {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            core_count: self.num_cpu,
            policy: self.scheduler,
            quantum_cycles: self.quantum_cycles,
            delay_per_exec: self.delay_per_exec,
            tick_period: std::time::Duration::from_millis(150),
            batch_process_freq: self.batch_process_freq,
            min_instructions: self.min_instructions,
            max_instructions: self.max_instructions,
            mem_per_proc: self.mem_per_proc,
        }
    }
}

/// Load and validate a configuration file from `path` (spec §6).
pub fn load(path: &Path) -> Result<SystemConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse(&text)
}

/// Parse configuration text directly (used by tests and by [`load`]).
pub fn parse(text: &str) -> Result<SystemConfig, ConfigError> {
    let mut raw: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        if key.is_empty() {
            continue;
        }
        let value = unquote(value);
        raw.insert(key.to_string(), value);
    }

    let num_cpu = parse_ranged(&raw, "num-cpu", 1, 128)?;
    let scheduler = parse_policy(&raw)?;
    let quantum_cycles = parse_ranged_u32(&raw, "quantum-cycles", 1, u32::MAX)?;
    let batch_process_freq = parse_ranged_u32(&raw, "batch-process-freq", 1, u32::MAX)?;
    let min_instructions = parse_ranged_u32(&raw, "min-ins", 1, u32::MAX)?;
    let max_instructions = parse_ranged_u32(&raw, "max-ins", 1, u32::MAX)?;
    if min_instructions > max_instructions {
        return Err(ConfigError::InvalidValue {
            key: "max-ins".to_string(),
            value: max_instructions.to_string(),
            reason: "max-ins must be >= min-ins".to_string(),
        });
    }
    let delay_per_exec = parse_ranged_u32(&raw, "delay-per-exec", 0, u32::MAX)?;
    let max_overall_mem = parse_power_of_two(&raw, "max-overall-mem")?;
    let mem_per_frame = parse_power_of_two(&raw, "mem-per-frame")?;
    if max_overall_mem % mem_per_frame != 0 {
        return Err(ConfigError::InvalidValue {
            key: "mem-per-frame".to_string(),
            value: mem_per_frame.to_string(),
            reason: "must evenly divide max-overall-mem".to_string(),
        });
    }
    let mem_per_proc = parse_power_of_two_ranged(&raw, "mem-per-proc", 64, 65536)?;

    for key in raw.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            return Err(ConfigError::UnknownKey(key.clone()));
        }
    }

    info!(
        num_cpu,
        ?scheduler,
        max_overall_mem,
        mem_per_frame,
        "configuration loaded"
    );

    Ok(SystemConfig {
        num_cpu,
        scheduler,
        quantum_cycles,
        batch_process_freq,
        min_instructions,
        max_instructions,
        delay_per_exec,
        max_overall_mem,
        mem_per_frame,
        mem_per_proc,
    })
}

const KNOWN_KEYS: &[&str] = &[
    "num-cpu",
    "scheduler",
    "quantum-cycles",
    "batch-process-freq",
    "min-ins",
    "max-ins",
    "delay-per-exec",
    "max-overall-mem",
    "mem-per-frame",
    "mem-per-proc",
];

fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

fn required<'a>(raw: &'a std::collections::HashMap<String, String>, key: &'static str) -> Result<&'a str, ConfigError> {
    raw.get(key)
        .map(String::as_str)
        .ok_or(ConfigError::MissingKey(key))
}

fn parse_ranged(
    raw: &std::collections::HashMap<String, String>,
    key: &'static str,
    min: usize,
    max: usize,
) -> Result<usize, ConfigError> {
    let value = required(raw, key)?;
    let parsed: usize = value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })?;
    if !(min..=max).contains(&parsed) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: format!("must be in [{min}, {max}]"),
        });
    }
    Ok(parsed)
}

fn parse_ranged_u32(
    raw: &std::collections::HashMap<String, String>,
    key: &'static str,
    min: u32,
    max: u32,
) -> Result<u32, ConfigError> {
    let value = required(raw, key)?;
    let parsed: u32 = value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })?;
    if !(min..=max).contains(&parsed) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: format!("must be in [{min}, {max}]"),
        });
    }
    Ok(parsed)
}

fn parse_policy(raw: &std::collections::HashMap<String, String>) -> Result<Policy, ConfigError> {
    let value = required(raw, "scheduler")?;
    match value {
        "fcfs" => Ok(Policy::Fcfs),
        "rr" => Ok(Policy::Rr),
        other => Err(ConfigError::InvalidValue {
            key: "scheduler".to_string(),
            value: other.to_string(),
            reason: "expected \"fcfs\" or \"rr\"".to_string(),
        }),
    }
}

fn parse_power_of_two(
    raw: &std::collections::HashMap<String, String>,
    key: &'static str,
) -> Result<usize, ConfigError> {
    let value = required(raw, key)?;
    let parsed: usize = value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })?;
    if parsed == 0 || !parsed.is_power_of_two() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be a power of two".to_string(),
        });
    }
    Ok(parsed)
}

fn parse_power_of_two_ranged(
    raw: &std::collections::HashMap<String, String>,
    key: &'static str,
    min: usize,
    max: usize,
) -> Result<usize, ConfigError> {
    let parsed = parse_power_of_two(raw, key)?;
    if !(min..=max).contains(&parsed) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: parsed.to_string(),
            reason: format!("must be in [{min}, {max}]"),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
num-cpu 4
scheduler "rr"
quantum-cycles 4
batch-process-freq 1
min-ins 100
max-ins 100
delay-per-exec 0
max-overall-mem 16384
mem-per-frame 16
mem-per-proc 4096
"#;

    #[test]
    fn parses_a_valid_config() {
        let cfg = parse(VALID).unwrap();
        assert_eq!(cfg.num_cpu, 4);
        assert_eq!(cfg.scheduler, Policy::Rr);
        assert_eq!(cfg.max_overall_mem, 16384);
    }

    #[test]
    fn rejects_unknown_key() {
        let text = format!("{VALID}\nfoo-bar 1\n");
        assert!(matches!(parse(&text), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn rejects_out_of_range_num_cpu() {
        let text = VALID.replace("num-cpu 4", "num-cpu 0");
        assert!(matches!(
            parse(&text),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_non_power_of_two_memory() {
        let text = VALID.replace("max-overall-mem 16384", "max-overall-mem 10000");
        assert!(matches!(
            parse(&text),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_frame_size_not_dividing_total() {
        let text = VALID.replace("mem-per-frame 16", "mem-per-frame 3072");
        assert!(matches!(
            parse(&text),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let text = VALID
            .replace("min-ins 100", "min-ins 200")
            .replace("max-ins 100", "max-ins 100");
        assert!(matches!(
            parse(&text),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_missing_key() {
        let text = VALID.replace("num-cpu 4\n", "");
        assert!(matches!(parse(&text), Err(ConfigError::MissingKey(_))));
    }
}
