//! The toy instruction language: parsing (spec §4.1) and the static leaf
//! count used to seed a process's `total_lines`.

use crate::error::ParseError;

/// Maximum nesting depth for `FOR` bodies (spec §4.1).
pub const MAX_FOR_DEPTH: u32 = 3;

/// Maximum number of `;`-separated instructions accepted by `screen -c`
/// (spec §6).
pub const MAX_INSTRUCTION_LIST: usize = 50;

/// A parsed instruction. Nested `FOR` bodies are kept as a tree; the
/// process interpreter walks it with a loop-frame stack at run time
/// (spec §9) rather than expanding it ahead of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Declare { var: String, expr: String },
    Add { dst: String, a: String, b: String },
    Subtract { dst: String, a: String, b: String },
    Sleep { ticks: u8 },
    Print { literal: String, var: Option<String> },
    For { body: Vec<Instruction>, repeats: u32 },
    Read { var: String, addr: u32 },
    Write { addr: u32, value: String },
}

impl Instruction {
    /// Number of leaf instructions this instruction will execute across all
    /// loop iterations. A bare leaf is 1; a `FOR` is its body's leaf count
    /// times its repeat count (spec §4.1, §8 scenario 4).
    pub fn leaf_count(&self) -> u64 {
        match self {
            Instruction::For { body, repeats } => leaf_count(body) * (*repeats as u64),
            _ => 1,
        }
    }

    /// A human-readable rendering used for per-tick log lines, with
    /// variable references substituted by their resolved values is done by
    /// the caller (spec §6 "Per-tick log line format") — this renders the
    /// *instruction text*, not the substituted payload.
    pub fn render(&self) -> String {
        match self {
            Instruction::Declare { var, expr } => format!("DECLARE({var}, {expr})"),
            Instruction::Add { dst, a, b } => format!("ADD({dst}, {a}, {b})"),
            Instruction::Subtract { dst, a, b } => format!("SUBTRACT({dst}, {a}, {b})"),
            Instruction::Sleep { ticks } => format!("SLEEP({ticks})"),
            Instruction::Print { literal, var: None } => format!("PRINT(\"{literal}\")"),
            Instruction::Print {
                literal,
                var: Some(v),
            } => format!("PRINT(\"{literal}\" + {v})"),
            Instruction::For { body, repeats } => {
                let inner = body
                    .iter()
                    .map(Instruction::render)
                    .collect::<Vec<_>>()
                    .join(" @@ ");
                format!("FOR([{inner}], {repeats})")
            }
            Instruction::Read { var, addr } => format!("READ {var} 0x{addr:X}"),
            Instruction::Write { addr, value } => format!("WRITE 0x{addr:X} {value}"),
        }
    }
}

/// Sum of leaf counts across a straight-line instruction list.
pub fn leaf_count(instrs: &[Instruction]) -> u64 {
    instrs.iter().map(Instruction::leaf_count).sum()
}

/// Parse a `;`-separated instruction list (as accepted by `screen -c`,
/// spec §6), enforcing the 1..=50 item bound.
pub fn parse_instruction_list(source: &str) -> Result<Vec<Instruction>, ParseError> {
    let items = split_top_level(source, ';');
    if items.is_empty() || items.len() > MAX_INSTRUCTION_LIST {
        return Err(ParseError::ListSizeOutOfRange {
            max: MAX_INSTRUCTION_LIST,
            actual: items.len(),
        });
    }
    items.iter().map(|s| parse_instruction(s, 0)).collect()
}

fn parse_instruction(src: &str, depth: u32) -> Result<Instruction, ParseError> {
    let src = src.trim();
    if src.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(rest) = strip_call(src, "DECLARE") {
        let (var, expr) = split_args2(src, rest)?;
        return Ok(Instruction::Declare {
            var: var.trim().to_string(),
            expr: expr.trim().to_string(),
        });
    }
    if let Some(rest) = strip_call(src, "ADD") {
        let (dst, a, b) = split_args3(src, rest)?;
        return Ok(Instruction::Add {
            dst: dst.trim().to_string(),
            a: a.trim().to_string(),
            b: b.trim().to_string(),
        });
    }
    if let Some(rest) = strip_call(src, "SUBTRACT") {
        let (dst, a, b) = split_args3(src, rest)?;
        return Ok(Instruction::Subtract {
            dst: dst.trim().to_string(),
            a: a.trim().to_string(),
            b: b.trim().to_string(),
        });
    }
    if let Some(rest) = strip_call(src, "SLEEP") {
        let n: i64 = rest.trim().parse().map_err(|_| ParseError::Malformed {
            instr: src.to_string(),
            reason: "SLEEP expects an integer argument".to_string(),
        })?;
        // spec §4.1/§8: negative sleeps suspend for 0 ticks, not an error.
        let ticks = n.clamp(0, 255) as u8;
        return Ok(Instruction::Sleep { ticks });
    }
    if let Some(rest) = strip_call(src, "PRINT") {
        return parse_print(src, rest);
    }
    if let Some(rest) = strip_call(src, "FOR") {
        return parse_for(src, rest, depth);
    }
    if let Some(rest) = src.strip_prefix("READ ") {
        return parse_read(src, rest);
    }
    if let Some(rest) = src.strip_prefix("WRITE ") {
        return parse_write(src, rest);
    }

    Err(ParseError::UnknownOpcode(src.to_string()))
}

/// If `src` is `NAME(...)`, return the contents between the matching
/// outermost parens.
fn strip_call<'a>(src: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}(");
    if !src.starts_with(&prefix) || !src.ends_with(')') {
        return None;
    }
    Some(&src[prefix.len()..src.len() - 1])
}

fn split_args2(whole: &str, inner: &str) -> Result<(String, String), ParseError> {
    let parts = split_top_level(inner, ',');
    match parts.as_slice() {
        [a, b] => Ok((a.clone(), b.clone())),
        _ => Err(ParseError::Malformed {
            instr: whole.to_string(),
            reason: format!("expected 2 comma-separated arguments, got {}", parts.len()),
        }),
    }
}

fn split_args3(whole: &str, inner: &str) -> Result<(String, String, String), ParseError> {
    let parts = split_top_level(inner, ',');
    match parts.as_slice() {
        [a, b, c] => Ok((a.clone(), b.clone(), c.clone())),
        _ => Err(ParseError::Malformed {
            instr: whole.to_string(),
            reason: format!("expected 3 comma-separated arguments, got {}", parts.len()),
        }),
    }
}

fn parse_print(whole: &str, inner: &str) -> Result<Instruction, ParseError> {
    let inner = inner.trim();
    let malformed = || ParseError::Malformed {
        instr: whole.to_string(),
        reason: "expected PRINT(\"literal\") or PRINT(\"literal\" + var)".to_string(),
    };

    if !inner.starts_with('"') {
        return Err(malformed());
    }
    let after_quote = &inner[1..];
    let close = after_quote.find('"').ok_or_else(malformed)?;
    let literal = after_quote[..close].to_string();
    let remainder = after_quote[close + 1..].trim();

    if remainder.is_empty() {
        return Ok(Instruction::Print {
            literal,
            var: None,
        });
    }

    let var = remainder
        .strip_prefix('+')
        .ok_or_else(malformed)?
        .trim()
        .to_string();
    if var.is_empty() {
        return Err(malformed());
    }
    Ok(Instruction::Print {
        literal,
        var: Some(var),
    })
}

fn parse_for(whole: &str, inner: &str, depth: u32) -> Result<Instruction, ParseError> {
    if depth >= MAX_FOR_DEPTH {
        return Err(ParseError::NestingTooDeep {
            max: MAX_FOR_DEPTH,
        });
    }

    let inner = inner.trim();
    let malformed = || ParseError::Malformed {
        instr: whole.to_string(),
        reason: "expected FOR([i1 @@ i2 @@ ...], r)".to_string(),
    };

    if !inner.starts_with('[') {
        return Err(malformed());
    }
    let close_bracket = find_matching_bracket(inner).ok_or_else(malformed)?;
    let body_src = &inner[1..close_bracket];
    let after = inner[close_bracket + 1..].trim();
    let repeats_src = after.strip_prefix(',').ok_or_else(malformed)?.trim();
    let repeats: u32 = repeats_src.parse().map_err(|_| ParseError::Malformed {
        instr: whole.to_string(),
        reason: "expected an integer repeat count".to_string(),
    })?;

    let body_items = split_top_level(body_src, '@');
    let body = body_items
        .iter()
        .map(|s| parse_instruction(s, depth + 1))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Instruction::For { body, repeats })
}

fn parse_read(whole: &str, rest: &str) -> Result<Instruction, ParseError> {
    let parts: Vec<&str> = rest.split_whitespace().collect();
    let malformed = || ParseError::Malformed {
        instr: whole.to_string(),
        reason: "expected READ <var> 0xADDR".to_string(),
    };
    let [var, addr] = parts.as_slice() else {
        return Err(malformed());
    };
    Ok(Instruction::Read {
        var: var.to_string(),
        addr: parse_hex_addr(addr).ok_or_else(malformed)?,
    })
}

fn parse_write(whole: &str, rest: &str) -> Result<Instruction, ParseError> {
    let mut parts = rest.splitn(2, char::is_whitespace);
    let malformed = || ParseError::Malformed {
        instr: whole.to_string(),
        reason: "expected WRITE 0xADDR value".to_string(),
    };
    let addr_src = parts.next().ok_or_else(malformed)?;
    let value = parts.next().ok_or_else(malformed)?.trim().to_string();
    if value.is_empty() {
        return Err(malformed());
    }
    Ok(Instruction::Write {
        addr: parse_hex_addr(addr_src).ok_or_else(malformed)?,
        value,
    })
}

fn parse_hex_addr(token: &str) -> Option<u32> {
    let stripped = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))?;
    u32::from_str_radix(stripped, 16).ok()
}

/// Find the index of the `]` matching the `[` at position 0.
fn find_matching_bracket(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split `s` on occurrences of the two-character token `sep sep` (i.e.
/// `@@` or `;;`... actually used for both the single-char `;` list
/// separator and the two-char `@@` FOR body separator) at bracket/paren/
/// string-literal depth 0, so nested `FOR` bodies and quoted `PRINT`
/// literals are never split internally.
///
/// `sep` is `'@'` to split on `@@`, or `';'` to split on `;`.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let double = sep == '@';
    let chars: Vec<char> = s.chars().collect();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                i += 1;
            }
            '(' | '[' => {
                depth += 1;
                i += 1;
            }
            ')' | ']' => {
                depth -= 1;
                i += 1;
            }
            _ if depth == 0 && c == sep && (!double || chars.get(i + 1) == Some(&'@')) => {
                parts.push(chars[start..i].iter().collect::<String>().trim().to_string());
                i += if double { 2 } else { 1 };
                start = i;
            }
            _ => {
                i += 1;
            }
        }
    }
    parts.push(chars[start..].iter().collect::<String>().trim().to_string());
    parts
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_instruction_list() {
        let instrs =
            parse_instruction_list("DECLARE(x, 5);ADD(x, x, 10);SUBTRACT(x, x, 3);PRINT(\"v=\" + x)")
                .unwrap();
        assert_eq!(instrs.len(), 4);
        assert_eq!(leaf_count(&instrs), 4);
    }

    #[test]
    fn parses_nested_for_and_counts_leaves() {
        let instrs = parse_instruction_list("FOR([DECLARE(x,0) @@ ADD(x,x,1)], 3)").unwrap();
        assert_eq!(instrs.len(), 1);
        assert_eq!(leaf_count(&instrs), 6);
    }

    #[test]
    fn rejects_opcode_unknown() {
        assert!(matches!(
            parse_instruction_list("BOGUS(1,2)"),
            Err(ParseError::UnknownOpcode(_))
        ));
    }

    #[test]
    fn rejects_too_many_items() {
        let src = (0..51)
            .map(|_| "PRINT(\"x\")".to_string())
            .collect::<Vec<_>>()
            .join(";");
        assert!(matches!(
            parse_instruction_list(&src),
            Err(ParseError::ListSizeOutOfRange { .. })
        ));
    }

    #[test]
    fn negative_sleep_clamps_to_zero() {
        let instrs = parse_instruction_list("SLEEP(-5)").unwrap();
        assert_eq!(instrs[0], Instruction::Sleep { ticks: 0 });
    }

    #[test]
    fn sleep_over_255_clamps() {
        let instrs = parse_instruction_list("SLEEP(300)").unwrap();
        assert_eq!(instrs[0], Instruction::Sleep { ticks: 255 });
    }

    #[test]
    fn read_and_write_parse_hex_addresses() {
        let instrs = parse_instruction_list("READ v 0x200;WRITE 0x10 5").unwrap();
        assert_eq!(
            instrs[0],
            Instruction::Read {
                var: "v".to_string(),
                addr: 0x200
            }
        );
        assert_eq!(
            instrs[1],
            Instruction::Write {
                addr: 0x10,
                value: "5".to_string()
            }
        );
    }

    #[test]
    fn deeply_nested_for_is_rejected() {
        let src = "FOR([FOR([FOR([FOR([PRINT(\"x\")], 2)], 2)], 2)], 2)";
        assert!(matches!(
            parse_instruction_list(src),
            Err(ParseError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn three_levels_of_nesting_is_accepted() {
        let src = "FOR([FOR([FOR([PRINT(\"x\")], 2)], 2)], 2)";
        assert!(parse_instruction_list(src).is_ok());
    }
}
