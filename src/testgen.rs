//! Randomized instruction-program generation, grounded in the original
//! `console.cpp`'s `generateRandomInstructions`/`generateNestedFor` pair
//! (SPEC_FULL.md §B). Used both by the batch spawner (spec §4.4) and as
//! `screen -s`'s default instruction stream (spec §6).

use rand::Rng;

use crate::instruction::{Instruction, MAX_FOR_DEPTH};

const VAR_POOL: [&str; 3] = ["x", "y", "z"];

/// Generate a top-level program with an instruction count drawn uniformly
/// from `[min_ins, max_ins]`.
pub fn random_program(rng: &mut impl Rng, min_ins: u32, max_ins: u32) -> Vec<Instruction> {
    let count = if min_ins >= max_ins {
        min_ins
    } else {
        rng.gen_range(min_ins..=max_ins)
    };
    (0..count).map(|_| random_instruction(rng, 0)).collect()
}

fn random_instruction(rng: &mut impl Rng, depth: u32) -> Instruction {
    // FOR is only offered while there is room left to nest (spec §4.1).
    let variants: u32 = if depth < MAX_FOR_DEPTH { 6 } else { 5 };
    match rng.gen_range(0..variants) {
        0 => Instruction::Declare {
            var: pick_var(rng).to_string(),
            expr: rng.gen_range(0..1000).to_string(),
        },
        1 => Instruction::Add {
            dst: pick_var(rng).to_string(),
            a: operand(rng),
            b: operand(rng),
        },
        2 => {
            // The original console.cpp generator swaps operands so the
            // first is never smaller than the second, sidestepping the
            // SUBTRACT-floors-at-zero case at *generation* time only; the
            // interpreter itself floors regardless (spec §4.1, §9).
            let hi = rng.gen_range(0..1000);
            let lo = rng.gen_range(0..=hi);
            Instruction::Subtract {
                dst: pick_var(rng).to_string(),
                a: hi.to_string(),
                b: lo.to_string(),
            }
        }
        3 => Instruction::Sleep {
            ticks: rng.gen_range(1..=20),
        },
        4 => Instruction::Print {
            literal: "hello".to_string(),
            var: if rng.gen_bool(0.5) {
                Some(pick_var(rng).to_string())
            } else {
                None
            },
        },
        _ => {
            let body_len = rng.gen_range(1..=3);
            let body = (0..body_len)
                .map(|_| random_instruction(rng, depth + 1))
                .collect();
            Instruction::For {
                body,
                repeats: rng.gen_range(2..=4),
            }
        }
    }
}

fn pick_var(rng: &mut impl Rng) -> &'static str {
    VAR_POOL[rng.gen_range(0..VAR_POOL.len())]
}

fn operand(rng: &mut impl Rng) -> String {
    if rng.gen_bool(0.5) {
        pick_var(rng).to_string()
    } else {
        rng.gen_range(0..1000).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::leaf_count;
    use rand::SeedableRng;

    #[test]
    fn generated_program_honors_count_bounds() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let program = random_program(&mut rng, 5, 5);
        assert_eq!(program.len(), 5);
    }

    #[test]
    fn generated_for_never_exceeds_nesting_depth() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let program = random_program(&mut rng, 20, 20);
            assert!(leaf_count(&program) >= program.len() as u64);
        }
    }
}
