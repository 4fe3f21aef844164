//! Multi-pass peephole optimizer over the emitted assembly lines.
//!
//! Every transformation is a conservative local rewrite: pattern matches
//! run against the instruction portion (comments stripped), the original
//! comment is preserved, and no rule crosses a control-flow boundary unless
//! the pattern spells it out (the branch-to-branch rule). Dead-store
//! elimination only ever touches register destinations — memory stores can
//! carry side effects (`-(a7)` pushes, autoincrement, hardware registers).
//! Immediate narrowing is restricted to data registers because `addq`/
//! `moveq` set the CCR where their address-register forms would not.
//!
//! Passes run until nothing shrinks, bounded to five rounds.

use std::sync::LazyLock;

use regex::Regex;

const MAX_PASSES: usize = 5;

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($pattern).expect("peephole pattern"));
    };
}

static_regex!(MOVE_REG_REG, r"^\s*move(\.[bwl])?\s+([da]\d+),([da]\d+)$");
static_regex!(MOVE_D0_STORE, r"^\s*move(\.[bwl])\s+d0,(\S+)$");
static_regex!(MOVE_LOAD_D0, r"^\s*move(\.[bwl])\s+(\S+),d0$");
static_regex!(LEA, r"^\s*lea\s+(\S+),(a\d+)$");
static_regex!(MOVE_ANY_REG, r"^\s*move(\.[bwl])\s+\S+,([da]\d+)$");
static_regex!(ADD_IMM, r"^(\s*)add\.l\s+#(\d+),(d\d+)$");
static_regex!(SUB_IMM, r"^(\s*)sub\.l\s+#(\d+),(d\d+)$");
static_regex!(MOVE_IMM, r"^(\s*)move\.l\s+#(-?\d+),(d\d+)$");
static_regex!(MOVEQ_IMM, r"^(\s*)moveq\s+#(-?\d+),(d\d+)$");
static_regex!(CLR_L, r"^\s*clr\.l\s+(d\d+)$");
static_regex!(CLR_ANY, r"^(\s*)clr(\.[bwl])\s+(d\d+)$");
static_regex!(MOVE_L_TO_REG, r"^\s*move\.l\s+\S+,(d\d+)$");
static_regex!(MOVE_REG_TO_ANY, r"^\s*move(\.[bwl])\s+([da]\d+),(\S+)$");
static_regex!(CMP, r"^\s*cmp(\.[bwl])?\s+(.+)$");
static_regex!(LSL_IMM, r"^\s*lsl\.l\s+#(\d+),(d\d+)$");
static_regex!(INDEXED_LOAD, r"^(\s*move(\.[bwl])?)\s+\((a\d+),0\.l\),(d\d+)$");
static_regex!(INDEXED_STORE, r"^(\s*move(\.[bwl])?)\s+(d\d+),\((a\d+),0\.l\)$");
static_regex!(BRANCH, r"^\s*(b\w+)\s+(\w+)$");
static_regex!(BRA, r"^\s*bra\s+(\w+)$");
static_regex!(LABEL, r"^(\w+):$");
static_regex!(MODIFY_TWO_OP, r"^\s*\w+(\.\w)?\s+[^,]+,([da]\d+)");

/// Optimizes the emitted lines, returning a new sequence.
///
/// Idempotent: a second run over the output performs no further rewrites,
/// and no pass ever lengthens the program.
pub fn optimize(mut lines: Vec<String>) -> Vec<String> {
    let mut passes = 0;
    loop {
        let prev_len = lines.len();
        lines = eliminate_move_self(&lines);
        lines = eliminate_redundant_moves(&lines);
        lines = eliminate_redundant_lea(&lines);
        lines = eliminate_dead_stores(&lines);
        lines = optimize_immediate_ops(&lines);
        lines = fold_immediate_to_memory(&lines);
        lines = fold_clr_to_memory(&lines);
        lines = eliminate_clr_move(&lines);
        lines = optimize_move_chains(&lines);
        lines = eliminate_redundant_compare(&lines);
        lines = optimize_branch_to_branch(&lines);
        lines = fold_constant_shifts(&lines);
        lines = optimize_indexed_addressing(&lines);
        passes += 1;
        if lines.len() >= prev_len || passes >= MAX_PASSES {
            break;
        }
        tracing::debug!(pass = passes, removed = prev_len - lines.len(), "peephole pass shrank output");
    }
    lines
}

/// The instruction portion of a line: everything before the comment,
/// right-trimmed.
fn instr(line: &str) -> &str {
    line.split(';').next().unwrap_or("").trim_end()
}

/// The comment portion including the leading `;`, or an empty string.
fn comment(line: &str) -> &str {
    line.find(';').map_or("", |at| &line[at..])
}

fn is_label(text: &str) -> bool {
    !text.is_empty() && !text.starts_with(' ') && text.contains(':')
}

fn is_branch(text: &str) -> bool {
    const BRANCH_OPS: [&str; 19] = [
        "bra", "beq", "bne", "blt", "ble", "bgt", "bge", "blo", "bls", "bhi", "bhs", "bcc", "bcs", "bpl", "bmi",
        "bvs", "bvc", "rts", "rte",
    ];
    let trimmed = text.trim_start();
    BRANCH_OPS
        .iter()
        .any(|op| trimmed.starts_with(op) && trimmed[op.len()..].starts_with([' ', '.', '\0'].as_ref()))
        || trimmed == "rts"
        || trimmed == "rte"
}

/// Registers written by an instruction, conservatively.
fn modified_regs(text: &str) -> Vec<String> {
    if let Some(caps) = MODIFY_TWO_OP.captures(text) {
        return vec![caps[2].to_owned()];
    }
    const SINGLE_OPS: [&str; 11] = ["clr", "neg", "not", "addq", "subq", "asl", "asr", "lsl", "lsr", "rol", "ror"];
    let trimmed = text.trim_start();
    for op in SINGLE_OPS {
        if trimmed.starts_with(op) {
            if let Some(rest) = trimmed[op.len()..].split_whitespace().last() {
                let operand = rest.rsplit(',').next().unwrap_or(rest);
                if operand.len() == 2 && (operand.starts_with('d') || operand.starts_with('a')) {
                    return vec![operand.to_owned()];
                }
            }
        }
    }
    Vec::new()
}

fn is_plain_register(operand: &str) -> bool {
    let bytes = operand.as_bytes();
    bytes.len() == 2 && matches!(bytes[0], b'd' | b'a') && bytes[1].is_ascii_digit()
}

/// Rule 1: `move.x rN,rN` is a no-op.
fn eliminate_move_self(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| {
            let base = instr(line);
            !MOVE_REG_REG.captures(base).is_some_and(|caps| caps[2] == caps[3])
        })
        .cloned()
        .collect()
}

/// Rule 2: a store from d0 followed by a reload of the same place into d0.
fn eliminate_redundant_moves(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if i + 1 < lines.len() {
            let store = MOVE_D0_STORE.captures(instr(&lines[i]));
            let reload = MOVE_LOAD_D0.captures(instr(&lines[i + 1]));
            if let (Some(store), Some(reload)) = (store, reload) {
                if store[1] == reload[1] && store[2] == reload[2] {
                    out.push(lines[i].clone());
                    i += 2;
                    continue;
                }
            }
        }
        out.push(lines[i].clone());
        i += 1;
    }
    out
}

/// Rule 3: back-to-back identical `lea` into the same register.
///
/// An earlier, more aggressive address-caching version kept stale address
/// registers alive across complex instructions; only the exact-duplicate
/// case is safe.
fn eliminate_redundant_lea(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut prev: Option<(String, String)> = None;
    for line in lines {
        let caps = LEA.captures(instr(line));
        if let Some(caps) = &caps {
            let current = (caps[1].to_owned(), caps[2].to_owned());
            if prev.as_ref() == Some(&current) {
                continue;
            }
            prev = Some(current);
        } else {
            prev = None;
        }
        out.push(line.clone());
    }
    out
}

/// Rule 4: a register write immediately overwritten by another write of
/// the same size. Register destinations only.
fn eliminate_dead_stores(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if i + 1 < lines.len() {
            let first = MOVE_ANY_REG.captures(instr(&lines[i]));
            let second = MOVE_ANY_REG.captures(instr(&lines[i + 1]));
            if let (Some(first), Some(second)) = (first, second) {
                if first[1] == second[1] && first[2] == second[2] {
                    i += 1;
                    continue;
                }
            }
        }
        out.push(lines[i].clone());
        i += 1;
    }
    out
}

/// Rule 5: narrow immediates — `addq`/`subq` for 1-8, `moveq` for
/// [-128, 127]. Data registers only, to keep CCR semantics.
fn optimize_immediate_ops(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        let base = instr(line);
        let tail = comment(line);
        if let Some(caps) = ADD_IMM.captures(base) {
            let value: i64 = caps[2].parse().unwrap_or(0);
            if (1..=8).contains(&value) {
                out.push(format!("{}addq.l #{value},{}{tail}", &caps[1], &caps[3]));
                continue;
            }
        }
        if let Some(caps) = SUB_IMM.captures(base) {
            let value: i64 = caps[2].parse().unwrap_or(0);
            if (1..=8).contains(&value) {
                out.push(format!("{}subq.l #{value},{}{tail}", &caps[1], &caps[3]));
                continue;
            }
        }
        if let Some(caps) = MOVE_IMM.captures(base) {
            let value: i64 = caps[2].parse().unwrap_or(i64::MAX);
            if (-128..=127).contains(&value) {
                out.push(format!("{}moveq #{value},{}{tail}", &caps[1], &caps[3]));
                continue;
            }
        }
        out.push(line.clone());
    }
    out
}

/// Shared driver for rules 6: fold an immediate (or cleared) register that
/// is only used to feed a memory store, with at most one intervening
/// instruction that leaves the register alone.
fn fold_feeder_to_memory(
    lines: &[String],
    match_feeder: impl Fn(&str) -> Option<(String, String, String)>,
) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if i + 1 < lines.len() {
            if let Some((indent, value, reg)) = match_feeder(instr(&lines[i])) {
                let try_store = |line: &String| -> Option<(String, String)> {
                    let caps = MOVE_REG_TO_ANY.captures(instr(line))?;
                    if caps[2] == reg && !is_plain_register(&caps[3]) {
                        Some((caps[1].to_owned(), caps[3].to_owned()))
                    } else {
                        None
                    }
                };

                if let Some((size, dest)) = try_store(&lines[i + 1]) {
                    let tail = comment(&lines[i + 1]);
                    out.push(format!("{indent}move{size} #{value},{dest}{tail}"));
                    i += 2;
                    continue;
                }

                if i + 2 < lines.len() {
                    let mid = instr(&lines[i + 1]);
                    if !is_label(mid) && !is_branch(mid) && !modified_regs(mid).contains(&reg) {
                        if let Some((size, dest)) = try_store(&lines[i + 2]) {
                            let tail = comment(&lines[i + 2]);
                            out.push(lines[i + 1].clone());
                            out.push(format!("{indent}move{size} #{value},{dest}{tail}"));
                            i += 3;
                            continue;
                        }
                    }
                }
            }
        }
        out.push(lines[i].clone());
        i += 1;
    }
    out
}

/// Rule 6a: `moveq/move.l #N,dX; move.s dX,<mem>` becomes a direct
/// immediate store.
fn fold_immediate_to_memory(lines: &[String]) -> Vec<String> {
    fold_feeder_to_memory(lines, |base| {
        MOVEQ_IMM
            .captures(base)
            .or_else(|| MOVE_IMM.captures(base))
            .map(|caps| (caps[1].to_owned(), caps[2].to_owned(), caps[3].to_owned()))
    })
}

/// Rule 6b: `clr.s dX; move.s dX,<mem>` becomes `move.s #0,<mem>`.
fn fold_clr_to_memory(lines: &[String]) -> Vec<String> {
    fold_feeder_to_memory(lines, |base| {
        CLR_ANY
            .captures(base)
            .map(|caps| (caps[1].to_owned(), "0".to_owned(), caps[3].to_owned()))
    })
}

/// Rule 7: a `clr.l` whose register is fully overwritten by the next move.
/// The following move must be `.l` — a narrower move leaves the upper bits
/// that the `clr.l` was there to zero.
fn eliminate_clr_move(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if i + 1 < lines.len() {
            if let Some(clr) = CLR_L.captures(instr(&lines[i])) {
                if let Some(next) = MOVE_L_TO_REG.captures(instr(&lines[i + 1]))
                    && next[1] == clr[1]
                {
                    i += 1;
                    continue;
                }
            }
        }
        out.push(lines[i].clone());
        i += 1;
    }
    out
}

/// Rule 8: move-chain forwarding — `move d0,d1; move d1,d2` reads from the
/// original source instead.
fn optimize_move_chains(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if i + 1 < lines.len() {
            let first = MOVE_REG_REG.captures(instr(&lines[i]));
            let second = MOVE_REG_REG.captures(instr(&lines[i + 1]));
            if let (Some(first), Some(second)) = (first, second) {
                let (size1, src1, dest1) = (first.get(1).map_or("", |m| m.as_str()), &first[2], &first[3]);
                let (size2, src2, dest2) = (second.get(1).map_or("", |m| m.as_str()), &second[2], &second[3]);
                if src2 == dest1 && size1 == size2 && !size1.is_empty() {
                    let indent2: String = lines[i + 1].chars().take_while(|c| c.is_whitespace()).collect();
                    out.push(lines[i].clone());
                    out.push(format!("{indent2}move{size2} {src1},{dest2}"));
                    i += 2;
                    continue;
                }
            }
        }
        out.push(lines[i].clone());
        i += 1;
    }
    out
}

/// Rule 9: a `cmp` repeating the previous one inside the same basic block.
fn eliminate_redundant_compare(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut last_cmp: Option<String> = None;
    for line in lines {
        let base = instr(line);
        if is_label(base) || is_branch(base) {
            last_cmp = None;
            out.push(line.clone());
            continue;
        }
        if let Some(caps) = CMP.captures(base) {
            let signature = caps[2].to_owned();
            if last_cmp.as_deref() == Some(signature.as_str()) {
                continue;
            }
            last_cmp = Some(signature);
            out.push(line.clone());
            continue;
        }
        if let Some(signature) = &last_cmp {
            for reg in modified_regs(base) {
                if signature.contains(&reg) {
                    last_cmp = None;
                    break;
                }
            }
        }
        out.push(line.clone());
    }
    out
}

fn invert_branch(mnemonic: &str) -> Option<&'static str> {
    Some(match mnemonic {
        "beq" => "bne",
        "bne" => "beq",
        "blt" => "bge",
        "bge" => "blt",
        "bgt" => "ble",
        "ble" => "bgt",
        "blo" => "bhs",
        "bhs" => "blo",
        "bls" => "bhi",
        "bhi" => "bls",
        "bcs" => "bcc",
        "bcc" => "bcs",
        "bmi" => "bpl",
        "bpl" => "bmi",
        "bvs" => "bvc",
        "bvc" => "bvs",
        _ => return None,
    })
}

/// Rule 12: `b<cc> L1; bra L2; L1:` becomes `b<inv cc> L2; L1:`.
fn optimize_branch_to_branch(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if i + 2 < lines.len() {
            let cond = BRANCH.captures(instr(&lines[i]));
            let skip = BRA.captures(instr(&lines[i + 1]));
            let label = LABEL.captures(instr(&lines[i + 2]));
            if let (Some(cond), Some(skip), Some(label)) = (cond, skip, label) {
                if cond[2] == label[1] {
                    if let Some(inverted) = invert_branch(&cond[1]) {
                        let mut rewritten = format!("    {inverted} {}", &skip[1]);
                        let tail = comment(&lines[i]);
                        if !tail.is_empty() {
                            rewritten.push(' ');
                            rewritten.push_str(tail);
                        }
                        out.push(rewritten);
                        out.push(lines[i + 2].clone());
                        i += 3;
                        continue;
                    }
                }
            }
        }
        out.push(lines[i].clone());
        i += 1;
    }
    out
}

/// Rule 10: fold `moveq #N,dX; lsl.l #M,dX` into one immediate load.
fn fold_constant_shifts(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if i + 1 < lines.len() {
            if let Some(load) = MOVEQ_IMM.captures(instr(&lines[i]))
                && let Some(shift) = LSL_IMM.captures(instr(&lines[i + 1]))
                && load[3] == shift[2]
            {
                let value: i64 = load[2].parse().unwrap_or(0);
                let amount: u32 = shift[1].parse().unwrap_or(0);
                let result = value << amount;
                let indent = &load[1];
                let reg = &load[3];
                let tail = comment(&lines[i + 1]);
                if (-128..=127).contains(&result) {
                    out.push(format!("{indent}moveq #{result},{reg}{tail}"));
                } else {
                    out.push(format!("{indent}move.l #{result},{reg}{tail}"));
                }
                i += 2;
                continue;
            }
        }
        out.push(lines[i].clone());
        i += 1;
    }
    out
}

/// Rule 11: collapse `(aN,0.l)` indexing to plain `(aN)`.
fn optimize_indexed_addressing(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        let base = instr(line);
        let tail = comment(line);
        if let Some(caps) = INDEXED_LOAD.captures(base) {
            out.push(format!("{} ({}),{}{tail}", &caps[1], &caps[3], &caps[4]));
            continue;
        }
        if let Some(caps) = INDEXED_STORE.captures(base) {
            out.push(format!("{} {},({}){tail}", &caps[1], &caps[3], &caps[4]));
            continue;
        }
        out.push(line.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn lines(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| (*t).to_owned()).collect()
    }

    #[test]
    fn move_to_itself_is_removed() {
        let out = optimize(lines(&["    move.l d0,d0", "    rts"]));
        assert_eq!(out, lines(&["    rts"]));
    }

    #[test]
    fn store_then_reload_drops_the_reload() {
        let out = eliminate_redundant_moves(&lines(&["    move.w d0,-4(a4)", "    move.w -4(a4),d0"]));
        assert_eq!(out, lines(&["    move.w d0,-4(a4)"]));
    }

    #[test]
    fn mismatched_sizes_are_not_folded() {
        let input = lines(&["    move.w d0,-4(a4)", "    move.l -4(a4),d0"]);
        assert_eq!(eliminate_redundant_moves(&input), input);
    }

    #[test]
    fn duplicate_lea_is_dropped() {
        let out = eliminate_redundant_lea(&lines(&["    lea table,a0", "    lea table,a0", "    rts"]));
        assert_eq!(out, lines(&["    lea table,a0", "    rts"]));
    }

    #[test]
    fn dead_register_store_is_removed() {
        let out = eliminate_dead_stores(&lines(&["    move.l #1,d1", "    move.l #2,d1"]));
        assert_eq!(out, lines(&["    move.l #2,d1"]));
    }

    #[test]
    fn memory_stores_are_never_treated_as_dead() {
        let input = lines(&["    move.l d0,-(a7)", "    move.l d1,-(a7)"]);
        assert_eq!(eliminate_dead_stores(&input), input);
    }

    #[test]
    fn small_immediates_narrow_to_quick_forms() {
        let out = optimize_immediate_ops(&lines(&["    add.l #4,d0", "    sub.l #2,d1", "    move.l #3,d0"]));
        assert_eq!(out, lines(&["    addq.l #4,d0", "    subq.l #2,d1", "    moveq #3,d0"]));
    }

    #[test]
    fn address_register_adds_are_left_alone() {
        let input = lines(&["    add.l #4,a7"]);
        assert_eq!(optimize_immediate_ops(&input), input);
    }

    #[test]
    fn large_immediates_stay_wide() {
        let input = lines(&["    move.l #300,d0", "    add.l #9,d0"]);
        assert_eq!(optimize_immediate_ops(&input), input);
    }

    #[test]
    fn immediate_feeding_a_store_folds_into_it() {
        let out = fold_immediate_to_memory(&lines(&["    moveq #5,d0", "    move.w d0,-8(a4)"]));
        assert_eq!(out, lines(&["    move.w #5,-8(a4)"]));
    }

    #[test]
    fn immediate_store_fold_keeps_an_innocent_gap_instruction() {
        let out = fold_immediate_to_memory(&lines(&["    moveq #5,d0", "    lea table,a0", "    move.w d0,-8(a4)"]));
        assert_eq!(out, lines(&["    lea table,a0", "    move.w #5,-8(a4)"]));
    }

    #[test]
    fn immediate_store_fold_refuses_register_destinations() {
        let input = lines(&["    moveq #5,d0", "    move.l d0,d3"]);
        assert_eq!(fold_immediate_to_memory(&input), input);
    }

    #[test]
    fn clr_feeding_a_store_becomes_immediate_zero() {
        let out = fold_clr_to_memory(&lines(&["    clr.w d0", "    move.w d0,score"]));
        assert_eq!(out, lines(&["    move.w #0,score"]));
    }

    #[test]
    fn clr_followed_by_full_overwrite_is_removed() {
        let out = eliminate_clr_move(&lines(&["    clr.l d0", "    move.l #7,d0"]));
        assert_eq!(out, lines(&["    move.l #7,d0"]));
    }

    #[test]
    fn clr_before_a_narrow_move_must_survive() {
        // the clr.l zeroes the bits the word move does not write
        let input = lines(&["    clr.l d0", "    move.w score,d0"]);
        assert_eq!(eliminate_clr_move(&input), input);
    }

    #[test]
    fn move_chains_forward_the_original_source() {
        let out = optimize_move_chains(&lines(&["    move.l d0,d1", "    move.l d1,d2"]));
        assert_eq!(out, lines(&["    move.l d0,d1", "    move.l d0,d2"]));
    }

    #[test]
    fn repeated_compare_in_one_block_is_dropped() {
        let out = eliminate_redundant_compare(&lines(&["    cmp.l d1,d0", "    cmp.l d1,d0", "    beq done"]));
        assert_eq!(out, lines(&["    cmp.l d1,d0", "    beq done"]));
    }

    #[test]
    fn compare_cache_resets_across_labels() {
        let input = lines(&["    cmp.l d1,d0", "loop1:", "    cmp.l d1,d0"]);
        assert_eq!(eliminate_redundant_compare(&input), input);
    }

    #[test]
    fn compare_cache_resets_when_operand_is_written() {
        let input = lines(&["    cmp.l d1,d0", "    move.l #4,d1", "    cmp.l d1,d0"]);
        assert_eq!(eliminate_redundant_compare(&input), input);
    }

    #[test]
    fn branch_over_bra_inverts_the_condition() {
        let out = optimize_branch_to_branch(&lines(&["    beq skip1", "    bra target", "skip1:"]));
        assert_eq!(out, lines(&["    bne target", "skip1:"]));
    }

    #[test]
    fn unsigned_branches_invert_too() {
        let out = optimize_branch_to_branch(&lines(&["    blo skip1", "    bra target", "skip1:"]));
        assert_eq!(out, lines(&["    bhs target", "skip1:"]));
    }

    #[test]
    fn constant_shift_folds_into_one_load() {
        let out = fold_constant_shifts(&lines(&["    moveq #3,d1", "    lsl.l #2,d1"]));
        assert_eq!(out, lines(&["    moveq #12,d1"]));
    }

    #[test]
    fn constant_shift_widens_when_result_exceeds_moveq() {
        let out = fold_constant_shifts(&lines(&["    moveq #100,d1", "    lsl.l #4,d1"]));
        assert_eq!(out, lines(&["    move.l #1600,d1"]));
    }

    #[test]
    fn zero_offset_indexing_collapses() {
        let out = optimize_indexed_addressing(&lines(&["    move.w (a0,0.l),d0", "    move.w d0,(a0,0.l)"]));
        assert_eq!(out, lines(&["    move.w (a0),d0", "    move.w d0,(a0)"]));
    }

    #[test]
    fn comments_survive_rewrites() {
        let out = optimize_immediate_ops(&lines(&["    move.l #3,d0; answer"]));
        assert_eq!(out, lines(&["    moveq #3,d0; answer"]));
    }

    #[test]
    fn optimizer_is_idempotent_and_never_lengthens() {
        let input = lines(&[
            "f:",
            "    link a6,#0",
            "    move.l #3,d0",
            "    move.l d0,d0",
            "    cmp.l #0,d0",
            "    beq skip1",
            "    bra out1",
            "skip1:",
            "    clr.l d1",
            "    move.l #9,d1",
            "out1:",
            "    unlk a6",
            "    rts",
        ]);
        let once = optimize(input.clone());
        let twice = optimize(once.clone());
        assert_eq!(once, twice, "second run must be a fixpoint");
        assert!(once.len() <= input.len());
    }
}
