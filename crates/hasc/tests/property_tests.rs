//! Pipeline-wide properties: determinism, frame balance, branch-target
//! resolution, struct constant equations and peephole idempotence, checked
//! over full compilations rather than single constructs.

use std::collections::HashSet;

use hasc::{compile, peephole};

/// A program touching most of the language surface at once.
const KITCHEN_SINK: &str = "\
const MAX = 8;

data game:
    score.w = 0
    lives.b = 3
    table.w[MAX] = { 1, 2, 3, 4, 5, 6, 7, 8 }

bss scratch:
    buffer.b[64]
    struct enemy[MAX] { x.l, y.l, hp.w }

code main:
    extern func SysCall(code: int) -> void;
    public update;

    proc helper(__reg(d2) v: int) -> int {
        return v * 2;
    }

    proc update(__reg(d0) delta: int) -> void {
        var total: int = 0;
        var i: int = 0;
        for i = 0 to 7 {
            total = total + table[i];
            if (total > 100) {
                break;
            }
        }
        while (total > 0) {
            total = total - 1;
        }
        do {
            total = total + 1;
        } while (total < 3);
        repeat 4 {
            total = total + delta;
        }
        if (total == 0 || delta == 0) {
            total = helper(total);
        }
        score = total;
        call SysCall(1);
    }
";

fn assemble(source: &str) -> String {
    compile(source, None, true).expect("compilation should succeed").assembly
}

/// Collects every defined label and checks that every branch target
/// resolves to one.
fn assert_branches_resolve(asm: &str) {
    let mut labels: HashSet<&str> = HashSet::new();
    for line in asm.lines() {
        let instr = line.split(';').next().unwrap_or("").trim();
        if let Some(name) = instr.strip_suffix(':') {
            if !name.is_empty() && !name.contains(' ') {
                labels.insert(name);
            }
        } else if let Some((head, _)) = instr.split_once(':') {
            if !head.is_empty() && !head.contains(' ') {
                labels.insert(head);
            }
        }
    }

    for line in asm.lines() {
        let instr = line.split(';').next().unwrap_or("").trim();
        let mut parts = instr.split_whitespace();
        let Some(op) = parts.next() else { continue };
        let base = op.split('.').next().unwrap_or(op);
        let is_branch = matches!(
            base,
            "bra" | "beq" | "bne" | "blt" | "ble" | "bgt" | "bge" | "blo" | "bls" | "bhi" | "bhs"
        );
        if is_branch {
            let target = parts.next().expect("branch needs a target");
            assert!(labels.contains(target), "undefined branch target '{target}' in:\n{asm}");
        }
        if base == "dbra" {
            let operands = parts.next().expect("dbra needs operands");
            let target = operands.split(',').nth(1).expect("dbra target");
            assert!(labels.contains(target), "undefined dbra target '{target}' in:\n{asm}");
        }
    }
}

#[test]
fn output_is_byte_identical_across_runs() {
    let first = assemble(KITCHEN_SINK);
    for _ in 0..4 {
        assert_eq!(assemble(KITCHEN_SINK), first, "compilation must be deterministic");
    }
}

#[test]
fn every_branch_target_is_defined() {
    assert_branches_resolve(&assemble(KITCHEN_SINK));
}

#[test]
fn peephole_is_a_fixpoint_on_real_output() {
    let asm = assemble(KITCHEN_SINK);
    let lines: Vec<String> = asm.lines().map(str::to_owned).collect();
    let again = peephole::optimize(lines.clone());
    assert_eq!(again, lines, "re-optimizing final output must change nothing");
}

#[test]
fn single_return_procedures_balance_link_and_unlk() {
    let asm = assemble(
        "code c:\n    proc one() -> int {\n        return 1;\n    }\n    proc two() -> void {\n        var x: int = 0;\n        x = 2;\n    }\n",
    );
    let links = asm.matches("link a6").count();
    let unlks = asm.matches("unlk a6").count();
    assert_eq!(links, 2, "one link per procedure: {asm}");
    assert_eq!(unlks, 2, "one unlk per return path: {asm}");
}

#[test]
fn struct_constants_satisfy_the_layout_equations() {
    let asm = assemble("bss b:\n    struct thing[2] { flag.b, pos.w, addr.l, tag.b }\n");
    // flag@0, pos aligned to 2, addr aligned to 4, tag@8, total 9 -> 10
    assert!(asm.contains("thing__size equ 10"), "{asm}");
    assert!(asm.contains("thing__stride equ 10"), "stride equals size: {asm}");
    assert!(asm.contains("thing_flag equ thing+0"), "{asm}");
    assert!(asm.contains("thing_pos equ thing+2"), "{asm}");
    assert!(asm.contains("thing_addr equ thing+4"), "{asm}");
    assert!(asm.contains("thing_tag equ thing+8"), "{asm}");
    assert!(asm.contains("thing: ds.b 20"), "array reserves stride times count: {asm}");
}

#[test]
fn zero_to_zero_loop_compares_before_the_body() {
    // `for i = 0 to 0` runs once: the head comparison is 0 > 0, which
    // falls through into the body on the first pass
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        var x: int = 0;\n        for i = 0 to 0 {\n            x = x + 1;\n        }\n    }\n",
    );
    assert!(asm.contains("cmp.l d1,d0"), "{asm}");
    assert!(asm.contains("bgt endfor"), "{asm}");
}

#[test]
fn generated_text_uses_four_space_indentation_and_column_zero_labels() {
    let asm = assemble(KITCHEN_SINK);
    for line in asm.lines() {
        if line.is_empty() {
            continue;
        }
        let is_label_or_directive = !line.starts_with(' ');
        if !is_label_or_directive {
            assert!(line.starts_with("    "), "instructions indent with four spaces: {line:?}");
        }
    }
    assert!(asm.lines().any(|l| l == "update:"), "procedure labels sit at column 0");
}

#[test]
fn kitchen_sink_survives_validation_and_emits_every_section() {
    let output = compile(KITCHEN_SINK, None, true).expect("valid program");
    let asm = &output.assembly;
    assert!(asm.contains("SECTION game,data"));
    assert!(asm.contains("SECTION scratch,bss"));
    assert!(asm.contains("SECTION main,code"));
    assert!(asm.contains("XREF SysCall"));
    assert!(asm.contains("XDEF update"));
    assert!(asm.contains("helper:") && asm.contains("update:"));
}
