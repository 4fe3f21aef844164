//! End-to-end compilations: HAS source in, assembly text out.
//!
//! These tests drive the full pipeline (preprocess, parse, validate,
//! generate, peephole) and assert on the emitted text, covering the
//! calling conventions, control-flow lowering, inline assembly
//! substitution and the compile-time metaprogramming hooks.

use hasc::compile;

fn assemble(source: &str) -> String {
    compile(source, None, true).expect("compilation should succeed").assembly
}

#[test]
fn constant_fold_produces_moveq() {
    let asm = assemble("code C:\n    proc f() -> int {\n        return 1+2;\n    }\n");
    assert!(asm.contains("moveq #3,d0"), "1+2 should fold to an immediate: {asm}");
    assert!(asm.contains("link a6,#0"));
    assert!(asm.contains("unlk a6"));
    assert!(asm.contains("rts"));
}

#[test]
fn data_array_with_named_dimension_emits_value_list() {
    let asm = assemble("const N = 4;\ndata D:\n    arr.w[N] = { 1,2,3,4 }\n");
    assert!(asm.contains("arr:"));
    assert!(asm.contains("dc.w 1,2,3,4"), "initializers expand to a comma list: {asm}");
}

#[test]
fn for_loop_compares_at_head_and_branches_out() {
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        var x: int = 0;\n        for i = 1 to 3 {\n            x = x + i;\n        }\n    }\n",
    );
    assert!(asm.contains("cmp.l d1,d0"), "loop comparison: {asm}");
    assert!(asm.contains("bgt endfor"), "exit branch goes to the loop end: {asm}");
    assert!(asm.contains("bra for"), "back edge returns to the head: {asm}");
}

#[test]
fn unsigned_operand_selects_unsigned_branch() {
    let asm = assemble(
        "code c:\n    proc f() -> int {\n        var x: u16 = 0;\n        if (x < 0) {\n            return 1;\n        } else {\n            return 2;\n        }\n    }\n",
    );
    assert!(asm.contains("bhs"), "u16 comparison must use the unsigned family: {asm}");
    assert!(!asm.contains("bge"), "the signed inverse must not appear: {asm}");
    assert!(asm.contains("andi.l #$FFFF,d0"), "u16 loads zero-extend: {asm}");
}

#[test]
fn signed_operand_keeps_signed_branch() {
    let asm = assemble(
        "code c:\n    proc f() -> int {\n        var x: int = 0;\n        if (x < 0) {\n            return 1;\n        } else {\n            return 2;\n        }\n    }\n",
    );
    assert!(asm.contains("bge"), "int comparison inverts to bge: {asm}");
    assert!(!asm.contains("bhs"));
}

#[test]
fn register_parameters_are_mirrored_into_the_frame() {
    let asm = assemble(
        "code c:\n    proc g(__reg(d0) a: int, __reg(d1) b: int) -> int {\n        return a + b;\n    }\n",
    );
    assert!(asm.contains("move.l d0,-4(a6)"), "a saved to its slot: {asm}");
    assert!(asm.contains("move.l d1,-8(a6)"), "b saved to its slot: {asm}");
    assert!(asm.contains("move.l -4(a4),d0"), "body reloads a from the frame: {asm}");
    assert!(asm.contains("add.l d1,d0"), "result accumulates in d0: {asm}");
}

#[test]
fn inline_asm_substitutes_locals_with_a_comment() {
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        var pad: int = 0;\n        var counter: int = 0;\n        asm {\n            move.l @counter,d3\n        }\n    }\n",
    );
    assert!(asm.contains("move.l -8(a4),d3"), "local substituted by frame offset: {asm}");
    assert!(
        asm.contains("; @counter -> -8(a4) (local variable)"),
        "substitution summary precedes the block: {asm}"
    );
}

#[test]
fn inline_asm_substitutes_register_params_and_globals() {
    let asm = assemble(
        "data d:\n    score.w = 0\ncode c:\n    proc f(__reg(a0) dest_ptr: ptr) -> void {\n        asm {\n            move.w @score,(@dest_ptr)\n        }\n    }\n",
    );
    assert!(asm.contains("move.w score,(a0)"), "{asm}");
    assert!(asm.contains("; @dest_ptr -> a0 (register parameter)"));
    assert!(asm.contains("; @score -> score (global variable)"));
}

#[test]
fn unknown_asm_reference_leaves_a_visible_marker() {
    let asm = assemble("code c:\n    proc f() -> void {\n        asm {\n            move.l @nothing,d0\n        }\n    }\n");
    assert!(asm.contains("???nothing???"), "{asm}");
}

#[test]
fn repeat_lowers_to_dbra_without_a_zero_guard() {
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        var x: int = 0;\n        repeat 0 {\n            x = x + 1;\n        }\n    }\n",
    );
    assert!(asm.contains("subq.l #1,d0"), "count pre-decrements for dbra: {asm}");
    assert!(asm.contains("move.l d0,d7"), "d7 is the dbra counter: {asm}");
    assert!(asm.contains("dbra d7,repeat"), "{asm}");
    assert!(!asm.contains("tst.l d7"), "repeat 0 deliberately has no guard; it runs 65536 times");
}

#[test]
fn power_of_two_division_becomes_a_shift() {
    let asm = assemble("code c:\n    proc f(__reg(d0) a: int) -> int {\n        return a / 8;\n    }\n");
    assert!(asm.contains("asr.l #3,d0"), "divide by 8 is a 3-bit shift: {asm}");
    assert!(!asm.contains("divs.w"));
}

#[test]
fn general_division_and_modulo_use_divs() {
    let asm = assemble(
        "code c:\n    proc f(__reg(d0) a: int, __reg(d1) b: int) -> int {\n        var m: int = 0;\n        m = a % b;\n        return a / b;\n    }\n",
    );
    assert!(asm.contains("divs.w d1,d0"), "{asm}");
    assert!(asm.contains("swap d0"), "modulo takes the upper word: {asm}");
    assert!(asm.contains("ext.l d0"));
}

#[test]
fn multiplication_uses_muls_w() {
    let asm = assemble("code c:\n    proc f(__reg(d0) a: int, __reg(d1) b: int) -> int {\n        return a * b;\n    }\n");
    assert!(asm.contains("muls.w d1,d0"), "{asm}");
}

#[test]
fn push_pop_expand_to_movem_pairs_in_lifo_order() {
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        PUSH(d2, d3, a2);\n        PUSH(d4);\n        POP();\n        POP();\n    }\n",
    );
    assert!(asm.contains("movem.l d2/d3/a2,-(a7)"), "{asm}");
    assert!(asm.contains("movem.l d4,-(a7)"));
    let inner_restore = asm.find("movem.l (a7)+,d4").expect("inner pop first");
    let outer_restore = asm.find("movem.l (a7)+,a2/d3/d2").expect("outer pop reversed");
    assert!(inner_restore < outer_restore, "pops unwind most recent first: {asm}");
}

#[test]
fn internal_call_passes_register_and_stack_arguments() {
    let asm = assemble(
        "code c:\n    proc helper(__reg(d2) v: int, s: int) -> int {\n        return v;\n    }\n    proc caller() -> void {\n        var r: int = 0;\n        r = helper(1, 2);\n    }\n",
    );
    assert!(asm.contains("move.l d2,-(a7)"), "argument register saved around the call: {asm}");
    assert!(asm.contains("move.l #2,-(a7)"), "stack argument pushed: {asm}");
    assert!(asm.contains("jsr helper"));
    assert!(asm.contains("addq.l #4,a7"), "caller cleans one stack slot: {asm}");
    assert!(asm.contains("move.l (a7)+,d2"), "argument register restored: {asm}");
}

#[test]
fn extern_functions_use_stack_only_cdecl_right_to_left() {
    let asm = assemble(
        "code c:\n    extern func ExtThing(a: int, b: int) -> void;\n    proc f() -> void {\n        call ExtThing(1, 2);\n    }\n",
    );
    let second = asm.find("move.l #2,-(a7)").expect("second arg pushed");
    let first = asm.find("move.l #1,-(a7)").expect("first arg pushed");
    assert!(second < first, "arguments push right to left: {asm}");
    assert!(asm.contains("jsr ExtThing"));
    assert!(asm.contains("add.l #8,a7"), "two slots cleaned after the call: {asm}");
}

#[test]
fn array_store_scales_index_by_element_size() {
    let asm = assemble(
        "data d:\n    table.w[8] = { 0,0,0,0,0,0,0,0 }\ncode c:\n    proc f(__reg(d2) i: int) -> void {\n        table[i] = 7;\n    }\n",
    );
    assert!(asm.contains("lea table,a0"), "{asm}");
    assert!(asm.contains("lsl.l #1,d1"), "word elements scale by 2: {asm}");
    assert!(
        asm.contains("move.w #7,(a0,d1.l)"),
        "the immediate feeds the store directly after the peephole fold: {asm}"
    );
}

#[test]
fn constant_index_reads_use_direct_addressing() {
    let asm = assemble(
        "data d:\n    table.l[4] = { 1,2,3,4 }\ncode c:\n    proc f() -> int {\n        return table[2];\n    }\n",
    );
    assert!(asm.contains("move.l table+8,d0"), "constant index folds into the address: {asm}");
}

#[test]
fn struct_member_access_uses_field_equates() {
    let asm = assemble(
        "bss b:\n    struct player { x.l, y.l, hp.w }\ncode c:\n    proc f() -> int {\n        return player.hp;\n    }\n",
    );
    assert!(asm.contains("player_hp equ player+8"), "{asm}");
    assert!(asm.contains("clr.l d0"), "word field read clears the register first: {asm}");
    assert!(asm.contains("move.w player_hp,d0"), "{asm}");
}

#[test]
fn struct_array_access_scales_by_stride() {
    let asm = assemble(
        "bss b:\n    struct enemy[8] { x.l, y.l, hp.w }\ncode c:\n    proc f(__reg(d2) i: int) -> int {\n        return enemy[i].y;\n    }\n",
    );
    // stride is 10 rounded even -> 10? x@0 y@4 hp@8 -> size 10
    assert!(asm.contains("lea enemy,a0"), "{asm}");
    assert!(asm.contains("mulu.w #10,d1"), "non-power-of-two stride multiplies: {asm}");
    assert!(asm.contains("addq.l #4,d1"), "field offset added to the scaled index: {asm}");
    assert!(asm.contains("move.l (a0,d1.l),d0"), "{asm}");
}

#[test]
fn address_of_and_dereference_round_trip() {
    let asm = assemble(
        "code c:\n    proc f() -> int {\n        var v: int = 5;\n        var p: int* = 0;\n        p = &v;\n        return *p;\n    }\n",
    );
    assert!(asm.contains("lea -4(a4),a0"), "address-of a local: {asm}");
    assert!(asm.contains("move.l (a0),d0"), "dereference loads through a0: {asm}");
}

#[test]
fn getreg_and_setreg_move_machine_registers() {
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        var v: int = 0;\n        v = GetReg(\"d3\");\n        SetReg(\"d4\", 5);\n    }\n",
    );
    assert!(asm.contains("move.l d3,d0"), "GetReg reads the named register: {asm}");
    assert!(asm.contains("move.l d1,d4"), "SetReg writes through a temporary: {asm}");
}

#[test]
fn macro_calls_expand_with_argument_substitution() {
    let asm = assemble(
        "macro addto(dst, amount) {\n    dst = dst + amount;\n}\ncode c:\n    proc f() -> void {\n        var total: int = 0;\n        addto(total, 5);\n    }\n",
    );
    assert!(asm.contains("; total = total + 5"), "expansion is visible in comments: {asm}");
    assert!(asm.contains("addq.l #5,d0"), "{asm}");
    assert!(asm.contains("move.l d0,-4(a4)"), "{asm}");
}

#[test]
fn python_block_splices_generated_statements() {
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        var x: int = 0;\n        @python {\n            generated_code = \"x = 40 + 2;\"\n        }\n    }\n",
    );
    assert!(asm.contains("; x = 40 + 2"), "spliced assignment appears: {asm}");
    assert!(asm.contains("#42"), "folded constant lands in the store: {asm}");
}

#[test]
fn python_loop_generates_one_statement_per_iteration() {
    // block bodies end at the first closing brace, so generation scripts
    // inside @python build text without brace syntax
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        var x: int = 0;\n        @python {\n            lines = []\n            for i in range(3):\n                lines.append(\"x = x + \" + str(i) + \";\")\n            generated_code = lines\n        }\n    }\n",
    );
    assert!(asm.contains("; x = x + 0"), "{asm}");
    assert!(asm.contains("; x = x + 1"));
    assert!(asm.contains("; x = x + 2"));
}

#[test]
fn failing_python_block_degrades_to_an_error_comment() {
    let result = compile(
        "code c:\n    proc f() -> void {\n        @python {\n            import os\n        }\n    }\n",
        None,
        true,
    )
    .expect("script failure must not abort compilation");
    assert!(
        result.assembly.contains("; ERROR in @python execution:"),
        "{}",
        result.assembly
    );
}

#[test]
fn missing_template_degrades_to_an_error_comment() {
    let result = compile(
        "code c:\n    proc f() -> void {\n        @template \"definitely_not_here.j2\" { count = 1 };\n    }\n",
        None,
        true,
    )
    .expect("template failure must not abort compilation");
    assert!(
        result.assembly.contains("; ERROR in template rendering:"),
        "{}",
        result.assembly
    );
}

#[test]
fn short_circuit_logic_emits_labelled_test_sequences() {
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        var a: int = 1;\n        var b: int = 0;\n        var c: int = 0;\n        c = a && b;\n    }\n",
    );
    assert!(asm.contains(".and_false_"), "{asm}");
    assert!(asm.contains(".and_done_"), "{asm}");
}

#[test]
fn while_loop_with_condition_inverts_branch() {
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        var i: int = 0;\n        while (i < 10) {\n            i = i + 1;\n        }\n    }\n",
    );
    assert!(asm.contains("cmp.l #10,d0"), "immediate compare: {asm}");
    assert!(asm.contains("bge endwhile"), "inverted exit branch: {asm}");
    assert!(asm.contains("bra while"), "{asm}");
}

#[test]
fn do_while_tests_at_the_bottom() {
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        var i: int = 0;\n        do {\n            i = i + 1;\n        } while (i < 10);\n    }\n",
    );
    assert!(asm.contains("blt dowhile"), "true branch returns to the body top: {asm}");
}

#[test]
fn break_and_continue_use_the_loop_stack() {
    let asm = assemble(
        "code c:\n    proc f() -> void {\n        var i: int = 0;\n        for i = 0 to 9 {\n            if (i == 3) {\n                continue;\n            }\n            if (i == 7) {\n                break;\n            }\n        }\n    }\n",
    );
    assert!(asm.contains("bra forcont"), "continue targets the increment point: {asm}");
    assert!(asm.contains("bra endfor"), "break targets the loop end: {asm}");
}

#[test]
fn global_assignment_uses_declared_width() {
    let asm = assemble(
        "data d:\n    frame_counter.w = 0\ncode c:\n    proc f() -> void {\n        frame_counter = 1;\n    }\n",
    );
    assert!(asm.contains("move.w #1,frame_counter"), "narrow store after peephole fold: {asm}");
}

#[test]
fn warnings_surface_through_compile() {
    let output = compile(
        "code c:\n    proc draw(img_ptr: ptr) -> void {\n    }\n    proc f() -> void {\n        var bob: int = 0;\n        draw(bob);\n    }\n",
        None,
        true,
    )
    .expect("heuristic is a warning, not an error");
    assert!(output.warnings.iter().any(|w| w.contains("&bob")), "{:?}", output.warnings);
}

#[test]
fn no_validate_mode_still_emits_inspectable_output() {
    let output = compile(
        "code c:\n    proc f() -> int {\n        return mystery;\n    }\n",
        None,
        false,
    )
    .expect("validation skipped");
    assert!(output.assembly.contains("; unknown var mystery"), "{}", output.assembly);
    assert!(output.assembly.contains("move.l #0,d0") || output.assembly.contains("moveq #0,d0"));
}

#[test]
fn validation_failure_prevents_code_generation() {
    let err = compile("code c:\n    proc f() -> int {\n        return mystery;\n    }\n", None, true)
        .expect_err("undefined symbol must fail validation");
    assert!(err.to_string().contains("Undefined variable 'mystery'"));
}
