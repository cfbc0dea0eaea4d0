use crate::isa::Instr;
use crate::module::Module;
use crate::parser::{parse, validate};
use crate::types::ValueType;
use crate::Error;
use assert_matches::assert_matches;

const PREFIX: [u8; 8] = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];

fn leb(mut value: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            bytes.push(byte);
            return bytes;
        }
        bytes.push(byte | 0x80);
    }
}

fn section(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![id];
    bytes.extend(leb(payload.len() as u32));
    bytes.extend_from_slice(payload);
    bytes
}

fn module_bytes(sections: &[Vec<u8>]) -> Vec<u8> {
    let mut bytes = PREFIX.to_vec();
    for s in sections {
        bytes.extend_from_slice(s);
    }
    bytes
}

fn parse_wat(source: &str) -> Module {
    parse(&wat::parse_str(source).unwrap()).unwrap()
}

#[test]
fn empty_module() {
    let module = parse(&PREFIX).unwrap();
    assert_eq!(module.function_count(), 0);
    assert!(!module.has_memory());
    assert!(!module.has_table());
}

#[test]
fn rejects_bad_prefix() {
    assert_matches!(
        parse(b"\0asm"),
        Err(Error::Malformed(msg)) if msg == "invalid wasm module prefix"
    );
    assert_matches!(
        parse(&[0x00, 0x61, 0x73, 0x6D, 0x02, 0x00, 0x00, 0x00]),
        Err(Error::Malformed(_))
    );
    assert!(!validate(b""));
}

#[test]
fn custom_sections_are_skipped_anywhere() {
    // id 0, size 5, name "ab", two content bytes.
    let custom = section(0, &[0x02, b'a', b'b', 0xAA, 0xBB]);
    let types = section(1, &[0x00]);
    let bytes = module_bytes(&[custom.clone(), types, custom.clone(), custom]);
    assert!(validate(&bytes));
}

#[test]
fn custom_section_name_must_fit_in_section() {
    // Declared size 1, but the name length prefix says 5 bytes follow.
    let bytes = module_bytes(&[section(0, &[0x05])]);
    assert_matches!(parse(&bytes), Err(Error::Malformed(_)));
}

#[test]
fn rejects_out_of_order_sections() {
    let types = section(1, &[0x00]);
    let memory = section(5, &[0x00]);
    let bytes = module_bytes(&[memory, types]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Malformed(msg)) if msg == "unexpected out-of-order section type"
    );
}

#[test]
fn rejects_repeated_section() {
    let types = section(1, &[0x00]);
    let bytes = module_bytes(&[types.clone(), types]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Malformed(msg)) if msg == "unexpected out-of-order section type"
    );
}

#[test]
fn rejects_unknown_section_id() {
    let bytes = module_bytes(&[section(12, &[])]);
    assert_matches!(parse(&bytes), Err(Error::Malformed(msg)) if msg == "invalid section id 12");
}

#[test]
fn rejects_section_size_mismatch() {
    // A type section declaring zero entries but a size of 2.
    let mut bad = vec![0x01];
    bad.extend(leb(2));
    bad.push(0x00);
    bad.push(0x00); // trailing garbage inside the declared size
    let bytes = module_bytes(&[bad]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Malformed(msg)) if msg.starts_with("incorrect section 1 size, difference:")
    );
}

#[test]
fn rejects_functype_without_marker() {
    // One type entry starting with 0x59 instead of 0x60.
    let payload = [vec![0x01], vec![0x59, 0x00, 0x00]].concat();
    let bytes = module_bytes(&[section(1, &payload)]);
    assert_matches!(parse(&bytes), Err(Error::Malformed(_)));
}

#[test]
fn rejects_multi_result_function_type() {
    // (func (result i32 i32))
    let payload = [vec![0x01], vec![0x60, 0x00, 0x02, 0x7F, 0x7F]].concat();
    let bytes = module_bytes(&[section(1, &payload)]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg == "function type has more than one result"
    );
}

#[test]
fn rejects_function_without_code() {
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    let bytes = module_bytes(&[types, funcs]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Malformed(msg)) if msg == "inconsistent function and code section lengths"
    );
}

#[test]
fn rejects_code_count_mismatch() {
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    // Two bodies declared for one function.
    let body = [leb(2), vec![0x00, 0x0B]].concat();
    let code = section(10, &[vec![0x02], body.clone(), body].concat());
    let bytes = module_bytes(&[types, funcs, code]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Malformed(msg)) if msg == "inconsistent function and code section lengths"
    );
}

#[test]
fn rejects_incorrect_body_size() {
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    // Declared body size 3, actual body is two bytes (no locals + end).
    let code_payload = [vec![0x01], leb(3), vec![0x00, 0x0B]].concat();
    let code = section(10, &code_payload);
    let bytes = module_bytes(&[types, funcs, code]);
    assert_matches!(parse(&bytes), Err(Error::Malformed(_)));
}

#[test]
fn rejects_invalid_limits_flags() {
    let memory = section(5, &[0x01, 0x02, 0x01]);
    let bytes = module_bytes(&[memory]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Malformed(msg)) if msg == "invalid limits flags 2"
    );
}

#[test]
fn rejects_limits_min_above_max() {
    // flags 1, min 2, max 1.
    let memory = section(5, &[0x01, 0x01, 0x02, 0x01]);
    let bytes = module_bytes(&[memory]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg == "invalid limits: min is above max"
    );
}

#[test]
fn rejects_memory_above_hard_limit() {
    // min = 4097 pages.
    let payload = [vec![0x01, 0x00], leb(4097)].concat();
    let bytes = module_bytes(&[section(5, &payload)]);
    assert_matches!(parse(&bytes), Err(Error::Validation(_)));
}

#[test]
fn rejects_multiple_memories_and_tables() {
    let memories = section(5, &[0x02, 0x00, 0x01, 0x00, 0x01]);
    assert_matches!(
        parse(&module_bytes(&[memories])),
        Err(Error::Validation(msg)) if msg == "multiple memories"
    );

    let tables = section(4, &[0x02, 0x70, 0x00, 0x01, 0x70, 0x00, 0x01]);
    assert_matches!(
        parse(&module_bytes(&[tables])),
        Err(Error::Validation(msg)) if msg == "multiple tables"
    );
}

#[test]
fn rejects_invalid_table_element_type() {
    let table = section(4, &[0x01, 0x6F, 0x00, 0x01]);
    assert_matches!(parse(&module_bytes(&[table])), Err(Error::Malformed(_)));
}

#[test]
fn rejects_import_with_bad_kind() {
    // module "m", field "f", kind 4.
    let payload = [vec![0x01, 0x01, b'm', 0x01, b'f', 0x04]].concat();
    let bytes = module_bytes(&[section(2, &payload)]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Malformed(msg)) if msg == "invalid import kind 4"
    );
}

#[test]
fn rejects_non_utf8_import_name() {
    let payload = [vec![0x01, 0x01, 0xFF, 0x01, b'f', 0x00, 0x00]].concat();
    let bytes = module_bytes(&[section(2, &payload)]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Malformed(msg)) if msg == "invalid UTF-8 string"
    );
}

#[test]
fn rejects_duplicate_export_names() {
    // Two functions both exported under the name "f"; the text format
    // cannot express this, so build the binary by hand.
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x02, 0x00, 0x00]);
    let exports = section(7, &[0x02, 0x01, b'f', 0x00, 0x00, 0x01, b'f', 0x00, 0x01]);
    let body = [leb(2), vec![0x00, 0x0B]].concat();
    let code = section(10, &[vec![0x02], body.clone(), body].concat());
    let bytes = module_bytes(&[types, funcs, exports, code]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg == "duplicate export name f"
    );
}

#[test]
fn rejects_export_of_missing_index() {
    let exports = section(7, &[0x01, 0x01, b'f', 0x00, 0x00]);
    let bytes = module_bytes(&[exports]);
    assert_matches!(parse(&bytes), Err(Error::Validation(_)));
}

#[test]
fn rejects_start_function_with_inputs() {
    let types = section(1, &[0x01, 0x60, 0x01, 0x7F, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    let start = section(8, &[0x00]);
    let body = [leb(2), vec![0x00, 0x0B]].concat();
    let code = section(10, &[vec![0x01], body].concat());
    let bytes = module_bytes(&[types, funcs, start, code]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg == "start function must have no inputs and no outputs"
    );
}

#[test]
fn rejects_element_segment_without_table() {
    // One element segment for table 0 in a module with no table.
    let elements = section(9, &[0x01, 0x00, 0x41, 0x00, 0x0B, 0x00]);
    let bytes = module_bytes(&[elements]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg == "element segment requires a table"
    );
}

#[test]
fn rejects_data_segment_without_memory() {
    let data = section(11, &[0x01, 0x00, 0x41, 0x00, 0x0B, 0x01, 0xAA]);
    let bytes = module_bytes(&[data]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg == "data segment requires a memory"
    );
}

#[test]
fn rejects_nonzero_segment_indices() {
    let table = section(4, &[0x01, 0x70, 0x00, 0x01]);
    let elements = section(9, &[0x01, 0x01, 0x41, 0x00, 0x0B, 0x00]);
    assert_matches!(
        parse(&module_bytes(&[table, elements])),
        Err(Error::Validation(msg)) if msg == "invalid table index 1"
    );

    let memory = section(5, &[0x01, 0x00, 0x01]);
    let data = section(11, &[0x01, 0x01, 0x41, 0x00, 0x0B, 0x00]);
    assert_matches!(
        parse(&module_bytes(&[memory, data])),
        Err(Error::Validation(msg)) if msg == "invalid memory index 1"
    );
}

// Constant expressions.

#[test]
fn global_initializer_must_be_constant() {
    // A global initialized with i32.add.
    let globals = section(6, &[0x01, 0x7F, 0x00, 0x6A, 0x0B]);
    assert_matches!(
        parse(&module_bytes(&[globals])),
        Err(Error::Validation(msg)) if msg == "unexpected instruction in the constant expression"
    );
}

#[test]
fn global_initializer_type_must_match() {
    // (global i32 (i64.const 0))
    let globals = section(6, &[0x01, 0x7F, 0x00, 0x42, 0x00, 0x0B]);
    assert_matches!(
        parse(&module_bytes(&[globals])),
        Err(Error::Validation(msg)) if msg.starts_with("type mismatch in constant expression")
    );
}

#[test]
fn global_initializer_may_read_imported_const_global() {
    let source = r#"
        (module
          (import "env" "g" (global i32))
          (global i32 (global.get 0))
        )
    "#;
    let module = parse_wat(source);
    assert_eq!(module.globalsec.len(), 1);
}

#[test]
fn global_initializer_rejects_local_global_reference() {
    // Two locally defined globals, the second reading the first.
    let globals = section(
        6,
        &[0x02, 0x7F, 0x00, 0x41, 0x00, 0x0B, 0x7F, 0x00, 0x23, 0x00, 0x0B],
    );
    assert_matches!(
        parse(&module_bytes(&[globals])),
        Err(Error::Validation(msg))
            if msg == "constant expression can use global.get only for imported globals"
    );
}

#[test]
fn global_initializer_rejects_mutable_imported_global() {
    let imports = section(2, &[0x01, 0x01, b'm', 0x01, b'g', 0x03, 0x7F, 0x01]);
    let globals = section(6, &[0x01, 0x7F, 0x00, 0x23, 0x00, 0x0B]);
    assert_matches!(
        parse(&module_bytes(&[imports, globals])),
        Err(Error::Validation(msg))
            if msg == "constant expression can use global.get only for const globals"
    );
}

// Expression validation.

#[test]
fn rejects_stack_underflow() {
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    // body: i32.add with an empty stack.
    let body = [leb(4), vec![0x00, 0x6A, 0x1A, 0x0B]].concat();
    let code = section(10, &[vec![0x01], body].concat());
    let bytes = module_bytes(&[types, funcs, code]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg == "stack underflow"
    );
}

#[test]
fn rejects_operand_type_mismatch() {
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    // body: i32.const 0; i64.const 0; i32.add; drop; end
    let body_code = vec![0x00, 0x41, 0x00, 0x42, 0x00, 0x6A, 0x1A, 0x0B];
    let body = [leb(body_code.len() as u32), body_code].concat();
    let code = section(10, &[vec![0x01], body].concat());
    let bytes = module_bytes(&[types, funcs, code]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg.starts_with("type mismatch")
    );
}

#[test]
fn rejects_missing_result_value() {
    // (func (result i32)) with an empty body.
    let types = section(1, &[0x01, 0x60, 0x00, 0x01, 0x7F]);
    let funcs = section(3, &[0x01, 0x00]);
    let body = [leb(2), vec![0x00, 0x0B]].concat();
    let code = section(10, &[vec![0x01], body].concat());
    let bytes = module_bytes(&[types, funcs, code]);
    assert_matches!(parse(&bytes), Err(Error::Validation(_)));
}

#[test]
fn rejects_invalid_label_index() {
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    // body: br 1; end. Only the function frame exists.
    let body = [leb(4), vec![0x00, 0x0C, 0x01, 0x0B]].concat();
    let code = section(10, &[vec![0x01], body].concat());
    let bytes = module_bytes(&[types, funcs, code]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg == "invalid label index"
    );
}

#[test]
fn rejects_else_outside_if() {
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    let body = [leb(3), vec![0x00, 0x05, 0x0B]].concat();
    let code = section(10, &[vec![0x01], body].concat());
    let bytes = module_bytes(&[types, funcs, code]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Malformed(msg)) if msg == "unexpected else instruction (if instruction missing)"
    );
}

#[test]
fn rejects_if_with_result_but_no_else() {
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    // body: i32.const 1; if (result i32); i32.const 2; end; drop; end
    let body_code = vec![0x00, 0x41, 0x01, 0x04, 0x7F, 0x41, 0x02, 0x0B, 0x1A, 0x0B];
    let body = [leb(body_code.len() as u32), body_code].concat();
    let code = section(10, &[vec![0x01], body].concat());
    let bytes = module_bytes(&[types, funcs, code]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg == "if without else must have an empty result type"
    );
}

#[test]
fn rejects_invalid_instruction() {
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    let body = [leb(3), vec![0x00, 0x06, 0x0B]].concat();
    let code = section(10, &[vec![0x01], body].concat());
    let bytes = module_bytes(&[types, funcs, code]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Malformed(msg)) if msg == "invalid instruction 6"
    );
}

#[test]
fn rejects_call_indirect_without_table() {
    let source = "(module (func (result i32) i32.const 0 call_indirect (result i32)))";
    let wasm = wat::parse_str(source).unwrap();
    assert_matches!(
        parse(&wasm),
        Err(Error::Validation(msg)) if msg == "call_indirect requires a table"
    );
}

#[test]
fn rejects_memory_access_without_memory() {
    let source = "(module (func (result i32) i32.const 0 i32.load))";
    let wasm = wat::parse_str(source).unwrap();
    assert_matches!(
        parse(&wasm),
        Err(Error::Validation(msg)) if msg == "memory instructions require imported or defined memory"
    );
}

#[test]
fn rejects_overaligned_access() {
    let source = "(module (memory 1) (func (result i32) i32.const 0 i32.load align=8))";
    let wasm = wat::parse_str(source).unwrap();
    assert_matches!(
        parse(&wasm),
        Err(Error::Validation(msg)) if msg == "invalid alignment"
    );
}

#[test]
fn rejects_set_of_immutable_global() {
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    let globals = section(6, &[0x01, 0x7F, 0x00, 0x41, 0x00, 0x0B]);
    // body: i32.const 1; global.set 0; end
    let body_code = vec![0x00, 0x41, 0x01, 0x24, 0x00, 0x0B];
    let body = [leb(body_code.len() as u32), body_code].concat();
    let code = section(10, &[vec![0x01], body].concat());
    let bytes = module_bytes(&[types, funcs, globals, code]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg == "cannot modify immutable global 0"
    );
}

#[test]
fn rejects_select_with_mismatching_operands() {
    let source = "(module (func (result i32)
        i32.const 0 i64.const 1 i32.const 1 select drop i32.const 0))";
    let wasm = wat::parse_str(source).unwrap();
    assert_matches!(parse(&wasm), Err(Error::Validation(_)));
}

#[test]
fn rejects_too_many_locals() {
    let types = section(1, &[0x01, 0x60, 0x00, 0x00]);
    let funcs = section(3, &[0x01, 0x00]);
    // Two groups of 0x80000000 i32 locals overflow the u32 total.
    let body_code = [
        vec![0x02],
        leb(0x8000_0000u32),
        vec![0x7F],
        leb(0x8000_0000u32),
        vec![0x7F, 0x0B],
    ]
    .concat();
    let body = [leb(body_code.len() as u32), body_code].concat();
    let code = section(10, &[vec![0x01], body].concat());
    let bytes = module_bytes(&[types, funcs, code]);
    assert_matches!(
        parse(&bytes),
        Err(Error::Validation(msg)) if msg == "too many locals"
    );
}

// Pre-processing.

#[test]
fn preprocesses_flat_body() {
    let module = parse_wat(
        r#"
        (module
          (func (export "add") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.add))
        "#,
    );
    let code = &module.codesec[0];
    assert_eq!(
        code.instructions,
        vec![Instr::LocalGet, Instr::LocalGet, Instr::I32Add, Instr::End]
    );
    // Two u32 local indices and nothing else.
    assert_eq!(code.immediates, vec![0, 0, 0, 0, 1, 0, 0, 0]);
    assert_eq!(code.local_count, 0);
    assert_eq!(code.max_stack_height, 2);
}

#[test]
fn preprocesses_local_declarations() {
    let module = parse_wat("(module (func (param i32) (local i64 f64) nop))");
    let code = &module.codesec[0];
    assert_eq!(code.local_count, 2);
    assert_eq!(code.instructions, vec![Instr::Nop, Instr::End]);
}

#[test]
fn branch_record_of_forward_branch_is_backpatched() {
    let module = parse_wat(
        r#"
        (module
          (func (export "f") (result i32)
            block (result i32)
              i32.const 1
              br 0
            end))
        "#,
    );
    let code = &module.codesec[0];
    // block arity byte + end pair, i32.const, branch record.
    assert_eq!(
        code.instructions,
        vec![Instr::Block, Instr::I32Const, Instr::Br, Instr::End, Instr::End]
    );
    // The branch record sits after: arity(1) + end pair(8) + const(4).
    let record = &code.immediates[13..26];
    let target_pc = u32::from_le_bytes(record[0..4].try_into().unwrap());
    let target_imm = u32::from_le_bytes(record[4..8].try_into().unwrap());
    let drop = u32::from_le_bytes(record[8..12].try_into().unwrap());
    let arity = record[12];
    // Right after the inner `end`.
    assert_eq!(target_pc, 4);
    assert_eq!(target_imm, code.immediates.len() as u32);
    assert_eq!(drop, 0);
    assert_eq!(arity, 1);
}

#[test]
fn max_stack_height_tracks_the_deepest_point() {
    let module = parse_wat(
        r#"
        (module
          (func (result i32)
            i32.const 1
            i32.const 2
            i32.const 3
            i32.add
            i32.add))
        "#,
    );
    assert_eq!(module.codesec[0].max_stack_height, 3);
}

#[test]
fn parses_i32_const_sign_extended() {
    let module = parse_wat("(module (func (result i32) i32.const -1))");
    let code = &module.codesec[0];
    assert_eq!(code.instructions, vec![Instr::I32Const, Instr::End]);
    assert_eq!(code.immediates, vec![0xFF, 0xFF, 0xFF, 0xFF]);
}

#[test]
fn validates_value_types() {
    assert_eq!(ValueType::from_byte(0x7F), Some(ValueType::I32));
    let types = section(1, &[0x01, 0x60, 0x01, 0x7B, 0x00]);
    assert_matches!(parse(&module_bytes(&[types])), Err(Error::Validation(_)));
}
