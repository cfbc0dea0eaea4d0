use super::{instantiate_wat, run};
use crate::{ExecutionResult, Value};

#[test]
fn add_two_numbers() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "add") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.add))
        "#,
    );
    assert_eq!(
        run(&instance, "add", &[Value::I32(20), Value::I32(22)]),
        ExecutionResult::Value(Value::I32(42))
    );
    // Wrapping addition.
    assert_eq!(
        run(&instance, "add", &[Value::I32(0x7FFF_FFFF), Value::I32(1)]),
        ExecutionResult::Value(Value::I32(i32::MIN))
    );
}

#[test]
fn signed_division_results_and_traps() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "divs") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.div_s))
        "#,
    );
    assert_eq!(
        run(&instance, "divs", &[Value::I32(84), Value::I32(2)]),
        ExecutionResult::Value(Value::I32(42))
    );
    assert_eq!(
        run(&instance, "divs", &[Value::I32(-7), Value::I32(2)]),
        ExecutionResult::Value(Value::I32(-3))
    );
    assert_eq!(
        run(&instance, "divs", &[Value::I32(1), Value::I32(0)]),
        ExecutionResult::Trap
    );
    assert_eq!(
        run(&instance, "divs", &[Value::I32(i32::MIN), Value::I32(-1)]),
        ExecutionResult::Trap
    );
}

#[test]
fn instance_survives_a_trap() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "divs") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.div_s))
        "#,
    );
    assert_eq!(
        run(&instance, "divs", &[Value::I32(1), Value::I32(0)]),
        ExecutionResult::Trap
    );
    assert_eq!(
        run(&instance, "divs", &[Value::I32(84), Value::I32(2)]),
        ExecutionResult::Value(Value::I32(42))
    );
}

#[test]
fn remainder_edge_cases() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "rems") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.rem_s)
          (func (export "remu") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.rem_u))
        "#,
    );
    // The overflow case returns 0 instead of trapping.
    assert_eq!(
        run(&instance, "rems", &[Value::I32(i32::MIN), Value::I32(-1)]),
        ExecutionResult::Value(Value::I32(0))
    );
    assert_eq!(
        run(&instance, "rems", &[Value::I32(-7), Value::I32(3)]),
        ExecutionResult::Value(Value::I32(-1))
    );
    assert_eq!(
        run(&instance, "rems", &[Value::I32(7), Value::I32(0)]),
        ExecutionResult::Trap
    );
    assert_eq!(
        run(&instance, "remu", &[Value::I32(-1), Value::I32(10)]),
        ExecutionResult::Value(Value::I32(5))
    );
    assert_eq!(
        run(&instance, "remu", &[Value::I32(1), Value::I32(0)]),
        ExecutionResult::Trap
    );
}

#[test]
fn shifts_and_rotates_mask_the_count() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "shl") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.shl)
          (func (export "shru") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.shr_u)
          (func (export "shrs") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.shr_s)
          (func (export "rotl64") (param i64 i64) (result i64)
            local.get 0
            local.get 1
            i64.rotl))
        "#,
    );
    assert_eq!(
        run(&instance, "shl", &[Value::I32(1), Value::I32(33)]),
        ExecutionResult::Value(Value::I32(2))
    );
    assert_eq!(
        run(&instance, "shru", &[Value::I32(-1), Value::I32(31)]),
        ExecutionResult::Value(Value::I32(1))
    );
    assert_eq!(
        run(&instance, "shrs", &[Value::I32(-8), Value::I32(2)]),
        ExecutionResult::Value(Value::I32(-2))
    );
    assert_eq!(
        run(&instance, "rotl64", &[Value::I64(1), Value::I64(65)]),
        ExecutionResult::Value(Value::I64(2))
    );
}

#[test]
fn bit_counting() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "clz") (param i32) (result i32)
            local.get 0
            i32.clz)
          (func (export "ctz") (param i32) (result i32)
            local.get 0
            i32.ctz)
          (func (export "popcnt") (param i64) (result i64)
            local.get 0
            i64.popcnt))
        "#,
    );
    assert_eq!(
        run(&instance, "clz", &[Value::I32(0)]),
        ExecutionResult::Value(Value::I32(32))
    );
    assert_eq!(
        run(&instance, "clz", &[Value::I32(1)]),
        ExecutionResult::Value(Value::I32(31))
    );
    assert_eq!(
        run(&instance, "ctz", &[Value::I32(0)]),
        ExecutionResult::Value(Value::I32(32))
    );
    assert_eq!(
        run(&instance, "ctz", &[Value::I32(8)]),
        ExecutionResult::Value(Value::I32(3))
    );
    assert_eq!(
        run(&instance, "popcnt", &[Value::I64(-1)]),
        ExecutionResult::Value(Value::I64(64))
    );
}

#[test]
fn locals_are_zero_initialized() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "local_sum") (param i32) (result i32)
            (local i32)
            local.get 0
            local.get 1
            i32.add))
        "#,
    );
    assert_eq!(
        run(&instance, "local_sum", &[Value::I32(5)]),
        ExecutionResult::Value(Value::I32(5))
    );
}

#[test]
fn local_set_and_tee() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "double_tee") (param i32) (result i32)
            (local i32)
            local.get 0
            local.tee 1
            local.get 1
            i32.add))
        "#,
    );
    assert_eq!(
        run(&instance, "double_tee", &[Value::I32(21)]),
        ExecutionResult::Value(Value::I32(42))
    );
}

#[test]
fn globals_persist_between_calls() {
    let instance = instantiate_wat(
        r#"
        (module
          (global $counter (mut i32) (i32.const 0))
          (func (export "bump") (result i32)
            global.get $counter
            i32.const 1
            i32.add
            global.set $counter
            global.get $counter))
        "#,
    );
    assert_eq!(
        run(&instance, "bump", &[]),
        ExecutionResult::Value(Value::I32(1))
    );
    assert_eq!(
        run(&instance, "bump", &[]),
        ExecutionResult::Value(Value::I32(2))
    );
}

#[test]
fn select_picks_by_condition() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "pick") (param i32) (result i64)
            i64.const 111
            i64.const 222
            local.get 0
            select))
        "#,
    );
    assert_eq!(
        run(&instance, "pick", &[Value::I32(1)]),
        ExecutionResult::Value(Value::I64(111))
    );
    assert_eq!(
        run(&instance, "pick", &[Value::I32(0)]),
        ExecutionResult::Value(Value::I64(222))
    );
}

#[test]
fn integer_conversions() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "wrap") (param i64) (result i32)
            local.get 0
            i32.wrap_i64)
          (func (export "extend_s") (param i32) (result i64)
            local.get 0
            i64.extend_i32_s)
          (func (export "extend_u") (param i32) (result i64)
            local.get 0
            i64.extend_i32_u))
        "#,
    );
    assert_eq!(
        run(&instance, "wrap", &[Value::I64(0x1_0000_0002)]),
        ExecutionResult::Value(Value::I32(2))
    );
    assert_eq!(
        run(&instance, "extend_s", &[Value::I32(-1)]),
        ExecutionResult::Value(Value::I64(-1))
    );
    assert_eq!(
        run(&instance, "extend_u", &[Value::I32(-1)]),
        ExecutionResult::Value(Value::I64(0xFFFF_FFFF))
    );
}

#[test]
fn i64_comparisons_produce_i32() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "lt_u") (param i64 i64) (result i32)
            local.get 0
            local.get 1
            i64.lt_u)
          (func (export "eqz") (param i64) (result i32)
            local.get 0
            i64.eqz))
        "#,
    );
    assert_eq!(
        run(&instance, "lt_u", &[Value::I64(-1), Value::I64(1)]),
        ExecutionResult::Value(Value::I32(0))
    );
    assert_eq!(
        run(&instance, "lt_u", &[Value::I64(1), Value::I64(2)]),
        ExecutionResult::Value(Value::I32(1))
    );
    assert_eq!(
        run(&instance, "eqz", &[Value::I64(0)]),
        ExecutionResult::Value(Value::I32(1))
    );
}

#[test]
fn void_function_returns_nothing() {
    let instance = instantiate_wat(
        r#"
        (module
          (func (export "nothing") (param i32)
            local.get 0
            drop))
        "#,
    );
    assert_eq!(
        run(&instance, "nothing", &[Value::I32(1)]),
        ExecutionResult::Void
    );
}
