//! End-to-end tests driving the whole pipeline: text module → binary →
//! parse → instantiate → execute.

mod execute;

use crate::{execute, instantiate, parse, ExecutionResult, InstanceRef, Module, Value};

fn parse_wat(source: &str) -> Module {
    let wasm = wat::parse_str(source).expect("test module is syntactically valid");
    parse(&wasm).expect("test module is valid")
}

fn instantiate_wat(source: &str) -> InstanceRef {
    instantiate(parse_wat(source), vec![], None, None, vec![])
        .expect("test module instantiates without imports")
}

/// Runs an exported function by name.
fn run(instance: &InstanceRef, name: &str, args: &[Value]) -> ExecutionResult {
    let func_idx = instance
        .module()
        .find_exported_function(name)
        .expect("export exists");
    execute(instance, func_idx, args)
}
