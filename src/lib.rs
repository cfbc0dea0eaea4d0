//! # silt
//!
//! A standalone WebAssembly 1.0 interpreter: it reads a binary module,
//! validates it, pre-processes the code into a fast internal form, and
//! executes exported functions over host-supplied arguments.
//!
//! Untrusted bytecode is safe to run: every soundness guarantee of the Wasm
//! type system is enforced while parsing, so execution itself performs no
//! decoding and no type checks. Runtime failures (out-of-bounds accesses,
//! division by zero, exhausted call depth or instruction budget, explicit
//! `unreachable`) surface as traps that leave the instance usable.
//!
//! ## Pipeline
//!
//! 1. [`parse`] decodes and validates a binary module into a [`Module`],
//!    rewriting every function body into a flat pre-processed form with all
//!    branch targets precomputed.
//! 2. [`instantiate`] matches host-supplied imports (functions, a table, a
//!    memory, globals) against the module, allocates and initializes the
//!    runtime state, runs the start function, and yields an [`InstanceRef`].
//! 3. [`execute`] runs a function of the instance and returns an
//!    [`ExecutionResult`]: a value, nothing, or a trap.
//!
//! ## Example
//!
//! ```rust
//! use silt::{execute, instantiate, parse, ExecutionResult, Value};
//!
//! let wasm = wat::parse_str(
//!     r#"
//!     (module
//!       (func (export "add") (param i32 i32) (result i32)
//!         local.get 0
//!         local.get 1
//!         i32.add))
//!     "#,
//! )
//! .unwrap();
//!
//! let module = parse(&wasm).unwrap();
//! let func_idx = module.find_exported_function("add").unwrap();
//! let instance = instantiate(module, vec![], None, None, vec![]).unwrap();
//!
//! let result = execute(&instance, func_idx, &[Value::I32(20), Value::I32(22)]);
//! assert_eq!(result, ExecutionResult::Value(Value::I32(42)));
//! ```

#![warn(missing_docs)]

use core::fmt;
use std::error;

mod func;
mod global;
mod instance;
mod isa;
mod memory;
mod module;
pub mod nan_preserving_float;
mod parser;
mod runner;
mod stack;
mod table;
mod types;
mod untyped;
mod value;

#[cfg(test)]
mod tests;

pub use self::func::{ExternalFunction, HostContext, HostContextRef, HostFunc, ImportedFunction};
pub use self::global::{GlobalInstance, GlobalRef};
pub use self::instance::{
    find_exported_function, find_exported_global, find_exported_memory, find_exported_table,
    instantiate, instantiate_with_limit, resolve_imported_functions, Instance, InstanceRef,
};
pub use self::memory::{MemoryInstance, MemoryRef, LINEAR_MEMORY_PAGE_SIZE, MEMORY_PAGES_LIMIT};
pub use self::module::{ExternalKind, Module};
pub use self::parser::{parse, validate};
pub use self::runner::{execute, execute_with, ExecutionResult, Meter, CALL_STACK_LIMIT};
pub use self::table::{TableInstance, TableRef};
pub use self::types::{FuncIdx, FuncType, GlobalIdx, GlobalType, Limits, TypeIdx, ValueType};
pub use self::value::{
    ArithmeticOps, Float, Integer, LittleEndianConvert, TrapCode, TryTruncateInto, Value,
};

/// WebAssembly-specific sizes and units.
pub mod memory_units {
    pub use memory_units::wasm32::*;
    pub use memory_units::{size_of, ByteSize, Bytes, RoundUpTo};
}

/// The error type of the engine.
///
/// Parsing, validation and instantiation failures are ordinary values of
/// this type; they are never mixed with [runtime traps](ExecutionResult),
/// which belong to individual invocations.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// The input violates the binary encoding. Reported by [`parse`]; no
    /// partial module is returned.
    Malformed(String),
    /// The module is well-formed but breaks a validation rule. Reported by
    /// [`parse`]; validation runs during parsing.
    Validation(String),
    /// Imports could not be matched, a segment was out of bounds, or the
    /// start function trapped. Reported by [`instantiate`].
    Instantiation(String),
    /// A function was called with mismatching arguments, or cannot be called
    /// through this handle.
    Function(String),
    /// Embedder-facing memory operation failure.
    Memory(String),
    /// Embedder-facing table operation failure.
    Table(String),
    /// Embedder-facing global operation failure.
    Global(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Malformed(s) => write!(f, "Malformed: {s}"),
            Error::Validation(s) => write!(f, "Validation: {s}"),
            Error::Instantiation(s) => write!(f, "Instantiation: {s}"),
            Error::Function(s) => write!(f, "Function: {s}"),
            Error::Memory(s) => write!(f, "Memory: {s}"),
            Error::Table(s) => write!(f, "Table: {s}"),
            Error::Global(s) => write!(f, "Global: {s}"),
        }
    }
}

impl error::Error for Error {}
