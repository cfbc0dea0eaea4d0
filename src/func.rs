use crate::instance::{Instance, InstanceRef};
use crate::runner::{self, ExecutionResult, Meter, CALL_STACK_LIMIT};
use crate::types::{FuncIdx, FuncType, ValueType};
use crate::value::Value;
use crate::Error;
use downcast_rs::{impl_downcast, Downcast};
use std::rc::{Rc, Weak};

/// State an embedder attaches to its host functions.
///
/// Host functions are plain function pointers, so per-host state travels in a
/// shared, downcastable context handle instead of a closure environment. The
/// host recovers its concrete type with [`Downcast::downcast_ref`].
pub trait HostContext: Downcast {}
impl_downcast!(HostContext);

/// Shared handle to a [`HostContext`].
pub type HostContextRef = Rc<dyn HostContext>;

/// Signature of a host function.
///
/// The function receives its context (if any), the instance whose code is
/// calling it, the arguments in declaration order, the current call depth and
/// the active instruction meter. A host that re-enters the interpreter must
/// pass `depth + 1` and forward the meter.
pub type HostFunc = fn(
    context: Option<&HostContextRef>,
    caller: &InstanceRef,
    args: &[Value],
    depth: u32,
    meter: Option<&Meter>,
) -> ExecutionResult;

/// A named host function offered to [`resolve_imported_functions`]
/// (matched against the module's imports by module and field name).
///
/// [`resolve_imported_functions`]: crate::resolve_imported_functions
pub struct ImportedFunction {
    /// Module name the function is provided under.
    pub module: String,
    /// Field name the function is provided under.
    pub name: String,
    /// Parameter types of the function.
    pub inputs: Vec<ValueType>,
    /// Result type of the function.
    pub output: Option<ValueType>,
    /// The host entry point.
    pub func: HostFunc,
    /// Optional state passed back to `func` on every call.
    pub context: Option<HostContextRef>,
}

/// A function value crossing the engine boundary: a host function, an
/// imported function, an exported function, or a table slot.
///
/// Guest-backed functions normally hold a weak back-reference to their
/// instance (the instance owns the table that holds them, and must stay alive
/// for them to be callable). When table slots have to outlive a failed
/// instantiation they are pinned with shared ownership instead.
#[derive(Clone)]
pub struct ExternalFunction {
    kind: FuncKind,
    func_type: FuncType,
}

#[derive(Clone)]
enum FuncKind {
    Host {
        func: HostFunc,
        context: Option<HostContextRef>,
    },
    Wasm {
        instance: Weak<Instance>,
        func_idx: FuncIdx,
    },
    WasmPinned {
        instance: InstanceRef,
        func_idx: FuncIdx,
    },
}

impl core::fmt::Debug for ExternalFunction {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ExternalFunction")
            .field("func_type", &self.func_type)
            .finish()
    }
}

impl ExternalFunction {
    /// Wraps a host function of the given type.
    pub fn host(func: HostFunc, context: Option<HostContextRef>, func_type: FuncType) -> Self {
        ExternalFunction {
            kind: FuncKind::Host { func, context },
            func_type,
        }
    }

    /// A function of `instance`, referenced weakly.
    pub(crate) fn wasm(instance: &InstanceRef, func_idx: FuncIdx, func_type: FuncType) -> Self {
        ExternalFunction {
            kind: FuncKind::Wasm {
                instance: instance.downgrade(),
                func_idx,
            },
            func_type,
        }
    }

    /// A function of `instance`, keeping the instance alive.
    pub(crate) fn pinned(instance: InstanceRef, func_idx: FuncIdx, func_type: FuncType) -> Self {
        ExternalFunction {
            kind: FuncKind::WasmPinned { instance, func_idx },
            func_type,
        }
    }

    /// The type of this function.
    pub fn func_type(&self) -> &FuncType {
        &self.func_type
    }

    /// Invokes the function without checking the arguments; used by the
    /// execution loop where validation has already done so.
    pub(crate) fn invoke(
        &self,
        caller: &InstanceRef,
        args: &[Value],
        depth: u32,
        meter: Option<&Meter>,
    ) -> ExecutionResult {
        match &self.kind {
            FuncKind::Host { func, context } => {
                // The depth guard applies to every call, host or guest.
                if depth >= CALL_STACK_LIMIT {
                    return ExecutionResult::Trap;
                }
                func(context.as_ref(), caller, args, depth, meter)
            }
            FuncKind::Wasm { instance, func_idx } => match instance.upgrade() {
                Some(instance) => runner::execute_with(
                    &InstanceRef::from_rc(instance),
                    *func_idx,
                    args,
                    depth,
                    meter,
                ),
                // The owning instance is gone; the function cannot run.
                None => ExecutionResult::Trap,
            },
            FuncKind::WasmPinned { instance, func_idx } => {
                runner::execute_with(instance, *func_idx, args, depth, meter)
            }
        }
    }

    /// Calls the function with checked arguments.
    ///
    /// # Errors
    ///
    /// Argument count or type disagreements are caller errors reported as
    /// `Err`, never as traps. Host-backed functions cannot be entered through
    /// this path because they require a calling instance.
    pub fn call(
        &self,
        args: &[Value],
        depth: u32,
        meter: Option<&Meter>,
    ) -> Result<ExecutionResult, Error> {
        let params = self.func_type.params();
        if args.len() != params.len() {
            return Err(Error::Function(format!(
                "expected {} arguments, got {}",
                params.len(),
                args.len()
            )));
        }
        for (i, (arg, param)) in args.iter().zip(params).enumerate() {
            if arg.value_type() != *param {
                return Err(Error::Function(format!(
                    "argument {i} has type {}, expected {param}",
                    arg.value_type()
                )));
            }
        }

        match &self.kind {
            FuncKind::Host { .. } => Err(Error::Function(
                "host function can only be invoked by a calling instance".into(),
            )),
            FuncKind::Wasm { instance, func_idx } => {
                let instance = instance.upgrade().ok_or_else(|| {
                    Error::Function("the function's instance is no longer alive".into())
                })?;
                Ok(runner::execute_with(
                    &InstanceRef::from_rc(instance),
                    *func_idx,
                    args,
                    depth,
                    meter,
                ))
            }
            FuncKind::WasmPinned { instance, func_idx } => {
                Ok(runner::execute_with(instance, *func_idx, args, depth, meter))
            }
        }
    }
}
