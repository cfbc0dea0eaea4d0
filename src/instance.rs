use crate::func::{ExternalFunction, ImportedFunction};
use crate::global::{GlobalInstance, GlobalRef};
use crate::memory::{MemoryInstance, MemoryRef, LINEAR_MEMORY_PAGE_SIZE, MEMORY_PAGES_LIMIT};
use crate::module::{ConstantExpression, ExternalKind, ImportKind, Module};
use crate::runner;
use crate::table::{TableInstance, TableRef};
use crate::types::{GlobalIdx, Limits};
use crate::Error;
use std::rc::{Rc, Weak};

/// Reference to an [`Instance`] with reference-counting semantics.
///
/// Table slots, exported functions and re-entrant host calls all share the
/// instance, so the instance lives as long as anything that can still run
/// its code.
#[derive(Clone, Debug)]
pub struct InstanceRef(Rc<Instance>);

impl ::core::ops::Deref for InstanceRef {
    type Target = Instance;
    fn deref(&self) -> &Instance {
        &self.0
    }
}

impl InstanceRef {
    pub(crate) fn from_rc(instance: Rc<Instance>) -> InstanceRef {
        InstanceRef(instance)
    }

    pub(crate) fn downgrade(&self) -> Weak<Instance> {
        Rc::downgrade(&self.0)
    }
}

/// A module together with its runtime state: memory, table, globals and the
/// resolved imports. The unit of execution.
///
/// The embedded [`Module`] is immutable; during execution only memory
/// contents, global values and table slots change.
#[derive(Debug)]
pub struct Instance {
    module: Module,
    memory: Option<MemoryRef>,
    table: Option<TableRef>,
    globals: Vec<GlobalRef>,
    imported_functions: Vec<ExternalFunction>,
    imported_globals: Vec<GlobalRef>,
}

impl Instance {
    /// The module this instance was created from.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// The instance's linear memory, owned or imported.
    pub fn memory(&self) -> Option<&MemoryRef> {
        self.memory.as_ref()
    }

    /// The instance's table, owned or imported.
    pub fn table(&self) -> Option<&TableRef> {
        self.table.as_ref()
    }

    pub(crate) fn imported_functions(&self) -> &[ExternalFunction] {
        &self.imported_functions
    }

    /// Resolves a global index (imports first) to its storage.
    pub(crate) fn global(&self, idx: GlobalIdx) -> &GlobalRef {
        let idx = idx as usize;
        let imported = self.imported_globals.len();
        if idx < imported {
            &self.imported_globals[idx]
        } else {
            &self.globals[idx - imported]
        }
    }
}

fn instantiate_error(message: impl Into<String>) -> Error {
    Error::Instantiation(message.into())
}

/// Instantiates a module with the default hard memory limit.
///
/// The externals must match the module's imports in count, order and type.
///
/// # Errors
///
/// Returns `Err` on any import mismatch, on an out-of-bounds data or element
/// segment (before any memory or table is written), or when the start
/// function traps.
pub fn instantiate(
    module: Module,
    imported_functions: Vec<ExternalFunction>,
    imported_table: Option<TableRef>,
    imported_memory: Option<MemoryRef>,
    imported_globals: Vec<GlobalRef>,
) -> Result<InstanceRef, Error> {
    instantiate_with_limit(
        module,
        imported_functions,
        imported_table,
        imported_memory,
        imported_globals,
        MEMORY_PAGES_LIMIT,
    )
}

/// Instantiates a module with an explicit hard memory limit in pages.
///
/// See [`instantiate`].
pub fn instantiate_with_limit(
    module: Module,
    imported_functions: Vec<ExternalFunction>,
    imported_table: Option<TableRef>,
    imported_memory: Option<MemoryRef>,
    imported_globals: Vec<GlobalRef>,
    memory_pages_limit: u32,
) -> Result<InstanceRef, Error> {
    debug_assert_eq!(module.funcsec.len(), module.codesec.len());

    match_imported_functions(&module, &imported_functions)?;
    match_imported_table(&module, &imported_table)?;
    match_imported_memory(&module, &imported_memory, memory_pages_limit)?;
    match_imported_globals(&module, &imported_globals)?;

    // Initialize globals in definition order.
    let mut globals = Vec::with_capacity(module.globalsec.len());
    for global in &module.globalsec {
        let bits = eval_constant_expression(&global.expression, &imported_globals);
        globals.push(GlobalInstance::from_bits(bits, global.global_type));
    }

    let table = match module.tablesec.first() {
        Some(limits) => Some(TableInstance::from_limits(*limits)),
        None => imported_table,
    };

    let memory = match module.memorysec.first() {
        Some(limits) => {
            let memory = MemoryInstance::with_pages_limit(*limits, memory_pages_limit)
                .map_err(|_| {
                    instantiate_error(format!(
                        "cannot exceed hard memory limit of {} bytes",
                        memory_pages_limit as u64 * LINEAR_MEMORY_PAGE_SIZE.0 as u64
                    ))
                })?;
            Some(memory)
        }
        None => imported_memory,
    };

    // Check all data and element segments before the first write, so a
    // failing instantiation leaves memory and table untouched.
    let mut data_offsets = Vec::with_capacity(module.datasec.len());
    for data in &module.datasec {
        let offset = eval_constant_expression(&data.offset, &imported_globals) & 0xFFFF_FFFF;
        let memory = memory
            .as_ref()
            .expect("validation rejects data segments without a memory");
        if offset + data.init.len() as u64 > memory.byte_size().0 as u64 {
            return Err(instantiate_error("data segment is out of memory bounds"));
        }
        data_offsets.push(offset as usize);
    }

    let mut element_offsets = Vec::with_capacity(module.elementsec.len());
    for element in &module.elementsec {
        let offset = eval_constant_expression(&element.offset, &imported_globals) & 0xFFFF_FFFF;
        let table = table
            .as_ref()
            .expect("validation rejects element segments without a table");
        if offset + element.init.len() as u64 > table.size() as u64 {
            return Err(instantiate_error("element segment is out of table bounds"));
        }
        element_offsets.push(offset as u32);
    }

    // Commit data segments in order; overlapping segments overwrite.
    for (data, offset) in module.datasec.iter().zip(&data_offsets) {
        let memory = memory
            .as_ref()
            .expect("bounds were checked against this memory above");
        memory.init(*offset, &data.init);
    }

    // The instance must exist before the table is filled: its slots call
    // back into it.
    let instance = InstanceRef(Rc::new(Instance {
        module,
        memory,
        table,
        globals,
        imported_functions,
        imported_globals,
    }));

    for (element, offset) in instance.module.elementsec.iter().zip(&element_offsets) {
        let table = instance
            .table()
            .expect("bounds were checked against this table above");
        for (i, func_idx) in element.init.iter().enumerate() {
            let func_type = instance.module.get_function_type(*func_idx).clone();
            let slot = ExternalFunction::wasm(&instance, *func_idx, func_type);
            table
                .set(offset + i as u32, Some(slot))
                .expect("the segment lies within the table bounds");
        }
    }

    if let Some(start) = instance.module.startfunc {
        if runner::execute(&instance, start, &[]).trapped() {
            // Writes into an imported table are not rolled back; its slots
            // may still be called, so they get shared ownership of the
            // otherwise-discarded instance.
            if instance.module.imported_table_limits.is_some()
                && !instance.module.elementsec.is_empty()
            {
                for (element, offset) in instance.module.elementsec.iter().zip(&element_offsets) {
                    let table = instance
                        .table()
                        .expect("element segments imply a table");
                    for (i, func_idx) in element.init.iter().enumerate() {
                        let func_type = instance.module.get_function_type(*func_idx).clone();
                        let slot =
                            ExternalFunction::pinned(instance.clone(), *func_idx, func_type);
                        table
                            .set(offset + i as u32, Some(slot))
                            .expect("the segment lies within the table bounds");
                    }
                }
            }
            return Err(instantiate_error("start function failed to execute"));
        }
    }

    Ok(instance)
}

fn match_imported_functions(module: &Module, provided: &[ExternalFunction]) -> Result<(), Error> {
    let declared = &module.imported_function_types;
    if declared.len() != provided.len() {
        return Err(instantiate_error(format!(
            "module requires {} imported functions, {} provided",
            declared.len(),
            provided.len()
        )));
    }
    for (i, (declared, provided)) in declared.iter().zip(provided).enumerate() {
        if declared != provided.func_type() {
            return Err(instantiate_error(format!(
                "function {i} type doesn't match module's imported function type"
            )));
        }
    }
    Ok(())
}

fn match_limits(provided: Limits, declared: Limits) -> Result<(), Error> {
    if provided.min < declared.min {
        return Err(instantiate_error(
            "provided import's min is below import's min defined in module",
        ));
    }
    let Some(declared_max) = declared.max else {
        return Ok(());
    };
    match provided.max {
        Some(provided_max) if provided_max <= declared_max => Ok(()),
        _ => Err(instantiate_error(
            "provided import's max is above import's max defined in module",
        )),
    }
}

fn match_imported_table(module: &Module, provided: &Option<TableRef>) -> Result<(), Error> {
    match (module.imported_table_limits, provided) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(instantiate_error(
            "trying to provide imported table to a module that doesn't define one",
        )),
        (Some(_), None) => Err(instantiate_error(
            "module defines an imported table but none was provided",
        )),
        (Some(declared), Some(table)) => {
            match_limits(table.limits(), declared)?;
            let size = table.size();
            let limits = table.limits();
            if size < limits.min || limits.max.is_some_and(|max| size > max) {
                return Err(instantiate_error(
                    "provided imported table doesn't fit provided limits",
                ));
            }
            Ok(())
        }
    }
}

fn match_imported_memory(
    module: &Module,
    provided: &Option<MemoryRef>,
    memory_pages_limit: u32,
) -> Result<(), Error> {
    match (module.imported_memory_limits, provided) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(instantiate_error(
            "trying to provide imported memory to a module that doesn't define one",
        )),
        (Some(_), None) => Err(instantiate_error(
            "module defines an imported memory but none was provided",
        )),
        (Some(declared), Some(memory)) => {
            match_limits(memory.limits(), declared)?;
            let limits = memory.limits();
            if limits.min > memory_pages_limit
                || limits.max.is_some_and(|max| max > memory_pages_limit)
            {
                return Err(instantiate_error(format!(
                    "imported memory limits cannot exceed hard memory limit of {} bytes",
                    memory_pages_limit as u64 * LINEAR_MEMORY_PAGE_SIZE.0 as u64
                )));
            }
            let page_size = LINEAR_MEMORY_PAGE_SIZE.0 as u64;
            let size = memory.byte_size().0 as u64;
            if size < limits.min as u64 * page_size
                || limits.max.is_some_and(|max| size > max as u64 * page_size)
            {
                return Err(instantiate_error(
                    "provided imported memory doesn't fit provided limits",
                ));
            }
            Ok(())
        }
    }
}

fn match_imported_globals(module: &Module, provided: &[GlobalRef]) -> Result<(), Error> {
    let declared = &module.imported_global_types;
    if declared.len() != provided.len() {
        return Err(instantiate_error(format!(
            "module requires {} imported globals, {} provided",
            declared.len(),
            provided.len()
        )));
    }
    for (i, (declared, provided)) in declared.iter().zip(provided).enumerate() {
        let provided_type = provided.global_type();
        if declared.mutable != provided_type.mutable {
            return Err(instantiate_error(format!(
                "global {i} mutability doesn't match module's global mutability"
            )));
        }
        if declared.value_type != provided_type.value_type {
            return Err(instantiate_error(format!(
                "global {i} type doesn't match module's global type"
            )));
        }
    }
    Ok(())
}

/// Evaluates a parse-validated initializer to raw bits. `global.get` only
/// ever refers to an imported immutable global.
fn eval_constant_expression(expr: &ConstantExpression, imported_globals: &[GlobalRef]) -> u64 {
    match expr {
        ConstantExpression::Constant(bits) => *bits,
        ConstantExpression::GlobalGet(idx) => imported_globals[*idx as usize].get_bits(),
    }
}

/// Finds an exported function by name and wraps it into a callable handle.
pub fn find_exported_function(instance: &InstanceRef, name: &str) -> Option<ExternalFunction> {
    let idx = instance.module.find_export(ExternalKind::Function, name)?;
    let func_type = instance.module.get_function_type(idx).clone();
    Some(ExternalFunction::wasm(instance, idx, func_type))
}

/// Finds an exported global by name.
///
/// The returned handle aliases the instance's storage (or the original host
/// global when an import is re-exported), so it can be imported into another
/// module to share state.
pub fn find_exported_global(instance: &InstanceRef, name: &str) -> Option<GlobalRef> {
    let idx = instance.module.find_export(ExternalKind::Global, name)?;
    Some(instance.global(idx).clone())
}

/// Finds the exported table by name.
pub fn find_exported_table(instance: &InstanceRef, name: &str) -> Option<TableRef> {
    instance.module.find_export(ExternalKind::Table, name)?;
    instance.table().cloned()
}

/// Finds the exported memory by name.
pub fn find_exported_memory(instance: &InstanceRef, name: &str) -> Option<MemoryRef> {
    instance.module.find_export(ExternalKind::Memory, name)?;
    instance.memory().cloned()
}

/// Matches named host functions against the module's function imports,
/// returning them in module-import order, ready for [`instantiate`].
///
/// The provided functions may be in any order; unused entries are ignored.
///
/// # Errors
///
/// Returns `Err` when a required import is missing from the list or its
/// signature does not match the one declared by the module.
pub fn resolve_imported_functions(
    module: &Module,
    imported_functions: Vec<ImportedFunction>,
) -> Result<Vec<ExternalFunction>, Error> {
    let mut external_functions = Vec::new();
    for import in &module.importsec {
        let ImportKind::Function(type_idx) = import.kind else {
            continue;
        };
        let found = imported_functions
            .iter()
            .find(|func| func.module == import.module && func.name == import.field)
            .ok_or_else(|| {
                instantiate_error(format!(
                    "imported function {}.{} is required",
                    import.module, import.field
                ))
            })?;

        let module_type = &module.typesec[type_idx as usize];
        if module_type.params() != found.inputs.as_slice() {
            return Err(instantiate_error(format!(
                "function {}.{} input types don't match imported function in module",
                import.module, import.field
            )));
        }
        if module_type.result().is_none() && found.output.is_some() {
            return Err(instantiate_error(format!(
                "function {}.{} has output but is defined void in module",
                import.module, import.field
            )));
        }
        if module_type.result().is_some() && module_type.result() != found.output {
            return Err(instantiate_error(format!(
                "function {}.{} output type doesn't match imported function in module",
                import.module, import.field
            )));
        }

        external_functions.push(ExternalFunction::host(
            found.func,
            found.context.clone(),
            module_type.clone(),
        ));
    }
    Ok(external_functions)
}
