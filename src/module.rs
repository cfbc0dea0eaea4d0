use crate::isa::Code;
use crate::types::{FuncIdx, FuncType, GlobalIdx, GlobalType, Limits, TypeIdx};

/// What kind of definition an export or import refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExternalKind {
    /// A function.
    Function,
    /// A table.
    Table,
    /// A linear memory.
    Memory,
    /// A global variable.
    Global,
}

/// A single import declared by a module.
#[derive(Clone, Debug)]
pub(crate) struct Import {
    /// Name of the module the import comes from.
    pub module: String,
    /// Name of the imported definition within that module.
    pub field: String,
    /// What is imported.
    pub kind: ImportKind,
}

/// The typed description of an import.
#[derive(Clone, Debug)]
pub(crate) enum ImportKind {
    Function(TypeIdx),
    Table(Limits),
    Memory(Limits),
    Global(GlobalType),
}

/// A single export declared by a module.
#[derive(Clone, Debug)]
pub(crate) struct Export {
    /// The name the definition is exported under. Unique per module.
    pub name: String,
    /// What is exported.
    pub kind: ExternalKind,
    /// Index into the corresponding index space.
    pub index: u32,
}

/// An expression restricted to the forms allowed in global, data-offset and
/// element-offset initializers: a literal constant or a `global.get` of an
/// imported immutable global. Validated during parsing, so evaluation at
/// instantiation time cannot fail.
#[derive(Copy, Clone, Debug)]
pub(crate) enum ConstantExpression {
    /// A literal, stored as raw bits of the already-checked type.
    Constant(u64),
    /// The value of an imported immutable global.
    GlobalGet(GlobalIdx),
}

/// A locally defined global variable.
#[derive(Clone, Debug)]
pub(crate) struct Global {
    pub global_type: GlobalType,
    pub expression: ConstantExpression,
}

/// An element segment initializing a span of the table.
#[derive(Clone, Debug)]
pub(crate) struct Element {
    pub offset: ConstantExpression,
    pub init: Vec<FuncIdx>,
}

/// A data segment initializing a span of the linear memory.
#[derive(Clone, Debug)]
pub(crate) struct Data {
    pub offset: ConstantExpression,
    pub init: Vec<u8>,
}

/// The parsed, validated and pre-processed representation of a Wasm binary.
///
/// A `Module` is immutable once produced by [`parse`](crate::parse); all
/// mutable state lives in the [`Instance`](crate::Instance) created from it.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub(crate) typesec: Vec<FuncType>,
    pub(crate) importsec: Vec<Import>,
    pub(crate) funcsec: Vec<TypeIdx>,
    pub(crate) tablesec: Vec<Limits>,
    pub(crate) memorysec: Vec<Limits>,
    pub(crate) globalsec: Vec<Global>,
    pub(crate) exportsec: Vec<Export>,
    pub(crate) startfunc: Option<FuncIdx>,
    pub(crate) elementsec: Vec<Element>,
    pub(crate) codesec: Vec<Code>,
    pub(crate) datasec: Vec<Data>,

    // Caches derived from the import section while parsing it.
    pub(crate) imported_function_types: Vec<FuncType>,
    pub(crate) imported_table_limits: Option<Limits>,
    pub(crate) imported_memory_limits: Option<Limits>,
    pub(crate) imported_global_types: Vec<GlobalType>,
}

impl Module {
    /// Returns the type of the function with the given index, counting
    /// imported functions first.
    ///
    /// # Panics
    ///
    /// Panics when `idx` is not a function of the module.
    pub fn get_function_type(&self, idx: FuncIdx) -> &FuncType {
        let idx = idx as usize;
        let imported = self.imported_function_types.len();
        debug_assert!(idx < imported + self.funcsec.len());

        if idx < imported {
            return &self.imported_function_types[idx];
        }
        let type_idx = self.funcsec[idx - imported] as usize;
        debug_assert!(type_idx < self.typesec.len());
        &self.typesec[type_idx]
    }

    /// Total number of functions, imported and locally defined.
    pub fn function_count(&self) -> usize {
        self.imported_function_types.len() + self.funcsec.len()
    }

    /// Total number of globals, imported and locally defined.
    pub(crate) fn global_count(&self) -> usize {
        self.imported_global_types.len() + self.globalsec.len()
    }

    /// Whether the module defines or imports a table.
    pub(crate) fn has_table(&self) -> bool {
        !self.tablesec.is_empty() || self.imported_table_limits.is_some()
    }

    /// Whether the module defines or imports a linear memory.
    pub(crate) fn has_memory(&self) -> bool {
        !self.memorysec.is_empty() || self.imported_memory_limits.is_some()
    }

    /// Returns the type of the global with the given index, counting imported
    /// globals first.
    pub(crate) fn global_type(&self, idx: GlobalIdx) -> GlobalType {
        let idx = idx as usize;
        let imported = self.imported_global_types.len();
        debug_assert!(idx < self.global_count());

        if idx < imported {
            self.imported_global_types[idx]
        } else {
            self.globalsec[idx - imported].global_type
        }
    }

    /// Finds the index of an exported definition of the given kind.
    pub(crate) fn find_export(&self, kind: ExternalKind, name: &str) -> Option<u32> {
        self.exportsec
            .iter()
            .find(|export| export.kind == kind && export.name == name)
            .map(|export| export.index)
    }

    /// Finds an exported function by name.
    pub fn find_exported_function(&self, name: &str) -> Option<FuncIdx> {
        self.find_export(ExternalKind::Function, name)
    }
}
