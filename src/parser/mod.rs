//! The binary module parser.
//!
//! Parsing, validation and code pre-processing happen in a single pass over
//! the input: section contents are validated as they are decoded (indices
//! against the sections that precede them, which the mandatory section order
//! guarantees to be present already), and function bodies are rewritten into
//! their flat executable form on the way through. A successfully parsed
//! [`Module`] is therefore fully validated; nothing is re-checked at
//! instantiation or execution time.

mod decode;
mod expr;

#[cfg(test)]
mod tests;

use crate::memory::MEMORY_PAGES_LIMIT;
use crate::module::{Data, Element, Export, ExternalKind, Global, Import, ImportKind, Module};
use crate::types::{FuncType, GlobalType, Limits, ValueType};
use crate::Error;
use decode::Decoder;
use std::collections::HashSet;

use expr::parse_constant_expression;

/// The magic bytes and version every binary module must start with.
const WASM_PREFIX: [u8; 8] = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];

const FUNC_TYPE_MARKER: u8 = 0x60;
const FUNCREF_TYPE: u8 = 0x70;

fn malformed(message: impl Into<String>) -> Error {
    Error::Malformed(message.into())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Validation(message.into())
}

/// Checks that the given bytes are a well-formed and valid module.
pub fn validate(input: &[u8]) -> bool {
    parse(input).is_ok()
}

/// Parses, validates and pre-processes a binary module.
///
/// # Errors
///
/// Returns [`Error::Malformed`] when the input violates the binary encoding
/// and [`Error::Validation`] when it is well-formed but not a valid module.
/// No partial module is ever returned.
pub fn parse(input: &[u8]) -> Result<Module, Error> {
    if input.len() < WASM_PREFIX.len() || input[..WASM_PREFIX.len()] != WASM_PREFIX {
        return Err(malformed("invalid wasm module prefix"));
    }

    let mut decoder = Decoder::new(&input[WASM_PREFIX.len()..]);
    let mut module = Module::default();
    let mut last_section_id = 0u8;
    let mut code_section_seen = false;

    while !decoder.is_at_end() {
        let id = decoder.byte()?;
        let size = decoder.leb_u32()? as usize;

        if id == 0 {
            // Custom section: the name must decode, the content is ignored.
            let start = decoder.position();
            decoder.string()?;
            let consumed = decoder.position() - start;
            let remaining = size
                .checked_sub(consumed)
                .ok_or_else(|| malformed("incorrect section 0 size, name exceeds section"))?;
            decoder.skip(remaining)?;
            continue;
        }

        if id > 11 {
            return Err(malformed(format!("invalid section id {id}")));
        }
        if id <= last_section_id {
            return Err(malformed("unexpected out-of-order section type"));
        }
        last_section_id = id;

        let section_start = decoder.position();
        match id {
            1 => parse_type_section(&mut decoder, &mut module)?,
            2 => parse_import_section(&mut decoder, &mut module)?,
            3 => parse_function_section(&mut decoder, &mut module)?,
            4 => parse_table_section(&mut decoder, &mut module)?,
            5 => parse_memory_section(&mut decoder, &mut module)?,
            6 => parse_global_section(&mut decoder, &mut module)?,
            7 => parse_export_section(&mut decoder, &mut module)?,
            8 => parse_start_section(&mut decoder, &mut module)?,
            9 => parse_element_section(&mut decoder, &mut module)?,
            10 => {
                parse_code_section(&mut decoder, &mut module)?;
                code_section_seen = true;
            }
            11 => parse_data_section(&mut decoder, &mut module)?,
            _ => unreachable!("section ids above 11 are rejected"),
        }

        let consumed = decoder.position() - section_start;
        if consumed != size {
            return Err(malformed(format!(
                "incorrect section {id} size, difference: {}",
                consumed as i64 - size as i64
            )));
        }
    }

    // A function section without bodies (or the other way round) is only
    // detectable once all sections have been seen.
    if !code_section_seen && !module.funcsec.is_empty() {
        return Err(malformed("inconsistent function and code section lengths"));
    }
    debug_assert_eq!(module.funcsec.len(), module.codesec.len());

    Ok(module)
}

fn parse_valtype(decoder: &mut Decoder) -> Result<ValueType, Error> {
    let byte = decoder.byte()?;
    ValueType::from_byte(byte).ok_or_else(|| invalid(format!("invalid value type {byte}")))
}

fn parse_limits(decoder: &mut Decoder) -> Result<Limits, Error> {
    let flags = decoder.byte()?;
    let limits = match flags {
        0x00 => Limits {
            min: decoder.leb_u32()?,
            max: None,
        },
        0x01 => {
            let min = decoder.leb_u32()?;
            let max = decoder.leb_u32()?;
            Limits {
                min,
                max: Some(max),
            }
        }
        _ => return Err(malformed(format!("invalid limits flags {flags}"))),
    };
    if let Some(max) = limits.max {
        if limits.min > max {
            return Err(invalid("invalid limits: min is above max"));
        }
    }
    Ok(limits)
}

fn parse_global_type(decoder: &mut Decoder) -> Result<GlobalType, Error> {
    let value_type = parse_valtype(decoder)?;
    let mutable = match decoder.byte()? {
        0x00 => false,
        0x01 => true,
        byte => return Err(malformed(format!("invalid mutability value {byte}"))),
    };
    Ok(GlobalType {
        value_type,
        mutable,
    })
}

fn parse_type_section(decoder: &mut Decoder, module: &mut Module) -> Result<(), Error> {
    let count = decoder.leb_u32()?;
    for _ in 0..count {
        let marker = decoder.byte()?;
        if marker != FUNC_TYPE_MARKER {
            return Err(malformed(format!(
                "unexpected byte value {marker}, expected 0x60 for functype"
            )));
        }
        let param_count = decoder.leb_u32()?;
        let mut params = Vec::with_capacity(param_count.min(64) as usize);
        for _ in 0..param_count {
            params.push(parse_valtype(decoder)?);
        }
        let result_count = decoder.leb_u32()?;
        if result_count > 1 {
            return Err(invalid("function type has more than one result"));
        }
        let result = if result_count == 1 {
            Some(parse_valtype(decoder)?)
        } else {
            None
        };
        module.typesec.push(FuncType::new(params, result));
    }
    Ok(())
}

fn parse_import_section(decoder: &mut Decoder, module: &mut Module) -> Result<(), Error> {
    let count = decoder.leb_u32()?;
    for _ in 0..count {
        let module_name = decoder.string()?;
        let field_name = decoder.string()?;
        let kind = match decoder.byte()? {
            0x00 => {
                let type_idx = decoder.leb_u32()?;
                let func_type = module
                    .typesec
                    .get(type_idx as usize)
                    .ok_or_else(|| invalid(format!("invalid type index {type_idx}")))?;
                module.imported_function_types.push(func_type.clone());
                ImportKind::Function(type_idx)
            }
            0x01 => {
                let elem_type = decoder.byte()?;
                if elem_type != FUNCREF_TYPE {
                    return Err(malformed(format!(
                        "invalid table element type {elem_type}"
                    )));
                }
                let limits = parse_limits(decoder)?;
                if module.imported_table_limits.is_some() {
                    return Err(invalid("multiple tables"));
                }
                module.imported_table_limits = Some(limits);
                ImportKind::Table(limits)
            }
            0x02 => {
                let limits = parse_limits(decoder)?;
                if module.imported_memory_limits.is_some() {
                    return Err(invalid("multiple memories"));
                }
                check_memory_limits(&limits)?;
                module.imported_memory_limits = Some(limits);
                ImportKind::Memory(limits)
            }
            0x03 => {
                let global_type = parse_global_type(decoder)?;
                module.imported_global_types.push(global_type);
                ImportKind::Global(global_type)
            }
            byte => return Err(malformed(format!("invalid import kind {byte}"))),
        };
        module.importsec.push(Import {
            module: module_name,
            field: field_name,
            kind,
        });
    }
    Ok(())
}

fn parse_function_section(decoder: &mut Decoder, module: &mut Module) -> Result<(), Error> {
    let count = decoder.leb_u32()?;
    for _ in 0..count {
        let type_idx = decoder.leb_u32()?;
        if type_idx as usize >= module.typesec.len() {
            return Err(invalid(format!("invalid type index {type_idx}")));
        }
        module.funcsec.push(type_idx);
    }
    Ok(())
}

fn parse_table_section(decoder: &mut Decoder, module: &mut Module) -> Result<(), Error> {
    let count = decoder.leb_u32()?;
    if count as usize + usize::from(module.imported_table_limits.is_some()) > 1 {
        return Err(invalid("multiple tables"));
    }
    for _ in 0..count {
        let elem_type = decoder.byte()?;
        if elem_type != FUNCREF_TYPE {
            return Err(malformed(format!("invalid table element type {elem_type}")));
        }
        module.tablesec.push(parse_limits(decoder)?);
    }
    Ok(())
}

fn check_memory_limits(limits: &Limits) -> Result<(), Error> {
    if limits.min > MEMORY_PAGES_LIMIT || limits.max.is_some_and(|max| max > MEMORY_PAGES_LIMIT) {
        return Err(invalid(format!(
            "memory size cannot exceed hard limit of {MEMORY_PAGES_LIMIT} pages"
        )));
    }
    Ok(())
}

fn parse_memory_section(decoder: &mut Decoder, module: &mut Module) -> Result<(), Error> {
    let count = decoder.leb_u32()?;
    if count as usize + usize::from(module.imported_memory_limits.is_some()) > 1 {
        return Err(invalid("multiple memories"));
    }
    for _ in 0..count {
        let limits = parse_limits(decoder)?;
        check_memory_limits(&limits)?;
        module.memorysec.push(limits);
    }
    Ok(())
}

fn parse_global_section(decoder: &mut Decoder, module: &mut Module) -> Result<(), Error> {
    let count = decoder.leb_u32()?;
    for _ in 0..count {
        let global_type = parse_global_type(decoder)?;
        let expression = parse_constant_expression(decoder, module, global_type.value_type)?;
        module.globalsec.push(Global {
            global_type,
            expression,
        });
    }
    Ok(())
}

fn parse_export_section(decoder: &mut Decoder, module: &mut Module) -> Result<(), Error> {
    let count = decoder.leb_u32()?;
    let mut names = HashSet::new();
    for _ in 0..count {
        let name = decoder.string()?;
        if !names.insert(name.clone()) {
            return Err(invalid(format!("duplicate export name {name}")));
        }
        let kind = match decoder.byte()? {
            0x00 => ExternalKind::Function,
            0x01 => ExternalKind::Table,
            0x02 => ExternalKind::Memory,
            0x03 => ExternalKind::Global,
            byte => return Err(malformed(format!("invalid export kind {byte}"))),
        };
        let index = decoder.leb_u32()?;
        let in_range = match kind {
            ExternalKind::Function => (index as usize) < module.function_count(),
            ExternalKind::Table => index == 0 && module.has_table(),
            ExternalKind::Memory => index == 0 && module.has_memory(),
            ExternalKind::Global => (index as usize) < module.global_count(),
        };
        if !in_range {
            return Err(invalid(format!(
                "invalid index {index} of exported {kind:?}"
            )));
        }
        module.exportsec.push(Export { name, kind, index });
    }
    Ok(())
}

fn parse_start_section(decoder: &mut Decoder, module: &mut Module) -> Result<(), Error> {
    let func_idx = decoder.leb_u32()?;
    if func_idx as usize >= module.function_count() {
        return Err(invalid(format!("invalid start function index {func_idx}")));
    }
    let func_type = module.get_function_type(func_idx);
    if !func_type.params().is_empty() || func_type.result().is_some() {
        return Err(invalid("start function must have no inputs and no outputs"));
    }
    module.startfunc = Some(func_idx);
    Ok(())
}

fn parse_element_section(decoder: &mut Decoder, module: &mut Module) -> Result<(), Error> {
    let count = decoder.leb_u32()?;
    for _ in 0..count {
        let table_idx = decoder.leb_u32()?;
        if table_idx != 0 {
            return Err(invalid(format!("invalid table index {table_idx}")));
        }
        if !module.has_table() {
            return Err(invalid("element segment requires a table"));
        }
        let offset = parse_constant_expression(decoder, module, ValueType::I32)?;
        let indices = decoder.vec_u32()?;
        for func_idx in &indices {
            if *func_idx as usize >= module.function_count() {
                return Err(invalid(format!(
                    "invalid function index {func_idx} in element segment"
                )));
            }
        }
        module.elementsec.push(Element {
            offset,
            init: indices,
        });
    }
    Ok(())
}

fn parse_code_section(decoder: &mut Decoder, module: &mut Module) -> Result<(), Error> {
    let count = decoder.leb_u32()?;
    if count as usize != module.funcsec.len() {
        return Err(malformed("inconsistent function and code section lengths"));
    }
    let imported = module.imported_function_types.len();
    for i in 0..count as usize {
        let body_size = decoder.leb_u32()? as usize;
        let body_start = decoder.position();
        let code = {
            let func_type = module.get_function_type((imported + i) as u32);
            expr::parse_code(decoder, module, func_type)?
        };
        let consumed = decoder.position() - body_start;
        if consumed != body_size {
            return Err(malformed(format!(
                "incorrect function body size, difference: {}",
                consumed as i64 - body_size as i64
            )));
        }
        module.codesec.push(code);
    }
    Ok(())
}

fn parse_data_section(decoder: &mut Decoder, module: &mut Module) -> Result<(), Error> {
    let count = decoder.leb_u32()?;
    for _ in 0..count {
        let memory_idx = decoder.leb_u32()?;
        if memory_idx != 0 {
            return Err(invalid(format!("invalid memory index {memory_idx}")));
        }
        if !module.has_memory() {
            return Err(invalid("data segment requires a memory"));
        }
        let offset = parse_constant_expression(decoder, module, ValueType::I32)?;
        let len = decoder.leb_u32()? as usize;
        let init = decoder.bytes(len)?.to_vec();
        module.datasec.push(Data { offset, init });
    }
    Ok(())
}
