use crate::types::Limits;
use crate::value::{LittleEndianConvert, TrapCode};
use crate::Error;
use core::cell::RefCell;
use core::fmt;
use memory_units::wasm32::Pages;
use memory_units::{Bytes, RoundUpTo};
use std::rc::Rc;

/// Size of one page of linear memory: 64 KiB.
///
/// The size of a memory is always an integer multiple of the page size.
pub const LINEAR_MEMORY_PAGE_SIZE: Bytes = Bytes(65536);

/// Hard limit on the size of a linear memory, in pages: 4096 pages = 256 MiB.
///
/// Modules declaring more are rejected at parse time; `memory.grow` never
/// grows past it even when the memory declares no maximum.
pub const MEMORY_PAGES_LIMIT: u32 = 4096;

/// Reference to a [`MemoryInstance`] with reference-counting semantics.
#[derive(Clone, Debug)]
pub struct MemoryRef(Rc<MemoryInstance>);

impl ::core::ops::Deref for MemoryRef {
    type Target = MemoryInstance;
    fn deref(&self) -> &MemoryInstance {
        &self.0
    }
}

/// Runtime representation of a linear memory.
///
/// A contiguous, mutable array of raw bytes, created at an initial size and
/// growable in page units up to its maximum (or the hard page limit). All
/// growth is zero-filled. Loads and stores are bounds-checked against the
/// current size in 64-bit arithmetic, so offset overflows cannot wrap.
pub struct MemoryInstance {
    buffer: RefCell<Vec<u8>>,
    limits: Limits,
    /// Effective ceiling for `grow`, in pages.
    max_pages: u32,
}

impl fmt::Debug for MemoryInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryInstance")
            .field("limits", &self.limits)
            .field("buffer.len", &self.buffer.borrow().len())
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

impl MemoryInstance {
    /// Allocates a zeroed memory of `initial` pages, growable up to
    /// `maximum` (or the hard page limit when no maximum is given).
    ///
    /// # Errors
    ///
    /// Returns `Err` if `initial` exceeds `maximum` or either exceeds the
    /// hard page limit.
    pub fn alloc(initial: Pages, maximum: Option<Pages>) -> Result<MemoryRef, Error> {
        let limits = Limits {
            min: initial.0 as u32,
            max: maximum.map(|pages| pages.0 as u32),
        };
        Self::with_pages_limit(limits, MEMORY_PAGES_LIMIT)
    }

    /// Allocates a memory against an explicit hard page limit.
    pub(crate) fn with_pages_limit(limits: Limits, pages_limit: u32) -> Result<MemoryRef, Error> {
        if let Some(max) = limits.max {
            if limits.min > max {
                return Err(Error::Memory(format!(
                    "initial size {} is above maximum size {max}",
                    limits.min
                )));
            }
        }
        if limits.min > pages_limit || limits.max.is_some_and(|max| max > pages_limit) {
            return Err(Error::Memory(format!(
                "cannot exceed hard memory limit of {} bytes",
                pages_limit as u64 * LINEAR_MEMORY_PAGE_SIZE.0 as u64
            )));
        }
        let max_pages = limits.max.unwrap_or(pages_limit).min(pages_limit);
        let byte_size: Bytes = Pages(limits.min as usize).into();
        Ok(MemoryRef(Rc::new(MemoryInstance {
            buffer: RefCell::new(vec![0; byte_size.0]),
            limits,
            max_pages,
        })))
    }

    /// The limits this memory was created with.
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Current size in pages.
    pub fn current_size(&self) -> Pages {
        Bytes(self.buffer.borrow().len()).round_up_to()
    }

    /// Current size in bytes. Always a multiple of the page size.
    pub fn byte_size(&self) -> Bytes {
        Bytes(self.buffer.borrow().len())
    }

    /// Grows the memory by `additional` pages, zero-filling the new pages.
    ///
    /// Returns the previous size in pages, or `u32::MAX` when the request
    /// exceeds this memory's maximum.
    pub fn grow(&self, additional: u32) -> u32 {
        let current: Pages = self.current_size();
        let current = current.0 as u32;
        let new_pages = current as u64 + additional as u64;
        if new_pages > self.max_pages as u64 {
            return u32::MAX;
        }
        let new_byte_size: Bytes = Pages(new_pages as usize).into();
        self.buffer.borrow_mut().resize(new_byte_size.0, 0);
        current
    }

    /// Loads a value at `address + offset`, trapping on out-of-bounds.
    pub(crate) fn load<T: LittleEndianConvert>(
        &self,
        address: u32,
        offset: u32,
    ) -> Result<T, TrapCode> {
        let buffer = self.buffer.borrow();
        let mut bytes = T::Bytes::default();
        let size = bytes.as_ref().len();
        let start = checked_start(address, offset, size, buffer.len())?;
        bytes.as_mut().copy_from_slice(&buffer[start..start + size]);
        Ok(T::from_le_bytes(bytes))
    }

    /// Stores a value at `address + offset`, trapping on out-of-bounds.
    pub(crate) fn store<T: LittleEndianConvert>(
        &self,
        address: u32,
        offset: u32,
        value: T,
    ) -> Result<(), TrapCode> {
        let mut buffer = self.buffer.borrow_mut();
        let bytes = value.into_le_bytes();
        let size = bytes.as_ref().len();
        let start = checked_start(address, offset, size, buffer.len())?;
        buffer[start..start + size].copy_from_slice(bytes.as_ref());
        Ok(())
    }

    /// Copies a range of memory out, for embedder use.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the range is out of bounds.
    pub fn get(&self, offset: u32, size: usize) -> Result<Vec<u8>, Error> {
        let buffer = self.buffer.borrow();
        let start = checked_start(offset, 0, size, buffer.len())
            .map_err(|_| Error::Memory(format!("out of bounds access at {offset}")))?;
        Ok(buffer[start..start + size].to_vec())
    }

    /// Copies bytes into memory, for embedder use.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the range is out of bounds.
    pub fn set(&self, offset: u32, value: &[u8]) -> Result<(), Error> {
        let mut buffer = self.buffer.borrow_mut();
        let start = checked_start(offset, 0, value.len(), buffer.len())
            .map_err(|_| Error::Memory(format!("out of bounds access at {offset}")))?;
        buffer[start..start + value.len()].copy_from_slice(value);
        Ok(())
    }

    /// Writes an already bounds-checked data segment.
    pub(crate) fn init(&self, offset: usize, bytes: &[u8]) {
        let mut buffer = self.buffer.borrow_mut();
        debug_assert!(offset + bytes.len() <= buffer.len());
        buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

/// Computes the start of an access of `size` bytes at `address + offset` in
/// 64-bit arithmetic, so overflowing offsets fail instead of wrapping.
fn checked_start(
    address: u32,
    offset: u32,
    size: usize,
    buffer_len: usize,
) -> Result<usize, TrapCode> {
    let end = address as u64 + offset as u64 + size as u64;
    if end > buffer_len as u64 {
        return Err(TrapCode::MemoryAccessOutOfBounds);
    }
    Ok(address as usize + offset as usize)
}
