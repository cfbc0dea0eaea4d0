use crate::func::ExternalFunction;
use crate::types::Limits;
use crate::Error;
use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

/// Reference to a [`TableInstance`] with reference-counting semantics.
#[derive(Clone, Debug)]
pub struct TableRef(Rc<TableInstance>);

impl ::core::ops::Deref for TableRef {
    type Target = TableInstance;
    fn deref(&self) -> &TableInstance {
        &self.0
    }
}

/// Runtime representation of a table.
///
/// A table is a vector of function slots addressed by `call_indirect`. Each
/// slot is either empty or holds a callable function together with its type.
/// Slots are filled by element segments during instantiation and may be
/// rewritten by the embedder.
pub struct TableInstance {
    elements: RefCell<Vec<Option<ExternalFunction>>>,
    limits: Limits,
}

impl fmt::Debug for TableInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TableInstance")
            .field("limits", &self.limits)
            .field("len", &self.elements.borrow().len())
            .finish()
    }
}

impl TableInstance {
    /// Allocates a table of `initial` empty slots.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `initial` exceeds `maximum`.
    pub fn alloc(initial: u32, maximum: Option<u32>) -> Result<TableRef, Error> {
        if let Some(max) = maximum {
            if initial > max {
                return Err(Error::Table(format!(
                    "initial size {initial} is above maximum size {max}"
                )));
            }
        }
        Ok(Self::from_limits(Limits {
            min: initial,
            max: maximum,
        }))
    }

    pub(crate) fn from_limits(limits: Limits) -> TableRef {
        TableRef(Rc::new(TableInstance {
            elements: RefCell::new(vec![None; limits.min as usize]),
            limits,
        }))
    }

    /// The limits this table was created with.
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Current number of slots.
    pub fn size(&self) -> u32 {
        self.elements.borrow().len() as u32
    }

    /// Returns the function at `idx`, or `None` for an empty slot.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `idx` is out of bounds.
    pub fn get(&self, idx: u32) -> Result<Option<ExternalFunction>, Error> {
        self.elements
            .borrow()
            .get(idx as usize)
            .cloned()
            .ok_or_else(|| Error::Table(format!("out of bounds table access at {idx}")))
    }

    /// Replaces the slot at `idx`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `idx` is out of bounds.
    pub fn set(&self, idx: u32, func: Option<ExternalFunction>) -> Result<(), Error> {
        let mut elements = self.elements.borrow_mut();
        let slot = elements
            .get_mut(idx as usize)
            .ok_or_else(|| Error::Table(format!("out of bounds table access at {idx}")))?;
        *slot = func;
        Ok(())
    }
}
