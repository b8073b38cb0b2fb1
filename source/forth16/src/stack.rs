use crate::memory::{Memory, MemoryError};

/// A fixed region of the image used as a stack.
///
/// The stack pointer addresses the top element and grows upwards. The
/// pointer itself is kept by the caller (the return stack keeps it in a
/// register cell, so programs can read and write it like any other
/// cell), which is why every operation re-validates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack {
    base: u16,
    limit: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    StackEmpty,
    CapacityExceeded,
}

impl Stack {
    /// A stack over cells `[base, base + cells)`.
    pub const fn new(base: usize, cells: usize) -> Self {
        Self {
            base: base as u16,
            limit: (base + cells - 1) as u16,
        }
    }

    /// Pointer value of a stack holding only its base cell.
    #[inline]
    pub fn initial_pointer(&self) -> u16 {
        self.base
    }

    #[inline]
    fn holds(&self, sp: u16) -> bool {
        sp >= self.base && sp <= self.limit
    }

    #[inline]
    pub fn push(&self, mem: &mut Memory, sp: &mut u16, val: u16) -> Result<(), StackError> {
        let next = sp.wrapping_add(1);
        if !self.holds(next) {
            return Err(StackError::CapacityExceeded);
        }
        mem.set_cell(next, val)
            .map_err(|_: MemoryError| StackError::CapacityExceeded)?;
        *sp = next;
        Ok(())
    }

    #[inline]
    pub fn pop(&self, mem: &Memory, sp: &mut u16) -> Result<u16, StackError> {
        if !self.holds(*sp) {
            return Err(StackError::StackEmpty);
        }
        let val = mem.cell(*sp).map_err(|_| StackError::StackEmpty)?;
        *sp = sp.wrapping_sub(1);
        Ok(val)
    }

    /// Number of cells held, including the base cell. Zero if the pointer
    /// has left the region.
    #[inline]
    pub fn depth(&self, sp: u16) -> usize {
        if self.holds(sp) {
            usize::from(sp - self.base) + 1
        } else {
            0
        }
    }

    /// The held cells, bottom first.
    pub fn contents(&self, mem: &Memory, sp: u16) -> Vec<u16> {
        (0..self.depth(sp) as u16)
            .filter_map(|i| mem.cell(self.base + i).ok())
            .collect()
    }
}
