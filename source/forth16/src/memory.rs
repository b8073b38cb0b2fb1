//! The machine image.
//!
//! Everything the VM knows about lives in one fixed array of 16-bit cells:
//! the registers, the dictionary, the name table and both stacks. The same
//! array can be viewed as bytes (little-endian cells), which is how names
//! are stored and how blocks are transferred.

/// Number of cells in the image.
pub const CORE_SIZE: usize = 32768;
/// Number of bytes in the image.
pub const CORE_BYTES: usize = CORE_SIZE * 2;
/// Cells reserved for each stack.
pub const STACK_SIZE: usize = CORE_SIZE / 64;

/// `@` and `!` only ever see the low 15 bits of an address.
pub const ADDRESS_MASK: u16 = 0x7fff;

/// Cell holding the dictionary free pointer ("here").
pub const HERE: u16 = 0;
/// Cell holding the return stack pointer.
pub const RSP: u16 = 1;
/// Cell holding the push-literal opcode. Compiled literals are `[LITERAL, value]`.
pub const LITERAL: u16 = 2;
/// Cell holding the compile/execute flag.
pub const STATE: u16 = 8;
/// Cell selecting hexadecimal (nonzero) or decimal (zero) number output.
pub const BASE: u16 = 9;

/// First cell available to the dictionary, past the register block.
pub const DICT_START: u16 = 32;
/// One past the last cell available to the dictionary.
pub const DICT_END: usize = NAME_BASE / 2;

/// Byte offset of the name table. The first `TOKEN_LEN` bytes of the table
/// are the token buffer the outer interpreter reads into.
pub const NAME_BASE: usize = CORE_SIZE / 2;
/// One past the last byte available to the name table.
pub const NAME_END: usize = DATA_STACK_BASE * 2;
/// Longest token (and name) in bytes, not counting the terminator.
pub const MAX_TOKEN: usize = 31;
/// Bytes reserved at the start of the name table for the current token.
pub const TOKEN_LEN: usize = MAX_TOKEN + 1;

/// First cell of the data stack region.
pub const DATA_STACK_BASE: usize = CORE_SIZE - 2 * STACK_SIZE;
/// First cell of the return stack region.
pub const RETURN_STACK_BASE: usize = CORE_SIZE - STACK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    CellOutOfBounds(u16),
    ByteOutOfBounds(usize),
}

impl core::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MemoryError::CellOutOfBounds(addr) => write!(f, "cell {addr} out of bounds"),
            MemoryError::ByteOutOfBounds(idx) => write!(f, "byte {idx} out of bounds"),
        }
    }
}

pub struct Memory {
    bytes: Box<[u8]>,
}

impl Memory {
    pub fn new() -> Self {
        Self {
            bytes: vec![0u8; CORE_BYTES].into_boxed_slice(),
        }
    }

    /// Rebuild an image from exactly `CORE_BYTES` bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CORE_BYTES {
            return None;
        }
        Some(Self {
            bytes: bytes.to_vec().into_boxed_slice(),
        })
    }

    #[inline]
    pub fn cell(&self, addr: u16) -> Result<u16, MemoryError> {
        let idx = usize::from(addr);
        if idx >= CORE_SIZE {
            return Err(MemoryError::CellOutOfBounds(addr));
        }
        Ok(u16::from_le_bytes([self.bytes[2 * idx], self.bytes[2 * idx + 1]]))
    }

    #[inline]
    pub fn set_cell(&mut self, addr: u16, val: u16) -> Result<(), MemoryError> {
        let idx = usize::from(addr);
        if idx >= CORE_SIZE {
            return Err(MemoryError::CellOutOfBounds(addr));
        }
        self.bytes[2 * idx..2 * idx + 2].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    #[inline]
    pub fn byte(&self, idx: usize) -> Result<u8, MemoryError> {
        self.bytes
            .get(idx)
            .copied()
            .ok_or(MemoryError::ByteOutOfBounds(idx))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// The NUL-terminated string starting at byte `start`, without the
    /// terminator. `None` if no terminator is found before `end`.
    pub fn c_str(&self, start: usize, end: usize) -> Option<&[u8]> {
        let end = end.min(CORE_BYTES);
        let window = self.bytes.get(start..end)?;
        let len = window.iter().position(|&b| b == 0)?;
        Some(&window[..len])
    }

    /// Write `s` followed by a NUL terminator at byte `start`.
    pub fn write_c_str(&mut self, start: usize, s: &[u8]) -> Result<(), MemoryError> {
        let end = start + s.len();
        if end >= CORE_BYTES {
            return Err(MemoryError::ByteOutOfBounds(end));
        }
        self.bytes[start..end].copy_from_slice(s);
        self.bytes[end] = 0;
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
