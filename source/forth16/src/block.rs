//! Block persistence.
//!
//! A block is exactly [`BLOCK_SIZE`] bytes of the image, stored in a file
//! named after its id (`0007.blk` for block 7). Blocks can be moved to and
//! from any byte offset of the first [`BLOCK_REGION`] bytes of the image,
//! which hold the registers and the dictionary. The name table and the
//! stacks are out of reach.

use core::fmt;
use std::{
    fs::File,
    io::{self, Read, Write},
    path::PathBuf,
};

use crate::memory::NAME_BASE;

/// Bytes per block.
pub const BLOCK_SIZE: usize = 1024;
/// Size of the block-addressable prefix of the image, in bytes.
pub const BLOCK_REGION: usize = NAME_BASE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    /// The block would not fit below the end of the block region.
    OffsetOutOfRange(u16),
    /// The block file could not be opened, read or written.
    Io { id: u16, kind: io::ErrorKind },
    /// The block file held fewer than `BLOCK_SIZE` bytes.
    ShortTransfer { id: u16, len: usize },
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::OffsetOutOfRange(off) => {
                write!(f, "block offset {off} is outside the block region")
            }
            BlockError::Io { id, kind } => write!(f, "block {id:04x}: {kind}"),
            BlockError::ShortTransfer { id, len } => {
                write!(f, "block {id:04x}: expected {BLOCK_SIZE} bytes, got {len}")
            }
        }
    }
}

impl std::error::Error for BlockError {}

/// Where block files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStore {
    dir: PathBuf,
}

impl BlockStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File backing block `id`.
    pub fn path(&self, id: u16) -> PathBuf {
        self.dir.join(format!("{id:04x}.blk"))
    }

    /// Move one block between `image` and the file for `id`.
    ///
    /// Only the first `BLOCK_REGION` bytes of `image` are addressable. On
    /// a failed read the image is left untouched.
    #[tracing::instrument(level = "debug", skip(self, image), err(Display))]
    pub fn transfer(
        &self,
        image: &mut [u8],
        offset: u16,
        id: u16,
        mode: BlockMode,
    ) -> Result<(), BlockError> {
        let start = usize::from(offset);
        if start >= BLOCK_REGION - BLOCK_SIZE || image.len() < BLOCK_REGION {
            return Err(BlockError::OffsetOutOfRange(offset));
        }
        let window = &mut image[start..start + BLOCK_SIZE];
        let io_err = |e: io::Error| BlockError::Io { id, kind: e.kind() };

        match mode {
            BlockMode::Write => {
                let mut file = File::create(self.path(id)).map_err(io_err)?;
                file.write_all(window).map_err(io_err)?;
                file.flush().map_err(io_err)?;
            }
            BlockMode::Read => {
                let file = File::open(self.path(id)).map_err(io_err)?;
                let mut buf = Vec::with_capacity(BLOCK_SIZE);
                file.take(BLOCK_SIZE as u64)
                    .read_to_end(&mut buf)
                    .map_err(io_err)?;
                if buf.len() != BLOCK_SIZE {
                    return Err(BlockError::ShortTransfer { id, len: buf.len() });
                }
                window.copy_from_slice(&buf);
            }
        }
        tracing::debug!(id, offset, ?mode, "block transferred");
        Ok(())
    }
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new(".")
    }
}
