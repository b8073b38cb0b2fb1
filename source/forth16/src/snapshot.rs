//! Whole-machine images.
//!
//! A snapshot is the raw image followed by the registers that live outside
//! of it, each a little-endian cell:
//!
//! | offset  | contents                         |
//! |---------|----------------------------------|
//! | 0       | image (`CORE_BYTES` bytes)       |
//! | 65536   | latest dictionary entry          |
//! | 65538   | name table free offset           |
//! | 65540   | instruction pointer              |
//! | 65542   | data stack pointer               |
//! | 65544   | accumulator                      |
//! | 65546   | flags (bit 0: invalidated)       |

use std::io::{self, BufRead, Read, Write};

use crate::{
    dictionary::Dictionary,
    memory::{Memory, CORE_BYTES, NAME_BASE, NAME_END},
    Forth, Params,
};

const TRAILER_CELLS: usize = 6;

/// Length of every snapshot in bytes.
pub const SNAPSHOT_SIZE: usize = CORE_BYTES + TRAILER_CELLS * 2;

const FLAG_INVALID: u16 = 1;

impl<I: BufRead, O: Write> Forth<I, O> {
    /// Write a snapshot of the machine. Invalidated machines can be
    /// snapshotted too, and stay invalidated when restored.
    pub fn snapshot<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_all(self.mem.as_bytes())?;
        let flags = if self.invalid { FLAG_INVALID } else { 0 };
        let trailer = [
            self.dict.latest_raw(),
            self.dict.names_used(),
            self.ip,
            self.dsp,
            self.tos,
            flags,
        ];
        for cell in trailer {
            w.write_all(&cell.to_le_bytes())?;
        }
        w.flush()
    }

    /// Rebuild a machine from a snapshot written by [`Forth::snapshot`].
    pub fn restore<R: Read>(mut r: R, input: I, output: O, params: Params) -> io::Result<Self> {
        let mut bytes = vec![0u8; SNAPSHOT_SIZE];
        r.read_exact(&mut bytes)?;
        let (image, trailer) = bytes.split_at(CORE_BYTES);
        let mut cells = trailer
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]));
        let mut next = || cells.next().unwrap_or_default();
        let (latest, names, ip, dsp, tos, flags) = (next(), next(), next(), next(), next(), next());

        if NAME_BASE + usize::from(names) > NAME_END || flags & !FLAG_INVALID != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "snapshot trailer is corrupt",
            ));
        }
        let mem = Memory::from_bytes(image)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad image size"))?;

        let mut forth = Self::from_parts(
            mem,
            Dictionary::from_raw(latest, names),
            ip,
            dsp,
            tos,
            input,
            output,
            params,
        );
        forth.invalid = flags & FLAG_INVALID != 0;
        tracing::debug!(latest, names, ip, invalid = forth.invalid, "restored snapshot");
        Ok(forth)
    }
}
