use crate::{
    memory::{
        Memory, MemoryError, CORE_SIZE, DICT_END, DICT_START, HERE, MAX_TOKEN, NAME_BASE,
        NAME_END, TOKEN_LEN,
    },
    word::{Entry, Opcode, WordKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    /// The dictionary free pointer left the dictionary region.
    CapacityExceeded,
    NameTableFull,
    NameTooLong,
    EmptyName,
    /// Walking the link chain left the dictionary or never ended.
    CorruptLink(u16),
    /// An entry's name offset doesn't point at a terminated name.
    BadNameOffset(u16),
    Memory(MemoryError),
}

impl From<MemoryError> for DictError {
    fn from(me: MemoryError) -> Self {
        DictError::Memory(me)
    }
}

/// Link value that ends the chain. It is the address of the `RSP` register,
/// which can never be an entry.
pub const SENTINEL: u16 = 1;

/// Bookkeeping for the dictionary and name table.
///
/// The entries themselves live in the image; the dictionary free pointer
/// is the `HERE` register. Only the head of the chain and the name table
/// free pointer are held outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dictionary {
    latest: u16,
    names: u16,
}

impl Dictionary {
    pub fn new() -> Self {
        Self {
            latest: SENTINEL,
            names: TOKEN_LEN as u16,
        }
    }

    pub(crate) fn from_raw(latest: u16, names: u16) -> Self {
        Self { latest, names }
    }

    /// The most recently defined entry.
    pub fn latest(&self) -> Option<Entry> {
        (self.latest != SENTINEL).then_some(Entry(self.latest))
    }

    pub(crate) fn latest_raw(&self) -> u16 {
        self.latest
    }

    /// Offset of the next free byte in the name table.
    pub fn names_used(&self) -> u16 {
        self.names
    }

    pub fn here(mem: &Memory) -> Result<u16, DictError> {
        Ok(mem.cell(HERE)?)
    }

    /// Append one cell at `here`.
    pub fn comma(mem: &mut Memory, val: u16) -> Result<(), DictError> {
        let here = Self::here(mem)?;
        if here < DICT_START || usize::from(here) >= DICT_END {
            return Err(DictError::CapacityExceeded);
        }
        mem.set_cell(here, val)?;
        mem.set_cell(HERE, here + 1)?;
        Ok(())
    }

    /// Append a header `[link, name-offset, tag]` and make it the head of
    /// the chain.
    pub fn define(&mut self, mem: &mut Memory, tag: Opcode, name: &[u8]) -> Result<Entry, DictError> {
        if name.is_empty() {
            return Err(DictError::EmptyName);
        }
        if name.len() > MAX_TOKEN {
            return Err(DictError::NameTooLong);
        }
        let here = Self::here(mem)?;
        if here < DICT_START || usize::from(here) + usize::from(Entry::HEADER_CELLS) > DICT_END {
            return Err(DictError::CapacityExceeded);
        }
        let name_start = NAME_BASE + usize::from(self.names);
        if name_start + name.len() + 1 > NAME_END {
            return Err(DictError::NameTableFull);
        }

        mem.write_c_str(name_start, name)?;
        Self::comma(mem, self.latest)?;
        Self::comma(mem, self.names)?;
        Self::comma(mem, tag.cell())?;
        self.latest = here;
        self.names += name.len() as u16 + 1;
        Ok(Entry(here))
    }

    /// Rewrite the tag of the word being defined to the call marker, so it
    /// runs even in compile mode. Its body then starts right after the tag.
    pub fn mark_immediate(mem: &mut Memory) -> Result<(), DictError> {
        let here = Self::here(mem)?;
        let tag = here.wrapping_sub(2);
        if tag < DICT_START || usize::from(tag) >= DICT_END {
            return Err(DictError::CapacityExceeded);
        }
        mem.set_cell(HERE, tag)?;
        Self::comma(mem, Opcode::Call.cell())
    }

    /// The name stored for `entry`.
    pub fn name<'m>(&self, mem: &'m Memory, entry: Entry) -> Result<&'m [u8], DictError> {
        let offset = mem.cell(entry.name_addr())?;
        mem.c_str(NAME_BASE + usize::from(offset), NAME_END)
            .ok_or(DictError::BadNameOffset(offset))
    }

    /// Most recent entry named `token`. Older entries with the same name
    /// are shadowed.
    pub fn find(&self, mem: &Memory, token: &[u8]) -> Result<Option<Entry>, DictError> {
        let mut cur = self.latest;
        for _ in 0..CORE_SIZE {
            if cur == SENTINEL {
                return Ok(None);
            }
            if cur < DICT_START || usize::from(cur) + usize::from(Entry::HEADER_CELLS) > DICT_END {
                return Err(DictError::CorruptLink(cur));
            }
            let entry = Entry(cur);
            if self.name(mem, entry)? == token {
                return Ok(Some(entry));
            }
            cur = mem.cell(entry.link_addr())?;
        }
        Err(DictError::CorruptLink(cur))
    }

    /// Decode how `entry` dispatches.
    pub fn kind(mem: &Memory, entry: Entry) -> Result<WordKind, KindError> {
        let tag = mem.cell(entry.tag_addr())?;
        match Opcode::try_from(tag) {
            Ok(Opcode::Compile) => {
                let code = mem.cell(entry.code_field())?;
                match Opcode::try_from(code) {
                    Ok(Opcode::Call) => Ok(WordKind::Compound),
                    Ok(op) => Ok(WordKind::Primitive(op)),
                    Err(_) => Err(KindError::UnknownOpcode {
                        addr: entry.code_field(),
                        value: code,
                    }),
                }
            }
            Ok(Opcode::Call) => Ok(WordKind::Immediate),
            Ok(op) => Ok(WordKind::Direct(op)),
            Err(_) => Err(KindError::UnknownOpcode {
                addr: entry.tag_addr(),
                value: tag,
            }),
        }
    }

    /// Every entry reachable by name, most recent first.
    pub fn words<'m>(&self, mem: &'m Memory) -> impl Iterator<Item = Entry> + 'm {
        let mut cur = self.latest;
        let mut steps_left = CORE_SIZE;
        core::iter::from_fn(move || {
            if cur == SENTINEL
                || cur < DICT_START
                || usize::from(cur) >= DICT_END
                || steps_left == 0
            {
                return None;
            }
            steps_left -= 1;
            let entry = Entry(cur);
            cur = mem.cell(entry.link_addr()).ok()?;
            Some(entry)
        })
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindError {
    UnknownOpcode { addr: u16, value: u16 },
    Memory(MemoryError),
}

impl From<MemoryError> for KindError {
    fn from(me: MemoryError) -> Self {
        KindError::Memory(me)
    }
}
