use core::fmt;

/// A machine instruction. The discriminants are stored in the image, so
/// they are part of the snapshot and block formats and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Push = 0,
    Compile = 1,
    Call = 2,
    Define = 3,
    Immediate = 4,
    Comment = 5,
    Read = 6,
    Load = 7,
    Store = 8,
    Sub = 9,
    Add = 10,
    Mul = 11,
    Div = 12,
    Less = 13,
    Exit = 14,
    Emit = 15,
    Key = 16,
    FromR = 17,
    ToR = 18,
    Jump = 19,
    JumpZero = 20,
    PrintNum = 21,
    Quote = 22,
    Comma = 23,
    Equal = 24,
    Swap = 25,
    Dup = 26,
    Drop = 27,
    Tail = 28,
    BlockSave = 29,
    BlockLoad = 30,
}

impl Opcode {
    /// Words whose tag is the opcode itself. They run whenever they are read.
    pub const BOOTSTRAP: &'static [(&'static str, Opcode)] = &[
        (":", Opcode::Define),
        ("immediate", Opcode::Immediate),
        ("#", Opcode::Comment),
    ];

    /// Words with an indirect tag whose code field holds the opcode, in
    /// the order they are added to a fresh dictionary.
    pub const PRIMITIVES: &'static [(&'static str, Opcode)] = &[
        ("read", Opcode::Read),
        ("@", Opcode::Load),
        ("!", Opcode::Store),
        ("-", Opcode::Sub),
        ("+", Opcode::Add),
        ("*", Opcode::Mul),
        ("/", Opcode::Div),
        ("<", Opcode::Less),
        ("exit", Opcode::Exit),
        ("emit", Opcode::Emit),
        ("key", Opcode::Key),
        ("r>", Opcode::FromR),
        (">r", Opcode::ToR),
        ("j", Opcode::Jump),
        ("jz", Opcode::JumpZero),
        (".", Opcode::PrintNum),
        ("'", Opcode::Quote),
        (",", Opcode::Comma),
        ("=", Opcode::Equal),
        ("swap", Opcode::Swap),
        ("dup", Opcode::Dup),
        ("drop", Opcode::Drop),
        ("tail", Opcode::Tail),
        ("save", Opcode::BlockSave),
        ("load", Opcode::BlockLoad),
    ];

    pub fn cell(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownOpcode(pub u16);

impl TryFrom<u16> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        use Opcode::*;
        const ALL: [Opcode; 31] = [
            Push, Compile, Call, Define, Immediate, Comment, Read, Load, Store, Sub, Add, Mul,
            Div, Less, Exit, Emit, Key, FromR, ToR, Jump, JumpZero, PrintNum, Quote, Comma,
            Equal, Swap, Dup, Drop, Tail, BlockSave, BlockLoad,
        ];
        ALL.get(usize::from(value))
            .copied()
            .ok_or(UnknownOpcode(value))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = Self::BOOTSTRAP
            .iter()
            .chain(Self::PRIMITIVES.iter())
            .find(|(_, op)| op == self)
            .map(|(name, _)| *name);
        match name {
            Some(name) => f.write_str(name),
            None => write!(f, "{self:?}"),
        }
    }
}

/// How a dictionary entry is dispatched when the outer interpreter reads
/// its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordKind {
    /// The tag cell is run as-is regardless of mode (`:`, `immediate`, `#`).
    Direct(Opcode),
    /// Indirect tag, the code field holds a primitive opcode.
    Primitive(Opcode),
    /// Indirect tag, the code field holds the call marker.
    Compound,
    /// Tag rewritten to the call marker by `immediate`.
    Immediate,
}

/// A dictionary entry, identified by the address of its link cell.
///
/// Layout: `[link, name-offset, tag, code field, ...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry(pub u16);

impl Entry {
    pub const HEADER_CELLS: u16 = 3;

    #[inline]
    pub fn link_addr(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn name_addr(self) -> u16 {
        self.0.wrapping_add(1)
    }

    #[inline]
    pub fn tag_addr(self) -> u16 {
        self.0.wrapping_add(2)
    }

    #[inline]
    pub fn code_field(self) -> u16 {
        self.0.wrapping_add(3)
    }
}
