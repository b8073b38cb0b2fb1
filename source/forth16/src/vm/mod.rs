use std::{
    io::{BufRead, Write},
    mem,
    path::PathBuf,
};

use crate::{
    block::BlockStore,
    dictionary::Dictionary,
    input::Input,
    memory::{
        Memory, DATA_STACK_BASE, DICT_START, HERE, MAX_TOKEN, RETURN_STACK_BASE, RSP, STACK_SIZE,
        STATE,
    },
    stack::Stack,
    word::{Entry, Opcode, WordKind},
    Diagnostic, Error, Halt, Mode,
};

pub mod builtins;

pub(crate) const DATA_STACK: Stack = Stack::new(DATA_STACK_BASE, STACK_SIZE);
pub(crate) const RETURN_STACK: Stack = Stack::new(RETURN_STACK_BASE, STACK_SIZE);

/// Cell the outer interpreter loops on: `[read-word, self-call]`.
pub const OUTER_LOOP: u16 = DICT_START + 2;

/// Host-side settings for a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Params {
    /// Directory holding block files.
    pub block_dir: PathBuf,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_dir(self, block_dir: impl Into<PathBuf>) -> Self {
        Self {
            block_dir: block_dir.into(),
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            block_dir: PathBuf::from("."),
        }
    }
}

/// Forth is the whole machine: its image, the registers that aren't
/// stored in the image, and the streams it talks to.
pub struct Forth<I, O> {
    pub(crate) mem: Memory,
    pub(crate) dict: Dictionary,
    /// Instruction pointer.
    pub(crate) ip: u16,
    /// Data stack pointer, addressing the cell below the accumulator.
    pub(crate) dsp: u16,
    /// Top of the data stack, kept out of memory.
    pub(crate) tos: u16,
    pub(crate) input: Input<I>,
    pub(crate) output: O,
    pub(crate) blocks: BlockStore,
    diagnostics: Vec<Diagnostic>,
    pub(crate) invalid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Halt(Halt),
}

/// What an instruction asks the dispatcher to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Next,
    /// Run the instruction stored at this cell without advancing the
    /// instruction pointer.
    Dispatch(u16),
    Halt(Halt),
}

impl<I: BufRead, O: Write> Forth<I, O> {
    /// Build a fresh machine with the bootstrap vocabulary and an outer
    /// interpreter ready to read from `input`.
    pub fn new(input: I, output: O, params: Params) -> Result<Self, Error> {
        let mut forth = Self::from_parts(
            Memory::new(),
            Dictionary::new(),
            0,
            DATA_STACK.initial_pointer(),
            0,
            input,
            output,
            params,
        );
        forth.bootstrap()?;
        Ok(forth)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        mem: Memory,
        dict: Dictionary,
        ip: u16,
        dsp: u16,
        tos: u16,
        input: I,
        output: O,
        params: Params,
    ) -> Self {
        Self {
            mem,
            dict,
            ip,
            dsp,
            tos,
            input: Input::new(input),
            output,
            blocks: BlockStore::new(params.block_dir),
            diagnostics: Vec::new(),
            invalid: false,
        }
    }

    fn bootstrap(&mut self) -> Result<(), Error> {
        self.mem.set_cell(HERE, DICT_START)?;
        self.mem.set_cell(RSP, RETURN_STACK.initial_pointer())?;

        // The outer interpreter: read a word, then call yourself.
        Dictionary::comma(&mut self.mem, Opcode::Read.cell())?;
        Dictionary::comma(&mut self.mem, Opcode::Call.cell())?;
        self.ip = Dictionary::here(&self.mem)?;
        Dictionary::comma(&mut self.mem, DICT_START)?;
        Dictionary::comma(&mut self.mem, DICT_START + 1)?;

        for (name, op) in Opcode::BOOTSTRAP {
            self.dict.define(&mut self.mem, *op, name.as_bytes())?;
        }
        for (name, op) in Opcode::PRIMITIVES {
            self.dict
                .define(&mut self.mem, Opcode::Compile, name.as_bytes())?;
            Dictionary::comma(&mut self.mem, op.cell())?;
        }
        tracing::debug!(
            here = Dictionary::here(&self.mem)?,
            names = self.dict.names_used(),
            "bootstrapped"
        );
        Ok(())
    }

    /// Run until the input is exhausted, a zero cell is executed, or a
    /// fatal error occurs.
    ///
    /// After [`Halt::EndOfInput`] the machine can be given more input with
    /// [`Forth::set_input`] and run again; the stacks, dictionary and mode
    /// carry over.
    pub fn run(&mut self) -> Result<Halt, Error> {
        self.check_valid()?;
        let res = loop {
            match self.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Halt(halt)) => break Ok(halt),
                Err(e) => break Err(e),
            }
        };
        let res = res.and_then(|halt| {
            self.output.flush()?;
            Ok(halt)
        });
        self.latch(res)
    }

    /// Fetch the next cell and run the instruction it points at.
    fn step(&mut self) -> Result<Step, Error> {
        let target = self.mem.cell(self.ip)?;
        if target == 0 {
            tracing::debug!(ip = self.ip, "null instruction");
            self.ip = OUTER_LOOP;
            self.mem.set_cell(RSP, RETURN_STACK.initial_pointer())?;
            return Ok(Step::Halt(Halt::NullInstruction));
        }
        self.ip = self.ip.wrapping_add(1);
        self.dispatch(target)
    }

    fn dispatch(&mut self, mut target: u16) -> Result<Step, Error> {
        loop {
            let raw = self.mem.cell(target)?;
            let op = Opcode::try_from(raw).map_err(|_| Error::UnknownOpcode {
                addr: target,
                value: raw,
            })?;
            tracing::trace!(ip = self.ip, at = target, %op);
            match self.execute(op, target.wrapping_add(1))? {
                Flow::Next => return Ok(Step::Continue),
                Flow::Dispatch(next) => target = next,
                Flow::Halt(halt) => return Ok(Step::Halt(halt)),
            }
        }
    }

    /// Where reading `entry` should dispatch to in the current mode.
    pub(crate) fn read_target(&self, entry: Entry) -> Result<u16, Error> {
        let kind = Dictionary::kind(&self.mem, entry)?;
        Ok(match (kind, self.mode()?) {
            (WordKind::Primitive(_) | WordKind::Compound, Mode::Run) => entry.code_field(),
            _ => entry.tag_addr(),
        })
    }

    /// Add a dictionary entry whose tag cell is `tag`, named `name` or, if
    /// no name is given, by the next token of the input.
    ///
    /// For a word that compiles a call to itself, pass [`Opcode::Compile`]
    /// and follow up with the body.
    pub fn define_word(&mut self, tag: Opcode, name: Option<&str>) -> Result<Entry, Error> {
        self.check_valid()?;
        let res = self.define_entry(tag, name.map(str::as_bytes));
        self.latch(res)
    }

    pub(crate) fn define_entry(&mut self, tag: Opcode, name: Option<&[u8]>) -> Result<Entry, Error> {
        let mut buf = [0u8; MAX_TOKEN];
        let name = match name {
            Some(name) => name,
            None => {
                let len = self.input.token(&mut buf)?.ok_or(Error::InputExhausted)?;
                &buf[..len]
            }
        };
        let entry = self.dict.define(&mut self.mem, tag, name)?;
        tracing::debug!(name = %String::from_utf8_lossy(name), at = entry.0, %tag, "defined");
        Ok(entry)
    }

    fn check_valid(&self) -> Result<(), Error> {
        if self.invalid {
            return Err(Error::Invalidated);
        }
        Ok(())
    }

    fn latch<T>(&mut self, res: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &res {
            tracing::error!(error = %e, ip = self.ip, "machine invalidated");
            self.invalid = true;
        }
        res
    }

    pub(crate) fn diagnose(&mut self, diag: Diagnostic) {
        tracing::warn!("{diag}");
        self.diagnostics.push(diag);
    }

    /// Drain the recoverable conditions reported since the last call.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        mem::take(&mut self.diagnostics)
    }

    /// Replace the input stream, returning the old one.
    pub fn set_input(&mut self, input: I) -> I {
        mem::replace(&mut self.input, Input::new(input)).into_inner()
    }

    /// Replace the output stream, returning the old one.
    pub fn set_output(&mut self, output: O) -> O {
        mem::replace(&mut self.output, output)
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn is_valid(&self) -> bool {
        !self.invalid
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    /// The most recently defined word.
    pub fn latest(&self) -> Option<Entry> {
        self.dict.latest()
    }

    pub fn here(&self) -> Result<u16, Error> {
        Ok(Dictionary::here(&self.mem)?)
    }

    pub fn mode(&self) -> Result<Mode, Error> {
        Ok(match self.mem.cell(STATE)? {
            0 => Mode::Run,
            _ => Mode::Compile,
        })
    }

    /// The accumulator.
    pub fn top(&self) -> u16 {
        self.tos
    }

    /// Data stack contents, bottom first, ending with the accumulator.
    /// The zero cell every stack starts with is not included.
    pub fn data_stack(&self) -> Vec<u16> {
        let mut stack = DATA_STACK.contents(&self.mem, self.dsp);
        if !stack.is_empty() {
            stack.remove(0);
        }
        stack.push(self.tos);
        stack
    }

    pub fn find(&self, name: &str) -> Result<Option<Entry>, Error> {
        Ok(self.dict.find(&self.mem, name.as_bytes())?)
    }

    pub fn word_kind(&self, entry: Entry) -> Result<WordKind, Error> {
        Ok(Dictionary::kind(&self.mem, entry)?)
    }

    pub fn word_name(&self, entry: Entry) -> Result<String, Error> {
        let name = self.dict.name(&self.mem, entry)?;
        Ok(String::from_utf8_lossy(name).into_owned())
    }

    /// Names of every reachable word, most recent first. Shadowed words
    /// are included.
    pub fn words(&self) -> Vec<String> {
        self.dict
            .words(&self.mem)
            .filter_map(|entry| self.word_name(entry).ok())
            .collect()
    }
}

#[cfg(test)]
pub mod test {
    use std::io::Cursor;

    use super::{Forth, Params, OUTER_LOOP};
    use crate::{
        memory::{DICT_START, HERE, RETURN_STACK_BASE, RSP},
        testutil::{blocking_runtest, blocking_runtest_with, eval, test_forth},
        word::{Opcode, WordKind},
        Error, Halt, Mode,
    };

    fn forth(src: &str) -> Forth<Cursor<Vec<u8>>, Vec<u8>> {
        Forth::new(Cursor::new(src.as_bytes().to_vec()), Vec::new(), Params::default()).unwrap()
    }

    #[test]
    fn bootstrap_layout() {
        let f = forth("");
        let mem = f.memory();
        assert_eq!(mem.cell(DICT_START), Ok(Opcode::Read.cell()));
        assert_eq!(mem.cell(DICT_START + 1), Ok(Opcode::Call.cell()));
        assert_eq!(mem.cell(OUTER_LOOP), Ok(DICT_START));
        assert_eq!(mem.cell(OUTER_LOOP + 1), Ok(DICT_START + 1));
        assert_eq!(mem.cell(RSP), Ok(RETURN_STACK_BASE as u16));
        assert_eq!(f.ip, OUTER_LOOP);

        // 3 bootstrap headers, 25 primitives of 4 cells each
        assert_eq!(mem.cell(HERE), Ok(OUTER_LOOP + 2 + 3 * 3 + 25 * 4));
        assert_eq!(f.mode(), Ok(Mode::Run));
        assert_eq!(f.data_stack(), [0]);

        let colon = f.find(":").unwrap().unwrap();
        assert_eq!(f.word_kind(colon), Ok(WordKind::Direct(Opcode::Define)));
        let dup = f.find("dup").unwrap().unwrap();
        assert_eq!(f.word_kind(dup), Ok(WordKind::Primitive(Opcode::Dup)));
        assert_eq!(f.find(";"), Ok(None));

        let words = f.words();
        assert_eq!(words.len(), 28);
        assert_eq!(words[0], "load");
        assert_eq!(words[27], ":");
    }

    #[test]
    fn define_word_from_input() {
        let mut f = forth("  eight 8");
        let entry = f.define_word(Opcode::Compile, None).unwrap();
        assert_eq!(f.word_name(entry).unwrap(), "eight");

        // the rest of the input is still there
        assert_eq!(f.run(), Ok(Halt::EndOfInput));
        assert_eq!(f.top(), 8);

        assert_eq!(f.define_word(Opcode::Compile, None), Err(Error::InputExhausted));
        assert!(!f.is_valid());
    }

    #[test]
    fn empty_input() {
        let mut f = forth("   \n");
        assert_eq!(f.run(), Ok(Halt::EndOfInput));
        assert_eq!(f.run(), Ok(Halt::EndOfInput));
        assert_eq!(f.ip, OUTER_LOOP);
        assert_eq!(f.memory().cell(RSP), Ok(RETURN_STACK_BASE as u16));
    }

    #[test]
    fn define_word_from_host() {
        let mut f = forth("");
        let entry = f.define_word(Opcode::Compile, Some("seven")).unwrap();
        f.run().unwrap();
        assert_eq!(f.find("seven"), Ok(Some(entry)));
        assert_eq!(f.word_name(entry).unwrap(), "seven");
        assert_eq!(f.latest(), Some(entry));

        let long = "x".repeat(40);
        assert!(f.define_word(Opcode::Compile, Some(&long)).is_err());
        assert_eq!(f.define_word(Opcode::Compile, Some("y")), Err(Error::Invalidated));
        assert_eq!(f.run(), Err(Error::Invalidated));
    }

    #[test]
    fn compound_words() {
        blocking_runtest(
            r#"
            > : square dup * ;
            > 5 square .
            < 25
            > : quad square square ; 3 quad .
            < 81
            > 3 5 - .
            < 65534
            > -3 .
            < 65533
        "#,
        );
    }

    #[test]
    fn shadowing() {
        blocking_runtest(
            r#"
            > : five 5 ;
            > : usefive five . ;
            > : five 6 ;
            > five .
            < 6
            > usefive
            < 5
        "#,
        );
    }

    #[test]
    fn immediate_words() {
        let mut f = test_forth(Params::default());
        assert_eq!(eval(&mut f, ": star immediate 42 emit ;"), Ok(String::new()));

        let before = f.here().unwrap();
        // runs while `foo` is being compiled, and compiles nothing
        assert_eq!(eval(&mut f, ": foo star ;"), Ok("*".to_string()));
        assert_eq!(f.here().unwrap(), before + 5);
        assert_eq!(eval(&mut f, "foo"), Ok(String::new()));

        let star = f.find("star").unwrap().unwrap();
        assert_eq!(f.word_kind(star), Ok(WordKind::Immediate));

        // and in run mode, like any other word
        blocking_runtest_with(
            &mut f,
            r#"
            > 1 star .
            < *1
            > : twice star star ; twice
            < **
        "#,
        );
    }

    #[test]
    fn control_flow() {
        blocking_runtest(
            r#"
            > : yesno if 89 emit else 78 emit then ;
            > 1 yesno 0 yesno 7 yesno
            < YNY
            > : countdown begin dup . 1 - dup 0 = until drop ;
            > 3 countdown
            < 321
            > : abs dup 0x8000 < if else 0 swap - then ;
            > -5 abs . 5 abs .
            < 55
        "#,
        );
    }

    #[test]
    fn prelude_words() {
        blocking_runtest(
            r#"
            > hex 255 . decimal 255 .
            < FF255
            > 0x1F .
            < 31
            > 1 2 over . . .
            < 121
            > 65 emit space 66 emit cr 67 emit
            < A B
            < C
            > here here - .
            < 0
            > : seven [ 3 4 + 2 , , ] ;
            > 99 seven .
            < 7
        "#,
        );
    }

    #[test]
    fn comments_and_key() {
        blocking_runtest(
            r#"
            > 1 . # 2 .
            < 1
            > key .
            < 32
        "#,
        );
    }

    #[test]
    fn diagnostics() {
        blocking_runtest(
            r#"
            ! nosuchword
            ! 1 0 /
            > 1 .
            < 1
        "#,
        );
    }

    #[test]
    fn bare_machine_compiles_everything() {
        blocking_runtest(
            r#"
            ( prelude false )
            > : nop
            ! ;
            > 1 .
        "#,
        );
        let mut f = Forth::new(
            std::io::Cursor::new(b": nop 1 2 .".to_vec()),
            Vec::new(),
            Params::default(),
        )
        .unwrap();
        let before = f.here().unwrap();
        assert_eq!(f.run(), Ok(Halt::EndOfInput));
        assert!(f.output().is_empty());
        assert_eq!(f.mode(), Ok(Mode::Compile));
        // header, call marker, two literals and a call to `.`
        assert_eq!(f.here().unwrap(), before + 3 + 1 + 4 + 1);
    }

    #[test]
    fn unknown_opcode_invalidates() {
        let mut f = test_forth(Params::default());
        assert_eq!(eval(&mut f, ": boom [ 1 , ] ;"), Ok(String::new()));

        let res = eval(&mut f, "boom");
        assert!(matches!(res, Err(Error::UnknownOpcode { value, .. }) if value != 0));
        assert!(!f.is_valid());

        let image = f.memory().as_bytes().to_vec();
        assert_eq!(eval(&mut f, "1 2 +"), Err(Error::Invalidated));
        assert_eq!(f.define_word(Opcode::Compile, Some("late")), Err(Error::Invalidated));
        assert_eq!(f.memory().as_bytes(), &image[..]);
    }

    #[test]
    fn null_instruction() {
        let mut f = test_forth(Params::default());
        // `0 ,` compiles a zero cell into the body
        eval(&mut f, ": halt [ 0 , ] ;").unwrap();
        f.set_input(std::io::Cursor::new(b"7 halt 8".to_vec()));
        assert_eq!(f.run(), Ok(Halt::NullInstruction));
        assert_eq!(f.top(), 7);
        assert_eq!(f.run(), Ok(Halt::EndOfInput));
        assert_eq!(f.top(), 8);
    }

    #[test]
    fn null_instruction_unwinds_calls() {
        let mut f = test_forth(Params::default());
        eval(&mut f, ": halt [ 0 , ] ; : deep halt ; : deeper deep ;").unwrap();

        // far more nested halts than the return stack has room for
        for _ in 0..1000 {
            f.set_input(std::io::Cursor::new(b"deeper".to_vec()));
            assert_eq!(f.run(), Ok(Halt::NullInstruction));
            assert_eq!(f.memory().cell(RSP), Ok(RETURN_STACK_BASE as u16));
        }
        assert_eq!(eval(&mut f, "2 3 + ."), Ok("5".to_string()));
        assert!(f.is_valid());
    }

    #[test]
    fn return_stack_overflow() {
        let mut f = test_forth(Params::default());
        eval(&mut f, ": forever forever ;").unwrap();
        assert!(matches!(
            eval(&mut f, "forever"),
            Err(Error::Stack(crate::stack::StackError::CapacityExceeded))
        ));
    }
}
