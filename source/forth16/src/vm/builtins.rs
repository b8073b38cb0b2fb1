use std::io::{BufRead, Write};

use super::{Flow, Forth, DATA_STACK, OUTER_LOOP, RETURN_STACK};
use crate::{
    block::BlockMode,
    dictionary::Dictionary,
    input::parse_number,
    memory::{ADDRESS_MASK, BASE, LITERAL, MAX_TOKEN, NAME_BASE, RSP, STATE},
    word::Opcode,
    Diagnostic, Error, Halt, Mode,
};

/// Result cell of a failed block transfer.
pub const BLOCK_FAILED: u16 = 0xFFFF;
/// What `key` yields at end of input.
pub const KEY_EOF: u16 = 0xFFFF;

impl<I: BufRead, O: Write> Forth<I, O> {
    /// Run one instruction. `x` is the cell after the one holding `op`.
    pub(crate) fn execute(&mut self, op: Opcode, x: u16) -> Result<Flow, Error> {
        match op {
            Opcode::Push => self.literal()?,
            Opcode::Compile => Dictionary::comma(&mut self.mem, x)?,
            Opcode::Call => self.call(x)?,
            Opcode::Define => self.colon()?,
            Opcode::Immediate => Dictionary::mark_immediate(&mut self.mem)?,
            Opcode::Comment => self.input.skip_line()?,
            Opcode::Read => return self.read_word(),
            Opcode::Load => self.tos = self.mem.cell(self.tos & ADDRESS_MASK)?,
            Opcode::Store => self.store()?,
            Opcode::Sub => self.binary(u16::wrapping_sub)?,
            Opcode::Add => self.binary(u16::wrapping_add)?,
            Opcode::Mul => self.binary(u16::wrapping_mul)?,
            Opcode::Div => self.div()?,
            Opcode::Less => self.binary(|a, b| u16::from(a < b))?,
            Opcode::Exit => self.ip = self.rpop()?,
            Opcode::Emit => self.emit()?,
            Opcode::Key => self.key()?,
            Opcode::FromR => {
                let val = self.rpop()?;
                self.push(val)?;
            }
            Opcode::ToR => {
                self.rpush(self.tos)?;
                self.drop()?;
            }
            Opcode::Jump => self.jump()?,
            Opcode::JumpZero => self.jump_if_zero()?,
            Opcode::PrintNum => self.pop_print()?,
            Opcode::Quote => self.literal()?,
            Opcode::Comma => {
                Dictionary::comma(&mut self.mem, self.tos)?;
                self.drop()?;
            }
            Opcode::Equal => self.binary(|a, b| u16::from(a == b))?,
            Opcode::Swap => self.swap()?,
            Opcode::Dup => self.push(self.tos)?,
            Opcode::Drop => self.drop()?,
            Opcode::Tail => {
                self.rpop()?;
            }
            Opcode::BlockSave => self.block(BlockMode::Write)?,
            Opcode::BlockLoad => self.block(BlockMode::Read)?,
        }
        Ok(Flow::Next)
    }

    /// Make `val` the accumulator, pushing the old one down.
    pub(crate) fn push(&mut self, val: u16) -> Result<(), Error> {
        DATA_STACK.push(&mut self.mem, &mut self.dsp, self.tos)?;
        self.tos = val;
        Ok(())
    }

    /// Take the cell below the accumulator.
    fn nos(&mut self) -> Result<u16, Error> {
        Ok(DATA_STACK.pop(&self.mem, &mut self.dsp)?)
    }

    /// Discard the accumulator, replacing it with the cell below.
    fn drop(&mut self) -> Result<(), Error> {
        self.tos = self.nos()?;
        Ok(())
    }

    fn rpush(&mut self, val: u16) -> Result<(), Error> {
        let mut rsp = self.mem.cell(RSP)?;
        RETURN_STACK.push(&mut self.mem, &mut rsp, val)?;
        self.mem.set_cell(RSP, rsp)?;
        Ok(())
    }

    fn rpop(&mut self) -> Result<u16, Error> {
        let mut rsp = self.mem.cell(RSP)?;
        let val = RETURN_STACK.pop(&self.mem, &mut rsp)?;
        self.mem.set_cell(RSP, rsp)?;
        Ok(val)
    }

    /// The cell at the instruction pointer, skipping over it.
    fn next_cell(&mut self) -> Result<u16, Error> {
        let val = self.mem.cell(self.ip)?;
        self.ip = self.ip.wrapping_add(1);
        Ok(val)
    }

    fn literal(&mut self) -> Result<(), Error> {
        let val = self.next_cell()?;
        self.push(val)
    }

    fn call(&mut self, body: u16) -> Result<(), Error> {
        self.rpush(self.ip)?;
        self.ip = body;
        Ok(())
    }

    fn binary(&mut self, f: impl FnOnce(u16, u16) -> u16) -> Result<(), Error> {
        let a = self.nos()?;
        self.tos = f(a, self.tos);
        Ok(())
    }

    fn div(&mut self) -> Result<(), Error> {
        if self.tos == 0 {
            // leaves the dividend on the stack and a zero quotient on top
            self.diagnose(Diagnostic::DivideByZero);
            return Ok(());
        }
        self.binary(|a, b| a / b)
    }

    fn store(&mut self) -> Result<(), Error> {
        let addr = self.tos & ADDRESS_MASK;
        let val = self.nos()?;
        self.mem.set_cell(addr, val)?;
        self.drop()
    }

    fn swap(&mut self) -> Result<(), Error> {
        let a = self.nos()?;
        DATA_STACK.push(&mut self.mem, &mut self.dsp, self.tos)?;
        self.tos = a;
        Ok(())
    }

    fn emit(&mut self) -> Result<(), Error> {
        self.output.write_all(&[self.tos as u8])?;
        self.drop()
    }

    fn key(&mut self) -> Result<(), Error> {
        let val = self.input.byte()?.map_or(KEY_EOF, u16::from);
        self.push(val)
    }

    fn jump(&mut self) -> Result<(), Error> {
        let offset = self.mem.cell(self.ip)?;
        self.ip = self.ip.wrapping_add(offset);
        Ok(())
    }

    fn jump_if_zero(&mut self) -> Result<(), Error> {
        let offset = match self.tos {
            0 => self.mem.cell(self.ip)?,
            _ => 1,
        };
        self.ip = self.ip.wrapping_add(offset);
        self.drop()
    }

    fn pop_print(&mut self) -> Result<(), Error> {
        match self.mem.cell(BASE)? {
            0 => write!(self.output, "{}", self.tos)?,
            _ => write!(self.output, "{:X}", self.tos)?,
        }
        self.drop()
    }

    /// `( offset id -- status )`
    fn block(&mut self, mode: BlockMode) -> Result<(), Error> {
        let id = self.tos;
        let offset = self.nos()?;
        let res = self
            .blocks
            .transfer(self.mem.as_bytes_mut(), offset, id, mode);
        self.tos = match res {
            Ok(()) => 0,
            Err(e) => {
                self.diagnose(e.into());
                BLOCK_FAILED
            }
        };
        Ok(())
    }

    /// `:` reads a name, defines it and switches to compile mode.
    fn colon(&mut self) -> Result<(), Error> {
        self.mem.set_cell(STATE, 1)?;
        self.define_entry(Opcode::Compile, None)?;
        Dictionary::comma(&mut self.mem, Opcode::Call.cell())?;
        Ok(())
    }

    /// The outer interpreter's single step: read one token and either run
    /// it, compile it, or treat it as a number.
    fn read_word(&mut self) -> Result<Flow, Error> {
        // Drop the return address pushed by the outer loop's self-call, so
        // the loop runs in constant return stack space.
        let discarded = self.rpop()?;

        let mut buf = [0u8; MAX_TOKEN];
        let Some(len) = self.input.token(&mut buf)? else {
            self.rpush(discarded)?;
            self.ip = self.ip.wrapping_sub(1);
            return Ok(Flow::Halt(Halt::EndOfInput));
        };
        let token = &buf[..len];
        self.mem.write_c_str(NAME_BASE, token)?;

        if let Some(entry) = self.dict.find(&self.mem, token)? {
            return Ok(Flow::Dispatch(self.read_target(entry)?));
        }

        match (parse_number(token), self.mode()?) {
            (Some(val), Mode::Compile) => {
                Dictionary::comma(&mut self.mem, LITERAL)?;
                Dictionary::comma(&mut self.mem, val)?;
            }
            (Some(val), Mode::Run) => self.push(val)?,
            (None, _) => {
                let tok = String::from_utf8_lossy(token).into_owned();
                self.diagnose(Diagnostic::NotAWordOrNumber(tok));
            }
        }
        Ok(Flow::Next)
    }

    /// Leave the machine at the outer interpreter, with empty stacks and
    /// in run mode, keeping the dictionary.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.mem.set_cell(STATE, 0)?;
        self.mem.set_cell(RSP, RETURN_STACK.initial_pointer())?;
        self.dsp = DATA_STACK.initial_pointer();
        self.tos = 0;
        self.ip = OUTER_LOOP;
        Ok(())
    }
}
