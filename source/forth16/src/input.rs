use std::io::{self, BufRead};

use crate::memory::MAX_TOKEN;

/// The VM's view of its input stream.
///
/// Tokens are whitespace-delimited runs of at most `MAX_TOKEN` bytes. The
/// byte that ends a token is left in the stream, so a following `key`
/// sees it.
pub struct Input<R> {
    reader: R,
}

impl<R: BufRead> Input<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn peek(&mut self) -> io::Result<Option<u8>> {
        loop {
            match self.reader.fill_buf() {
                Ok(buf) => return Ok(buf.first().copied()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Read the next raw byte, `None` at end of input.
    pub fn byte(&mut self) -> io::Result<Option<u8>> {
        let b = self.peek()?;
        if b.is_some() {
            self.reader.consume(1);
        }
        Ok(b)
    }

    /// Read the next token into `buf`, returning its length. `None` if the
    /// input ends before a token starts.
    pub fn token(&mut self, buf: &mut [u8; MAX_TOKEN]) -> io::Result<Option<usize>> {
        // Find the start, skipping any ASCII whitespace
        loop {
            match self.peek()? {
                None => return Ok(None),
                Some(b) if is_space(b) => self.reader.consume(1),
                Some(_) => break,
            }
        }
        let mut len = 0;
        while len < MAX_TOKEN {
            match self.peek()? {
                Some(b) if !is_space(b) => {
                    buf[len] = b;
                    len += 1;
                    self.reader.consume(1);
                }
                _ => break,
            }
        }
        Ok(Some(len))
    }

    /// Discard input up to and including the next line break.
    pub fn skip_line(&mut self) -> io::Result<()> {
        while let Some(b) = self.byte()? {
            if b == b'\n' {
                break;
            }
        }
        Ok(())
    }
}

/// Parse a numeric token: an optional `-`, then decimal digits or `0x`
/// followed by hex digits. Values wrap to 16 bits.
pub fn parse_number(tok: &[u8]) -> Option<u16> {
    let (neg, rest) = match tok {
        [b'-', rest @ ..] => (true, rest),
        _ => (false, tok),
    };
    let (radix, digits) = match rest {
        [b'0', b'x' | b'X', digits @ ..] => (16, digits),
        _ => (10, rest),
    };
    if digits.is_empty() || !digits.iter().all(|b| (*b as char).is_digit(radix)) {
        return None;
    }
    // long numbers wrap rather than overflow
    let val = digits.iter().fold(0u16, |acc, b| {
        let d = (*b as char).to_digit(radix).unwrap_or(0) as u16;
        acc.wrapping_mul(radix as u16).wrapping_add(d)
    });
    Some(if neg { val.wrapping_neg() } else { val })
}

// Same set as C's `isspace`, which includes vertical tab.
#[inline]
fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

#[cfg(test)]
pub mod test {
    use super::{parse_number, Input};
    use crate::memory::MAX_TOKEN;

    fn tokens(src: &str) -> Vec<String> {
        let mut input = Input::new(src.as_bytes());
        let mut buf = [0u8; MAX_TOKEN];
        let mut out = Vec::new();
        while let Some(len) = input.token(&mut buf).unwrap() {
            out.push(String::from_utf8(buf[..len].to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(tokens("  : sq dup *\n\texit \x0b"), [":", "sq", "dup", "*", "exit"]);
        assert!(tokens(" \n\t ").is_empty());
    }

    #[test]
    fn long_tokens_are_split() {
        let long = "a".repeat(40);
        let toks = tokens(&long);
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[0].len(), MAX_TOKEN);
        assert_eq!(toks[1].len(), 40 - MAX_TOKEN);
    }

    #[test]
    fn delimiter_is_left_unread() {
        let mut input = Input::new(&b"key x"[..]);
        let mut buf = [0u8; MAX_TOKEN];
        assert_eq!(input.token(&mut buf).unwrap(), Some(3));
        assert_eq!(input.byte().unwrap(), Some(b' '));
        assert_eq!(input.byte().unwrap(), Some(b'x'));
        assert_eq!(input.byte().unwrap(), None);
    }

    #[test]
    fn skip_line() {
        let mut input = Input::new(&b"# a comment\n1"[..]);
        input.skip_line().unwrap();
        assert_eq!(input.byte().unwrap(), Some(b'1'));
        input.skip_line().unwrap();
        assert_eq!(input.byte().unwrap(), None);
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number(b"42"), Some(42));
        assert_eq!(parse_number(b"-1"), Some(0xFFFF));
        assert_eq!(parse_number(b"0x1F"), Some(31));
        assert_eq!(parse_number(b"0XfF"), Some(255));
        assert_eq!(parse_number(b"-0x10"), Some(0xFFF0));
        assert_eq!(parse_number(b"65537"), Some(1));
        assert_eq!(parse_number(b"007"), Some(7));

        for bad in [&b"-"[..], b"0x", b"12a", b"dup", b"", b"+5", b"1-"] {
            assert_eq!(parse_number(bad), None, "{:?}", bad);
        }
    }
}
