//! Terminal byte stream to key events

/// Keys the login prompt reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Escape,
    Backspace,
    /// Session selector
    F1,
}

const ESC: u8 = 0x1b;

/// Longest control sequence we buffer before giving up on it
const MAX_SEQUENCE: usize = 16;

/// Incremental decoder for raw-mode terminal input
///
/// Escape sequences and multi-byte characters may span reads. An ESC that
/// ends a read with nothing after it is a lone Escape key press.
#[derive(Debug, Default)]
pub struct KeyDecoder {
    sequence: Vec<u8>,
    utf8: Vec<u8>,
    utf8_len: usize,
    last_cr: bool,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one read's worth of bytes
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Key> {
        let mut keys = Vec::new();
        for &b in bytes {
            self.step(b, &mut keys);
        }
        if self.sequence == [ESC] {
            self.sequence.clear();
            keys.push(Key::Escape);
        }
        keys
    }

    fn step(&mut self, b: u8, keys: &mut Vec<Key>) {
        if !self.sequence.is_empty() {
            self.step_sequence(b, keys);
            return;
        }

        if !self.utf8.is_empty() {
            if b & 0xc0 == 0x80 {
                self.utf8.push(b);
                if self.utf8.len() == self.utf8_len {
                    if let Some(c) = std::str::from_utf8(&self.utf8).ok().and_then(|s| s.chars().next()) {
                        keys.push(Key::Char(c));
                    }
                    self.utf8.clear();
                }
                return;
            }
            // Truncated character
            self.utf8.clear();
        }

        let was_cr = std::mem::replace(&mut self.last_cr, b == b'\r');
        match b {
            ESC => self.sequence.push(b),
            b'\r' => keys.push(Key::Enter),
            b'\n' if was_cr => {}
            b'\n' => keys.push(Key::Enter),
            0x7f | 0x08 => keys.push(Key::Backspace),
            0x00..=0x1f => {}
            0x20..=0x7e => keys.push(Key::Char(b as char)),
            0xc0..=0xdf => self.start_utf8(b, 2),
            0xe0..=0xef => self.start_utf8(b, 3),
            0xf0..=0xf7 => self.start_utf8(b, 4),
            _ => {}
        }
    }

    fn start_utf8(&mut self, lead: u8, len: usize) {
        self.utf8.push(lead);
        self.utf8_len = len;
    }

    fn step_sequence(&mut self, b: u8, keys: &mut Vec<Key>) {
        self.sequence.push(b);
        match self.sequence.as_slice() {
            [ESC, b'O'] | [ESC, b'['] => {}
            [ESC, b'O', b'P'] => {
                keys.push(Key::F1);
                self.sequence.clear();
            }
            [ESC, b'O', _] => self.sequence.clear(),
            // Linux console function keys: ESC [ [ A..E
            [ESC, b'[', b'['] => {}
            [ESC, b'[', b'[', key] => {
                if *key == b'A' {
                    keys.push(Key::F1);
                }
                self.sequence.clear();
            }
            [ESC, b'[', .., last] if (0x40..=0x7e).contains(last) => {
                if self.sequence == b"\x1b[11~" {
                    keys.push(Key::F1);
                }
                self.sequence.clear();
            }
            [ESC, b'[', ..] => {
                if self.sequence.len() > MAX_SEQUENCE {
                    self.sequence.clear();
                }
            }
            [ESC, other] => {
                let other = *other;
                self.sequence.clear();
                keys.push(Key::Escape);
                self.step(other, keys);
            }
            _ => self.sequence.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Vec<Key> {
        KeyDecoder::new().feed(bytes)
    }

    #[test]
    fn test_printable_and_controls() {
        assert_eq!(
            decode(b"ab\x7f\x08\r"),
            vec![Key::Char('a'), Key::Char('b'), Key::Backspace, Key::Backspace, Key::Enter]
        );
        assert_eq!(decode(b"\n"), vec![Key::Enter]);
        assert_eq!(decode(b"x\r\n"), vec![Key::Char('x'), Key::Enter]);
        assert_eq!(decode(b"\x01\x02"), vec![]);
    }

    #[test]
    fn test_utf8() {
        assert_eq!(decode("é€".as_bytes()), vec![Key::Char('é'), Key::Char('€')]);

        let mut decoder = KeyDecoder::new();
        let bytes = "ü".as_bytes();
        assert_eq!(decoder.feed(&bytes[..1]), vec![]);
        assert_eq!(decoder.feed(&bytes[1..]), vec![Key::Char('ü')]);
    }

    #[test]
    fn test_escape_sequences() {
        assert_eq!(decode(b"\x1b"), vec![Key::Escape]);
        assert_eq!(decode(b"\x1bOP"), vec![Key::F1]);
        assert_eq!(decode(b"\x1b[11~"), vec![Key::F1]);
        // Linux console F1..F5
        assert_eq!(decode(b"\x1b[[A"), vec![Key::F1]);
        assert_eq!(decode(b"\x1b[[Ex"), vec![Key::Char('x')]);
        // Arrow keys are swallowed
        assert_eq!(decode(b"\x1b[A\x1b[D"), vec![]);
        // ESC followed by a plain key
        assert_eq!(decode(b"\x1bq"), vec![Key::Escape, Key::Char('q')]);
    }

    #[test]
    fn test_sequence_split_across_reads() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(decoder.feed(b"\x1b["), vec![]);
        assert_eq!(decoder.feed(b"11"), vec![]);
        assert_eq!(decoder.feed(b"~a"), vec![Key::F1, Key::Char('a')]);
        assert_eq!(decoder.feed(b"\x1b[["), vec![]);
        assert_eq!(decoder.feed(b"B"), vec![]);
    }
}
