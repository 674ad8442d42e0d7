// Raw terminal input -> key sequences
// Escape sequences arrive as a burst of bytes, so characters are read until
// the burst dries up. Held-down scroll and seek keys repeat quickly; their
// bytes are drained so repeats don't pile up behind the current press.

use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::trace;

/// Longest sequence kept from one burst of input
pub const MAX_SEQ_LEN: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeySequence(Vec<u8>);

impl KeySequence {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn first_byte(&self) -> Option<u8> {
        self.0.first().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for KeySequence {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for KeySequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            match byte {
                0x1b => write!(f, "^[")?,
                b'\n' => write!(f, "\\n")?,
                b'\r' => write!(f, "\\r")?,
                b' ' => write!(f, "Space")?,
                _ => write!(f, "{}", byte.escape_ascii())?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    NoInput,
    /// Input was signalled but nothing could be read
    Released,
    Key { sequence: KeySequence, held: bool },
}

/// Non-blocking byte input
pub trait ByteSource {
    fn input_available(&mut self) -> bool;
    /// Read up to `buf.len()` bytes without blocking; 0 when nothing is there
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

enum CharRead {
    Char(Vec<u8>),
    Nothing,
    Malformed,
}

pub struct InputSequenceDecoder<S> {
    source: S,
    continuous: Vec<KeySequence>,
    throttle: Duration,
}

impl<S: ByteSource> InputSequenceDecoder<S> {
    pub fn new(source: S, continuous: Vec<KeySequence>, throttle: Duration) -> Self {
        Self {
            source,
            continuous,
            throttle,
        }
    }

    pub fn poll(&mut self) -> InputEvent {
        if !self.source.input_available() {
            return InputEvent::NoInput;
        }

        let mut sequence: Vec<u8> = Vec::new();
        while self.source.input_available() {
            let ch = match self.read_char() {
                CharRead::Char(ch) => ch,
                CharRead::Malformed => return InputEvent::NoInput,
                CharRead::Nothing if sequence.is_empty() => return InputEvent::Released,
                CharRead::Nothing => break,
            };

            if sequence.len() + ch.len() >= MAX_SEQ_LEN {
                break;
            }
            sequence.extend_from_slice(&ch);

            if !self.throttle.is_zero() {
                thread::sleep(self.throttle);
            }

            if self.is_continuous(&sequence) {
                // swallow the repeats the terminal already queued
                self.read_char();
                self.read_char();
                trace!("Held key {}", KeySequence(sequence.clone()));
                return InputEvent::Key {
                    sequence: KeySequence(sequence),
                    held: true,
                };
            }
        }

        if sequence.is_empty() {
            return InputEvent::NoInput;
        }

        InputEvent::Key {
            sequence: KeySequence(sequence),
            held: false,
        }
    }

    fn is_continuous(&self, sequence: &[u8]) -> bool {
        self.continuous.iter().any(|key| key.as_bytes() == sequence)
    }

    /// One UTF-8 encoded character
    fn read_char(&mut self) -> CharRead {
        let mut lead = [0u8; 1];
        if self.source.read(&mut lead) == 0 {
            return CharRead::Nothing;
        }

        let extra = match lead[0] {
            b if b & 0x80 == 0x00 => 0,
            b if b & 0xE0 == 0xC0 => 1,
            b if b & 0xF0 == 0xE0 => 2,
            b if b & 0xF8 == 0xF0 => 3,
            _ => return CharRead::Malformed,
        };

        let mut ch = vec![lead[0]];
        if extra > 0 {
            let mut rest = [0u8; 3];
            if self.source.read(&mut rest[..extra]) != extra {
                return CharRead::Malformed;
            }
            ch.extend_from_slice(&rest[..extra]);
        }
        CharRead::Char(ch)
    }
}

/// Terminal stdin in raw mode, polled with a zero timeout
#[derive(Debug)]
pub struct StdinSource {
    fd: libc::c_int,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            fd: libc::STDIN_FILENO,
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteSource for StdinSource {
    fn input_available(&mut self) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut pfd, 1, 0) };
        ready > 0 && (pfd.revents & libc::POLLIN) != 0
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() || !self.input_available() {
            return 0;
        }
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            0
        } else {
            n as usize
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::ByteSource;
    use std::collections::VecDeque;

    /// Scripted input; `signal_only` reports input without delivering bytes
    #[derive(Debug, Default)]
    pub struct ScriptedSource {
        pub bytes: VecDeque<u8>,
        pub signal_only: bool,
    }

    impl ScriptedSource {
        pub fn with(bytes: &[u8]) -> Self {
            Self {
                bytes: bytes.iter().copied().collect(),
                signal_only: false,
            }
        }
    }

    impl ByteSource for ScriptedSource {
        fn input_available(&mut self) -> bool {
            self.signal_only || !self.bytes.is_empty()
        }

        fn read(&mut self, buf: &mut [u8]) -> usize {
            let mut n = 0;
            while n < buf.len() {
                match self.bytes.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedSource;
    use super::*;

    fn decoder(bytes: &[u8]) -> InputSequenceDecoder<ScriptedSource> {
        InputSequenceDecoder::new(
            ScriptedSource::with(bytes),
            vec![KeySequence::from("\x1b[A"), KeySequence::from("j")],
            Duration::ZERO,
        )
    }

    #[test]
    fn escape_sequence_arrives_whole() {
        let mut decoder = decoder(b"\x1b[C");
        assert_eq!(
            decoder.poll(),
            InputEvent::Key {
                sequence: KeySequence::from("\x1b[C"),
                held: false
            }
        );
        assert_eq!(decoder.poll(), InputEvent::NoInput);
    }

    #[test]
    fn multibyte_characters_are_read_whole() {
        let mut decoder = decoder("é".as_bytes());
        assert_eq!(
            decoder.poll(),
            InputEvent::Key {
                sequence: KeySequence::from("é"),
                held: false
            }
        );
    }

    #[test]
    fn short_utf8_read_is_no_input() {
        let mut decoder = decoder(&[0xE2, 0x82]);
        assert_eq!(decoder.poll(), InputEvent::NoInput);
    }

    #[test]
    fn continuous_key_drains_two_characters() {
        let mut decoder = decoder(b"\x1b[A\x1b[");
        assert_eq!(
            decoder.poll(),
            InputEvent::Key {
                sequence: KeySequence::from("\x1b[A"),
                held: true
            }
        );
        assert_eq!(decoder.poll(), InputEvent::NoInput);
    }

    #[test]
    fn signalled_but_empty_input_is_a_release() {
        let mut decoder = InputSequenceDecoder::new(
            ScriptedSource {
                signal_only: true,
                ..Default::default()
            },
            Vec::new(),
            Duration::ZERO,
        );
        assert_eq!(decoder.poll(), InputEvent::Released);
    }

    #[test]
    fn sequences_are_capped() {
        let bytes = vec![b'x'; MAX_SEQ_LEN + 10];
        let mut decoder = decoder(&bytes);
        match decoder.poll() {
            InputEvent::Key { sequence, held } => {
                assert!(!held);
                assert_eq!(sequence.len(), MAX_SEQ_LEN - 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn display_escapes_control_bytes() {
        assert_eq!(KeySequence::from("\x1b[A").to_string(), "^[[A");
        assert_eq!(KeySequence::from(" ").to_string(), "Space");
    }
}
