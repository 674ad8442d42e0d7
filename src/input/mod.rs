pub mod decoder;
pub mod keymap;

pub use decoder::{ByteSource, InputEvent, InputSequenceDecoder, KeySequence, StdinSource, MAX_SEQ_LEN};
pub use keymap::{Command, InputAccumulator, KeyEventMapper, KeyRule};
