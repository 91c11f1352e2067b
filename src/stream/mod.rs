//! Streaming response assembly
//!
//! Generation responses arrive as newline-delimited JSON fragments. The
//! assembler forwards each fragment's text to an output sink as soon as it is
//! decoded and rebuilds the full answer, finishing on the terminal fragment.

mod assembler;
mod fragment;

pub use assembler::{assemble, AssembledAnswer, AssemblerState, AssemblyError, StreamAssembler};
pub use fragment::{decode_line, ResponseFragment, StreamLine, TerminalMetadata};
