//! asb-core
//!
//! Reading, writing, assembling and disassembling ASB script containers.
//! [`Script::load`] and [`Script::save`] handle the binary container,
//! [`disassemble`] turns a script into assembly text and [`assemble`] turns
//! that text back into a script.

pub mod asm;
pub mod config;
pub mod container;
pub mod disasm;
pub mod error;
pub mod isa;
pub mod lexer;
pub mod nls;
pub mod stream;
pub mod talker;

pub use asm::{assemble, AsmOptions};
pub use config::ToolConfig;
pub use container::{Function, Script, StringEntry, NOT_FOUND};
pub use disasm::{disassemble, DisasmOptions};
pub use error::{AsbError, Result};
pub use isa::{Opcode, OperandKind};
pub use nls::Nls;
pub use talker::TalkerTable;
