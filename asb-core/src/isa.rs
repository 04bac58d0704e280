//! The ASB instruction set.
//!
//! [`INSTRUCTION_SET`] is indexed by opcode byte and is the only place that
//! knows which operands an instruction carries; the assembler and the
//! disassembler both go through it.

use std::fmt;

use crate::error::{AsbError, Result};
use crate::stream::ByteReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// u8 slot index into the function's locals.
    Local,
    U8,
    S32,
    /// A 32-bit constant that may be a string-table offset.
    S32OrStr,
    /// u8 count followed by that many u32 entries.
    Array,
    /// u32 index into the function table.
    Func,
    /// u32 engine-provided function id.
    NFunc,
    /// u32 absolute code address.
    Label,
}

impl OperandKind {
    /// Encoded width, `None` for the variable-length array.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            OperandKind::Local | OperandKind::U8 => Some(1),
            OperandKind::S32
            | OperandKind::S32OrStr
            | OperandKind::Func
            | OperandKind::NFunc
            | OperandKind::Label => Some(4),
            OperandKind::Array => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    PushL = 0x01,
    PopL = 0x02,
    PushC = 0x03,
    PushB = 0x04,
    PushI = 0x05,
    PushG = 0x06,
    PopG = 0x07,
    Pop = 0x08,
    Dup = 0x09,
    Add = 0x0A,
    Sub = 0x0B,
    Mul = 0x0C,
    Div = 0x0D,
    Mod = 0x0E,
    Neg = 0x0F,
    And = 0x10,
    Or = 0x11,
    Xor = 0x12,
    Not = 0x13,
    Shl = 0x14,
    Shr = 0x15,
    LAnd = 0x16,
    LOr = 0x17,
    LNot = 0x18,
    Eq = 0x19,
    Ne = 0x1A,
    Lt = 0x1B,
    Le = 0x1C,
    Gt = 0x1D,
    Ge = 0x1E,
    Inc = 0x1F,
    Dec = 0x20,
    Jmp = 0x21,
    Jz = 0x22,
    Jnz = 0x23,
    /// Jump table. Seen only in front of a computed index, the entries were
    /// never observed to point outside the owning function.
    JmpA = 0x24,
    Call = 0x25,
    Ret = 0x26,
    /// Maybe a return-with-value; the engine pops one extra slot.
    RetV = 0x27,
    PushR = 0x28,
    CallN = 0x29,
    /// Maybe a frame wait, always followed by a native call in the shipped scripts.
    Wait = 0x2A,
    Swap = 0x2B,
    End = 0x2C,
}

#[derive(Debug)]
pub struct OpcodeInfo {
    pub opcode: Opcode,
    pub mnemonic: &'static str,
    pub operands: &'static [OperandKind],
}

pub const OPCODE_COUNT: usize = 0x2D;

/// `calln @native00,1`: the engine's "print the string on the stack".
pub const PRINT_SIGNATURE: [u8; 6] = [0x29, 0x00, 0x00, 0x00, 0x00, 0x01];

/// Sentinel written where a forward reference will be patched.
pub const UNRESOLVED: u32 = 0xDEAD_C0DE;

const fn op(
    opcode: Opcode,
    mnemonic: &'static str,
    operands: &'static [OperandKind],
) -> OpcodeInfo {
    OpcodeInfo {
        opcode,
        mnemonic,
        operands,
    }
}

use OperandKind as K;

pub static INSTRUCTION_SET: [OpcodeInfo; OPCODE_COUNT] = [
    op(Opcode::Nop, "nop", &[]),
    op(Opcode::PushL, "pushl", &[K::Local]),
    op(Opcode::PopL, "popl", &[K::Local]),
    op(Opcode::PushC, "pushc", &[K::S32OrStr]),
    op(Opcode::PushB, "pushb", &[K::U8]),
    op(Opcode::PushI, "pushi", &[K::S32]),
    op(Opcode::PushG, "pushg", &[K::S32]),
    op(Opcode::PopG, "popg", &[K::S32]),
    op(Opcode::Pop, "pop", &[]),
    op(Opcode::Dup, "dup", &[]),
    op(Opcode::Add, "add", &[]),
    op(Opcode::Sub, "sub", &[]),
    op(Opcode::Mul, "mul", &[]),
    op(Opcode::Div, "div", &[]),
    op(Opcode::Mod, "mod", &[]),
    op(Opcode::Neg, "neg", &[]),
    op(Opcode::And, "and", &[]),
    op(Opcode::Or, "or", &[]),
    op(Opcode::Xor, "xor", &[]),
    op(Opcode::Not, "not", &[]),
    op(Opcode::Shl, "shl", &[]),
    op(Opcode::Shr, "shr", &[]),
    op(Opcode::LAnd, "land", &[]),
    op(Opcode::LOr, "lor", &[]),
    op(Opcode::LNot, "lnot", &[]),
    op(Opcode::Eq, "eq", &[]),
    op(Opcode::Ne, "ne", &[]),
    op(Opcode::Lt, "lt", &[]),
    op(Opcode::Le, "le", &[]),
    op(Opcode::Gt, "gt", &[]),
    op(Opcode::Ge, "ge", &[]),
    op(Opcode::Inc, "inc", &[K::Local]),
    op(Opcode::Dec, "dec", &[K::Local]),
    op(Opcode::Jmp, "jmp", &[K::Label]),
    op(Opcode::Jz, "jz", &[K::Label]),
    op(Opcode::Jnz, "jnz", &[K::Label]),
    op(Opcode::JmpA, "jmpa", &[K::Array]),
    op(Opcode::Call, "call", &[K::Func]),
    op(Opcode::Ret, "ret", &[]),
    op(Opcode::RetV, "retv", &[]),
    op(Opcode::PushR, "pushr", &[]),
    op(Opcode::CallN, "calln", &[K::NFunc, K::U8]),
    op(Opcode::Wait, "wait", &[]),
    op(Opcode::Swap, "swap", &[]),
    op(Opcode::End, "end", &[]),
];

impl Opcode {
    pub fn info(self) -> &'static OpcodeInfo {
        &INSTRUCTION_SET[self as usize]
    }

    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    pub fn operands(self) -> &'static [OperandKind] {
        self.info().operands
    }

    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        INSTRUCTION_SET
            .iter()
            .find(|info| info.mnemonic == mnemonic)
            .map(|info| info.opcode)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        INSTRUCTION_SET
            .get(value as usize)
            .map(|info| info.opcode)
            .ok_or(value)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Local(u8),
    U8(u8),
    S32(u32),
    S32OrStr(u32),
    Array(Vec<u32>),
    Func(u32),
    NFunc(u32),
    Label(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Absolute code address of the opcode byte.
    pub addr: u32,
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

fn read_operand(reader: &mut ByteReader<'_>, kind: OperandKind) -> Result<Operand> {
    let operand = match kind {
        OperandKind::Local => Operand::Local(reader.read_u8()?),
        OperandKind::U8 => Operand::U8(reader.read_u8()?),
        OperandKind::S32 => Operand::S32(reader.read_u32()?),
        OperandKind::S32OrStr => Operand::S32OrStr(reader.read_u32()?),
        OperandKind::Array => {
            let count = reader.read_u8()?;
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                entries.push(reader.read_u32()?);
            }
            Operand::Array(entries)
        }
        OperandKind::Func => Operand::Func(reader.read_u32()?),
        OperandKind::NFunc => Operand::NFunc(reader.read_u32()?),
        OperandKind::Label => Operand::Label(reader.read_u32()?),
    };
    Ok(operand)
}

/// Decode the instruction under the reader's cursor.
pub fn read_instruction(reader: &mut ByteReader<'_>) -> Result<Instruction> {
    let addr = reader.absolute_position();
    let byte = reader.read_u8()?;
    let opcode = Opcode::try_from(byte)
        .map_err(|b| AsbError::decode(addr, format!("unknown opcode 0x{:02X}", b)))?;

    let mut operands = Vec::with_capacity(opcode.operands().len());
    for &kind in opcode.operands() {
        operands.push(read_operand(reader, kind)?);
    }

    Ok(Instruction {
        addr: addr as u32,
        opcode,
        operands,
    })
}
