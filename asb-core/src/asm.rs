//! Assembly text to a [`Script`].
//!
//! The source is read top to bottom exactly once. References that cannot be
//! resolved yet (a `jmp` to a later label, a `call` to a later function) are
//! written as [`UNRESOLVED`] and recorded as [`Relocation`]s: label
//! relocations are patched at `endfunction`, call relocations once every
//! function is known.

use std::collections::HashMap;

use crate::container::{Function, Script, StringEntry, MAX_NAME_LEN};
use crate::error::{AsbError, Result};
use crate::isa::{Opcode, OperandKind, UNRESOLVED};
use crate::lexer::{parse_number, parse_quoted, split_assignment, tokenize, SourceLine};
use crate::nls::Nls;
use crate::stream::{patch_u32, ByteWriter};

/// Distinct locals a single function may reference.
pub const MAX_LOCALS: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct AsmOptions {
    pub nls: Nls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RelocTarget {
    Label(String),
    Function(String),
}

/// A 4-byte operand waiting for its value.
#[derive(Debug, Clone)]
struct Relocation {
    /// Index of the owning function in the function table.
    function: usize,
    /// Offset of the operand inside that function's code.
    offset: usize,
    target: RelocTarget,
    /// Line of the referencing instruction, for error reporting.
    line: usize,
}

/// Cursor over the tokenized source.
struct Lines<'a> {
    lines: Vec<SourceLine<'a>>,
    next: usize,
}

impl<'a> Lines<'a> {
    fn next(&mut self) -> Option<SourceLine<'a>> {
        let line = self.lines.get(self.next).copied();
        self.next += 1;
        line
    }

    fn peek(&self) -> Option<SourceLine<'a>> {
        self.lines.get(self.next).copied()
    }

    /// Line to blame when the input ends too early.
    fn last_number(&self) -> usize {
        self.lines.last().map_or(0, |l| l.number)
    }

    fn expect(&mut self, what: &str) -> Result<SourceLine<'a>> {
        self.next().ok_or_else(|| {
            AsbError::syntax(
                self.last_number(),
                format!("unexpected end of input, expected {what}"),
            )
        })
    }
}

/// Everything assembly accumulates across functions.
pub struct AssemblerContext<'o> {
    options: &'o AsmOptions,
    script: Script,
    strings_by_name: HashMap<String, usize>,
    functions_by_name: HashMap<String, usize>,
    unresolved_calls: Vec<Relocation>,
    /// Code-section address of the next byte to be emitted.
    code_cursor: u32,
}

/// Per-function tables, dropped at `endfunction`.
struct FunctionBuilder {
    index: usize,
    name: String,
    name_pos: u32,
    num_params: u32,
    pos: u32,
    code: ByteWriter,
    instruction_count: usize,
    locals: HashMap<String, u8>,
    labels: HashMap<String, u32>,
    unresolved_labels: Vec<Relocation>,
}

impl FunctionBuilder {
    fn cursor(&self) -> u32 {
        self.pos + self.code.len() as u32
    }

    fn local(&mut self, name: &str, line: usize) -> Result<u8> {
        if let Some(&index) = self.locals.get(name) {
            return Ok(index);
        }
        if self.locals.len() >= MAX_LOCALS {
            return Err(AsbError::semantic(
                line,
                format!(
                    "`{}` would be local #{} of `{}`, the limit is {}",
                    name,
                    self.locals.len() + 1,
                    self.name,
                    MAX_LOCALS
                ),
            ));
        }
        let index = self.locals.len() as u8;
        self.locals.insert(name.to_string(), index);
        Ok(index)
    }
}

fn expect_number(token: &str, line: usize) -> Result<i64> {
    parse_number(token)
        .ok_or_else(|| AsbError::syntax(line, format!("expected a number, found `{token}`")))
}

fn check_range(value: i64, min: i64, max: i64, token: &str, line: usize) -> Result<i64> {
    if value < min || value > max {
        return Err(AsbError::semantic(
            line,
            format!("`{token}` does not fit in the operand ({min}..={max})"),
        ));
    }
    Ok(value)
}

/// Any 32-bit pattern, written either signed or unsigned.
fn number_u32(token: &str, line: usize) -> Result<u32> {
    let value = check_range(
        expect_number(token, line)?,
        i32::MIN as i64,
        u32::MAX as i64,
        token,
        line,
    )?;
    Ok(value as u32)
}

fn number_u8(token: &str, line: usize) -> Result<u8> {
    let value = check_range(
        expect_number(token, line)?,
        i8::MIN as i64,
        u8::MAX as i64,
        token,
        line,
    )?;
    Ok(value as u8)
}

fn native_id(token: &str, line: usize) -> Result<u32> {
    let digits = token.strip_prefix("@native").unwrap_or_default();
    let value = if digits.is_empty() {
        None
    } else {
        parse_number(&format!("0x{digits}"))
    };
    let value = value.ok_or_else(|| {
        AsbError::syntax(line, format!("expected `@nativeXX`, found `{token}`"))
    })?;
    Ok(check_range(value, 0, u32::MAX as i64, token, line)? as u32)
}

/// Split an instruction line into mnemonic and comma-separated operands.
fn split_instruction(text: &str, line: usize) -> Result<(&str, Vec<&str>)> {
    let (mnemonic, rest) = match text.split_once([' ', '\t']) {
        Some((mnemonic, rest)) => (mnemonic, rest.trim()),
        None => (text, ""),
    };
    if rest.is_empty() {
        return Ok((mnemonic, Vec::new()));
    }
    let operands: Vec<&str> = rest.split(',').map(str::trim).collect();
    if operands.iter().any(|o| o.is_empty()) {
        return Err(AsbError::syntax(line, format!("empty operand in `{text}`")));
    }
    Ok((mnemonic, operands))
}

/// `label_name:` with nothing else on the line.
fn label_definition(text: &str) -> Option<&str> {
    let name = text.strip_suffix(':')?;
    let valid = !name.is_empty() && !name.contains(|c: char| c.is_whitespace() || c == ',' || c == ':');
    valid.then_some(name)
}

impl<'o> AssemblerContext<'o> {
    pub fn new(options: &'o AsmOptions) -> Self {
        Self {
            options,
            script: Script::default(),
            strings_by_name: HashMap::new(),
            functions_by_name: HashMap::new(),
            unresolved_calls: Vec::new(),
            code_cursor: 0,
        }
    }

    /// `script name` or `script "quoted name"`.
    fn header(&mut self, lines: &mut Lines<'_>) -> Result<()> {
        let line = lines.expect("`script <name>`")?;
        let name = line
            .text
            .strip_prefix("script")
            .filter(|rest| rest.starts_with([' ', '\t']))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                AsbError::syntax(
                    line.number,
                    format!("expected `script <name>`, found `{}`", line.text),
                )
            })?;

        let nls = self.options.nls;
        let bytes = if name.starts_with('"') {
            parse_quoted(name, line.number)?.encode(nls)
        } else {
            nls.encode(name)
        };
        let bytes = bytes.ok_or_else(|| {
            AsbError::semantic(
                line.number,
                format!("script name `{name}` cannot be represented in {nls}"),
            )
        })?;
        if bytes.contains(&0) {
            return Err(AsbError::semantic(line.number, "script name contains a NUL"));
        }
        if bytes.len() > MAX_NAME_LEN {
            return Err(AsbError::semantic(
                line.number,
                format!("script name `{name}` is longer than {MAX_NAME_LEN} bytes"),
            ));
        }
        self.script.name = bytes;
        Ok(())
    }

    fn strings(&mut self, lines: &mut Lines<'_>) -> Result<()> {
        let line = lines.expect("`strings`")?;
        if line.text != "strings" {
            return Err(AsbError::syntax(
                line.number,
                format!("expected `strings`, found `{}`", line.text),
            ));
        }

        let mut pos: u32 = 0;
        loop {
            let line = lines.expect("`endstrings`")?;
            if line.text == "endstrings" {
                if self.script.strings.is_empty() {
                    return Err(AsbError::semantic(line.number, "at least one string is required"));
                }
                return Ok(());
            }

            let (name, value) = split_assignment(line.text).ok_or_else(|| {
                AsbError::syntax(
                    line.number,
                    format!("expected `name = \"value\"`, found `{}`", line.text),
                )
            })?;
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(AsbError::syntax(line.number, format!("invalid string name `{name}`")));
            }
            if self.strings_by_name.contains_key(name) {
                return Err(AsbError::semantic(line.number, format!("string `{name}` is already defined")));
            }

            let bytes = parse_quoted(value, line.number)?
                .encode(self.options.nls)
                .ok_or_else(|| {
                AsbError::semantic(
                    line.number,
                    format!("string `{}` cannot be represented in {}", name, self.options.nls),
                )
            })?;
            if bytes.contains(&0) {
                return Err(AsbError::semantic(line.number, format!("string `{name}` contains a NUL")));
            }

            let entry = StringEntry { pos, bytes };
            pos = entry
                .pos
                .checked_add(entry.bytes.len() as u32 + 1)
                .ok_or_else(|| AsbError::semantic(line.number, "string section overflows"))?;
            self.strings_by_name
                .insert(name.to_string(), self.script.strings.len());
            self.script.strings.push(entry);
        }
    }

    fn function_header(&self, line: SourceLine<'_>) -> Result<FunctionBuilder> {
        let malformed = || {
            AsbError::syntax(
                line.number,
                format!("expected `function <name>,<num_params>`, found `{}`", line.text),
            )
        };
        let rest = line
            .text
            .strip_prefix("function")
            .filter(|rest| rest.starts_with([' ', '\t']))
            .ok_or_else(malformed)?;
        let (name, num_params) = rest.split_once(',').ok_or_else(malformed)?;
        let (name, num_params) = (name.trim(), num_params.trim());
        if name.is_empty() {
            return Err(malformed());
        }
        let num_params = check_range(
            expect_number(num_params, line.number)?,
            0,
            u32::MAX as i64,
            num_params,
            line.number,
        )? as u32;

        let string = self.strings_by_name.get(name).ok_or_else(|| {
            AsbError::semantic(line.number, format!("function `{name}` has no string of the same name"))
        })?;
        if self.functions_by_name.contains_key(name) {
            return Err(AsbError::semantic(line.number, format!("function `{name}` is already defined")));
        }

        Ok(FunctionBuilder {
            index: self.script.functions.len(),
            name: name.to_string(),
            name_pos: self.script.strings[*string].pos,
            num_params,
            pos: self.code_cursor,
            code: ByteWriter::new(),
            instruction_count: 0,
            locals: HashMap::new(),
            labels: HashMap::new(),
            unresolved_labels: Vec::new(),
        })
    }

    fn operand(
        &mut self,
        f: &mut FunctionBuilder,
        kind: OperandKind,
        token: &str,
        line: usize,
    ) -> Result<()> {
        match kind {
            OperandKind::Local => {
                let index = f.local(token, line)?;
                f.code.put_u8(index);
            }
            OperandKind::U8 => f.code.put_u8(number_u8(token, line)?),
            OperandKind::S32 => f.code.put_u32(number_u32(token, line)?),
            OperandKind::S32OrStr => {
                let value = if parse_number(token).is_some() {
                    number_u32(token, line)?
                } else {
                    let index = self.strings_by_name.get(token).ok_or_else(|| {
                        AsbError::semantic(line, format!("undefined string `{token}`"))
                    })?;
                    self.script.strings[*index].pos
                };
                f.code.put_u32(value);
            }
            OperandKind::Array => {
                // one table entry; `instruction` writes the count
                f.code.put_u32(number_u32(token, line)?);
            }
            OperandKind::Func => {
                // every call is linked at the end, earlier functions included
                self.unresolved_calls.push(Relocation {
                    function: f.index,
                    offset: f.code.len(),
                    target: RelocTarget::Function(token.to_string()),
                    line,
                });
                f.code.put_u32(UNRESOLVED);
            }
            OperandKind::NFunc => f.code.put_u32(native_id(token, line)?),
            OperandKind::Label => {
                if parse_number(token).is_some() {
                    f.code.put_u32(number_u32(token, line)?);
                } else if let Some(&addr) = f.labels.get(token) {
                    f.code.put_u32(addr);
                } else {
                    f.unresolved_labels.push(Relocation {
                        function: f.index,
                        offset: f.code.len(),
                        target: RelocTarget::Label(token.to_string()),
                        line,
                    });
                    f.code.put_u32(UNRESOLVED);
                }
            }
        }
        Ok(())
    }

    fn instruction(&mut self, f: &mut FunctionBuilder, line: SourceLine<'_>) -> Result<()> {
        let (mnemonic, operands) = split_instruction(line.text, line.number)?;
        let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| {
            AsbError::syntax(line.number, format!("unknown instruction `{mnemonic}`"))
        })?;

        f.code.put_u8(opcode as u8);
        if opcode == Opcode::JmpA {
            let count = u8::try_from(operands.len()).map_err(|_| {
                AsbError::semantic(
                    line.number,
                    format!("jump table has {} entries, at most 255 fit", operands.len()),
                )
            })?;
            f.code.put_u8(count);
            for token in operands {
                self.operand(f, OperandKind::Array, token, line.number)?;
            }
        } else {
            let kinds = opcode.operands();
            if kinds.len() != operands.len() {
                return Err(AsbError::syntax(
                    line.number,
                    format!(
                        "`{}` takes {} operand(s), found {}",
                        mnemonic,
                        kinds.len(),
                        operands.len()
                    ),
                ));
            }
            for (&kind, token) in kinds.iter().zip(operands) {
                self.operand(f, kind, token, line.number)?;
            }
        }

        f.instruction_count += 1;
        Ok(())
    }

    fn function(&mut self, lines: &mut Lines<'_>, header: SourceLine<'_>) -> Result<()> {
        let mut f = self.function_header(header)?;

        let end = loop {
            let line = lines.expect("`endfunction`")?;
            if line.text == "endfunction" {
                break line;
            }
            if let Some(label) = label_definition(line.text) {
                if f.labels.contains_key(label) {
                    return Err(AsbError::semantic(
                        line.number,
                        format!("label `{}` is already defined in `{}`", label, f.name),
                    ));
                }
                let cursor = f.cursor();
                f.labels.insert(label.to_string(), cursor);
                continue;
            }
            self.instruction(&mut f, line)?;
        };

        if f.instruction_count == 0 {
            return Err(AsbError::semantic(
                end.number,
                format!("function `{}` has no instructions", f.name),
            ));
        }

        for reloc in &f.unresolved_labels {
            let RelocTarget::Label(label) = &reloc.target else {
                continue;
            };
            let addr = f.labels.get(label).ok_or_else(|| {
                AsbError::semantic(reloc.line, format!("undefined label `{}` in `{}`", label, f.name))
            })?;
            log::trace!("patching label `{}` = 0x{:X} at +0x{:X}", label, addr, reloc.offset);
            f.code.patch_u32(reloc.offset, *addr)?;
        }
        let code = f.code.into_inner();

        let size = code.len() as u32;
        self.code_cursor = self.code_cursor.checked_add(size).ok_or_else(|| {
            AsbError::semantic(end.number, "code section overflows")
        })?;

        log::debug!(
            "assembled `{}` at 0x{:X}: {} instruction(s), {} local(s), {} byte(s)",
            f.name,
            f.pos,
            f.instruction_count,
            f.locals.len(),
            size
        );

        self.functions_by_name.insert(f.name, f.index);
        self.script.functions.push(Function {
            name: f.name_pos,
            pos: f.pos,
            num_params: f.num_params,
            num_locals: f.locals.len() as u32,
            code,
        });
        Ok(())
    }

    fn functions(&mut self, lines: &mut Lines<'_>) -> Result<()> {
        while let Some(line) = lines.next() {
            if !line.text.starts_with("function") {
                return Err(AsbError::syntax(
                    line.number,
                    format!("expected `function`, found `{}`", line.text),
                ));
            }
            self.function(lines, line)?;
        }

        if self.script.functions.is_empty() {
            return Err(AsbError::semantic(lines.last_number(), "script defines no functions"));
        }
        Ok(())
    }

    /// Patch every call now that the function table is complete.
    fn link(&mut self) -> Result<()> {
        for reloc in std::mem::take(&mut self.unresolved_calls) {
            let RelocTarget::Function(name) = &reloc.target else {
                continue;
            };
            let index = self.functions_by_name.get(name).ok_or_else(|| {
                AsbError::semantic(reloc.line, format!("call to undefined function `{name}`"))
            })?;
            log::trace!("patching call `{}` = #{} at +0x{:X}", name, index, reloc.offset);
            let function = &mut self.script.functions[reloc.function];
            patch_u32(&mut function.code, reloc.offset, *index as u32)?;
        }
        Ok(())
    }

    pub fn run(mut self, source: &str) -> Result<Script> {
        let mut lines = Lines {
            lines: tokenize(source),
            next: 0,
        };
        self.header(&mut lines)?;
        self.strings(&mut lines)?;
        self.functions(&mut lines)?;
        debug_assert!(lines.peek().is_none());
        self.link()?;
        Ok(self.script)
    }
}

pub fn assemble(source: &str, options: &AsmOptions) -> Result<Script> {
    AssemblerContext::new(options).run(source)
}
