//! Binary container: header, function table, code section and string table.
//!
//! ```text
//! 0x00  unk_00           always 0
//! 0x04  name[32]         NUL padded
//! 0x24  func_defs_start  = 0x44
//! 0x28  num_funcs
//! 0x2C  code_start       = func_defs_start + num_funcs * 0x14
//! 0x30  code_size
//! 0x34  strings_start    4-byte aligned, right after the code
//! 0x38  strings_size
//! 0x3C  file_size
//! 0x40  unk_40           always 0
//! ```
//!
//! Function records are `name, num_params, num_locals, code_start, size`,
//! where `name` is a string-table offset and `code_start` is relative to the
//! code section.

use serde::Serialize;

use crate::error::{AsbError, Result};
use crate::nls::Nls;
use crate::stream::{ByteReader, ByteWriter};

pub const HEADER_SIZE: u32 = 0x44;
pub const FUNCTION_RECORD_SIZE: u32 = 0x14;
pub const NAME_CAPACITY: usize = 32;
/// Longest script name, leaving room for the terminator.
pub const MAX_NAME_LEN: usize = NAME_CAPACITY - 1;
/// Returned by lookups that find no string.
pub const NOT_FOUND: u32 = 0xFFFF_FFFF;

const STRINGS_ALIGNMENT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringEntry {
    /// Byte offset inside the string section.
    pub pos: u32,
    pub bytes: Vec<u8>,
}

impl StringEntry {
    /// Offset of the string that would follow this one.
    pub fn next_pos(&self) -> u32 {
        self.pos + self.bytes.len() as u32 + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Function {
    /// String-table offset of the function's name.
    pub name: u32,
    /// Offset of the first instruction inside the code section.
    pub pos: u32,
    pub num_params: u32,
    pub num_locals: u32,
    pub code: Vec<u8>,
}

impl Function {
    pub fn end(&self) -> u32 {
        self.pos + self.code.len() as u32
    }
}

/// Decoded form of a script container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    /// Raw name bytes, in the script's text encoding.
    pub name: Vec<u8>,
    pub strings: Vec<StringEntry>,
    pub functions: Vec<Function>,
}

fn check_range(position: usize, start: u32, len: u32, buf_len: usize, what: &str) -> Result<()> {
    let end = start as u64 + len as u64;
    if end > buf_len as u64 {
        return Err(AsbError::decode(
            position,
            format!(
                "{} [0x{:X}, 0x{:X}) exceeds the {} byte buffer",
                what, start, end, buf_len
            ),
        ));
    }
    Ok(())
}

impl Script {
    pub fn new(name: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn reset(&mut self) {
        self.name.clear();
        self.strings.clear();
        self.functions.clear();
    }

    pub fn string_at(&self, pos: u32) -> Option<&StringEntry> {
        self.strings
            .binary_search_by_key(&pos, |s| s.pos)
            .ok()
            .map(|i| &self.strings[i])
    }

    /// Offset of the first string with exactly these bytes, or [`NOT_FOUND`].
    pub fn string_pos(&self, bytes: &[u8]) -> u32 {
        self.strings
            .iter()
            .find(|s| s.bytes == bytes)
            .map_or(NOT_FOUND, |s| s.pos)
    }

    pub fn function_name(&self, function: &Function) -> Option<&[u8]> {
        self.string_at(function.name).map(|s| s.bytes.as_slice())
    }

    /// Index of the first function whose name string has these bytes.
    pub fn function_index(&self, name: &[u8]) -> Option<usize> {
        self.functions
            .iter()
            .position(|f| self.function_name(f) == Some(name))
    }

    pub fn load(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let unk_00 = reader.read_u32()?;
        let name = reader.read_block(NAME_CAPACITY)?;
        let func_defs_start = reader.read_u32()?;
        let num_funcs = reader.read_u32()?;
        let code_start = reader.read_u32()?;
        let code_size = reader.read_u32()?;
        let strings_start = reader.read_u32()?;
        let strings_size = reader.read_u32()?;
        let file_size = reader.read_u32()?;
        let unk_40 = reader.read_u32()?;

        if unk_00 != 0 || unk_40 != 0 {
            log::warn!("unexpected header padding: unk_00=0x{unk_00:X}, unk_40=0x{unk_40:X}");
        }
        if file_size as usize != data.len() {
            log::warn!(
                "header file_size 0x{:X} does not match the 0x{:X} byte buffer",
                file_size,
                data.len()
            );
        }

        let table_len = num_funcs.checked_mul(FUNCTION_RECORD_SIZE).ok_or_else(|| {
            AsbError::decode(0x28, format!("function count {num_funcs} overflows"))
        })?;
        check_range(0x24, func_defs_start, table_len, data.len(), "function table")?;
        check_range(0x2C, code_start, code_size, data.len(), "code section")?;
        check_range(0x34, strings_start, strings_size, data.len(), "string section")?;

        let name_len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let name = name[..name_len].to_vec();

        let strings = Self::load_strings(
            &data[strings_start as usize..(strings_start + strings_size) as usize],
            strings_start as usize,
        )?;

        let code = &data[code_start as usize..(code_start + code_size) as usize];
        reader.seek(func_defs_start as usize)?;
        let mut functions = Vec::with_capacity(num_funcs as usize);
        for _ in 0..num_funcs {
            let record = reader.position();
            let function_name = reader.read_u32()?;
            let num_params = reader.read_u32()?;
            let num_locals = reader.read_u32()?;
            let pos = reader.read_u32()?;
            let size = reader.read_u32()?;

            check_range(record + 0x0C, pos, size, code.len(), "function code")?;
            if strings
                .binary_search_by_key(&function_name, |s| s.pos)
                .is_err()
            {
                return Err(AsbError::decode(
                    record,
                    format!("function name 0x{function_name:X} does not start a string"),
                ));
            }

            functions.push(Function {
                name: function_name,
                pos,
                num_params,
                num_locals,
                code: code[pos as usize..(pos + size) as usize].to_vec(),
            });
        }

        log::debug!(
            "loaded {} byte name, {} function(s), {} string(s), 0x{:X} code bytes",
            name.len(),
            functions.len(),
            strings.len(),
            code_size
        );

        Ok(Self {
            name,
            strings,
            functions,
        })
    }

    fn load_strings(section: &[u8], base: usize) -> Result<Vec<StringEntry>> {
        let mut reader = ByteReader::with_base(section, base);
        let mut strings = Vec::new();
        while !reader.at_end() {
            let pos = reader.position() as u32;
            let bytes = reader.read_cstr()?.to_vec();
            strings.push(StringEntry { pos, bytes });
        }
        Ok(strings)
    }

    pub fn save(&self) -> Result<Vec<u8>> {
        let name = self.name.as_slice();
        if name.len() > MAX_NAME_LEN {
            return Err(AsbError::encode(format!(
                "script name is {} bytes, at most {} fit",
                name.len(),
                MAX_NAME_LEN
            )));
        }
        if name.contains(&0) {
            return Err(AsbError::encode("script name contains a NUL byte"));
        }

        let code = self.layout_code()?;

        let mut strings = ByteWriter::new();
        for s in &self.strings {
            if s.pos as usize != strings.len() {
                return Err(AsbError::encode(format!(
                    "string at 0x{:X} should sit at 0x{:X}",
                    s.pos,
                    strings.len()
                )));
            }
            if s.bytes.contains(&0) {
                return Err(AsbError::encode(format!(
                    "string at 0x{:X} contains a NUL byte",
                    s.pos
                )));
            }
            strings.put_cstr(&s.bytes);
        }

        let num_funcs = self.functions.len() as u32;
        let func_defs_start = HEADER_SIZE;
        let code_start = func_defs_start + num_funcs * FUNCTION_RECORD_SIZE;
        let code_size = code.len() as u32;
        let code_end = (code_start + code_size) as usize;
        let strings_start = code_end.next_multiple_of(STRINGS_ALIGNMENT) as u32;
        let strings_size = strings.len() as u32;
        let file_size = strings_start + strings_size;

        let mut out = ByteWriter::new();
        out.put_u32(0);
        out.put_fixed(name, NAME_CAPACITY);
        out.put_u32(func_defs_start);
        out.put_u32(num_funcs);
        out.put_u32(code_start);
        out.put_u32(code_size);
        out.put_u32(strings_start);
        out.put_u32(strings_size);
        out.put_u32(file_size);
        out.put_u32(0);

        for f in &self.functions {
            out.put_u32(f.name);
            out.put_u32(f.num_params);
            out.put_u32(f.num_locals);
            out.put_u32(f.pos);
            out.put_u32(f.code.len() as u32);
        }

        out.put_block(&code);
        out.align(STRINGS_ALIGNMENT);
        out.put_block(strings.as_slice());

        Ok(out.into_inner())
    }

    /// Place every function at its `pos`, zero-filling gaps.
    fn layout_code(&self) -> Result<Vec<u8>> {
        let mut order: Vec<&Function> = self.functions.iter().collect();
        order.sort_by_key(|f| f.pos);

        let mut code = Vec::new();
        for f in order {
            let pos = f.pos as usize;
            if pos < code.len() {
                return Err(AsbError::encode(format!(
                    "function at 0x{:X} overlaps code ending at 0x{:X}",
                    f.pos,
                    code.len()
                )));
            }
            code.resize(pos, 0);
            code.extend_from_slice(&f.code);
        }
        Ok(code)
    }

    pub fn summary(&self, nls: Nls) -> ContainerSummary {
        let functions = self
            .functions
            .iter()
            .map(|f| FunctionSummary {
                name: self
                    .function_name(f)
                    .map(|b| nls.decode(b).into_owned())
                    .unwrap_or_default(),
                pos: f.pos,
                size: f.code.len() as u32,
                num_params: f.num_params,
                num_locals: f.num_locals,
            })
            .collect();

        ContainerSummary {
            name: nls.decode(&self.name).into_owned(),
            nls,
            code_size: self.functions.iter().map(Function::end).max().unwrap_or(0),
            num_strings: self.strings.len(),
            strings_size: self.strings.last().map_or(0, StringEntry::next_pos),
            functions,
        }
    }
}

/// Human-readable layout report, exported next to a disassembly.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    pub name: String,
    pub nls: Nls,
    pub code_size: u32,
    pub num_strings: usize,
    pub strings_size: u32,
    pub functions: Vec<FunctionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSummary {
    pub name: String,
    pub pos: u32,
    pub size: u32,
    pub num_params: u32,
    pub num_locals: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Script {
        Script {
            name: "demo".into(),
            strings: vec![
                StringEntry { pos: 0, bytes: b"main".to_vec() },
                StringEntry { pos: 5, bytes: b"hello\nworld".to_vec() },
            ],
            functions: vec![Function {
                name: 0,
                pos: 0,
                num_params: 1,
                num_locals: 2,
                code: vec![0x26, 0x00, 0x26],
            }],
        }
    }

    #[test]
    fn header_layout() {
        let data = sample().save().unwrap();
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u32().unwrap(), 0);
        assert_eq!(&r.read_block(NAME_CAPACITY).unwrap()[..5], b"demo\0");
        assert_eq!(r.read_u32().unwrap(), 0x44);
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.read_u32().unwrap(), 0x58);
        assert_eq!(r.read_u32().unwrap(), 3);
        // 0x58 + 3 rounded up to 4
        assert_eq!(r.read_u32().unwrap(), 0x5C);
        assert_eq!(r.read_u32().unwrap(), 17);
        assert_eq!(r.read_u32().unwrap(), data.len() as u32);
        assert_eq!(r.read_u32().unwrap(), 0);
        assert_eq!(&data[0x5B..0x5C], &[0]);
        assert_eq!(&data[0x5C..0x61], b"main\0");
    }

    #[test]
    fn save_then_load() {
        let script = sample();
        let data = script.save().unwrap();
        let loaded = Script::load(&data).unwrap();
        assert_eq!(loaded, script);
        assert_eq!(loaded.save().unwrap(), data);
    }

    #[test]
    fn lookups() {
        let script = sample();
        assert_eq!(script.string_pos(b"hello\nworld"), 5);
        assert_eq!(script.string_pos(b"missing"), NOT_FOUND);
        assert!(script.string_at(3).is_none());
        assert_eq!(script.function_index(b"main"), Some(0));
    }

    #[test]
    fn truncated_function_table() {
        let mut data = sample().save().unwrap();
        data.truncate(HEADER_SIZE as usize + 8);
        let err = Script::load(&data).unwrap_err();
        assert!(matches!(err, AsbError::Decode { position: 0x24, .. }), "{err}");
    }

    #[test]
    fn truncated_header() {
        let err = Script::load(&[0u8; 0x30]).unwrap_err();
        assert!(matches!(err, AsbError::Decode { .. }));
    }

    #[test]
    fn function_outside_code_section() {
        let mut data = sample().save().unwrap();
        // record.size
        data[0x44 + 0x10] = 0x40;
        let err = Script::load(&data).unwrap_err();
        assert_eq!(err.position(), Some(0x44 + 0x0C));
    }

    #[test]
    fn function_name_must_start_a_string() {
        let mut script = sample();
        script.functions[0].name = 2;
        let data = script.save().unwrap();
        assert_eq!(Script::load(&data).unwrap_err().position(), Some(0x44));
    }

    #[test]
    fn gaps_and_overlaps() {
        let mut script = sample();
        script.functions.push(Function { name: 5, pos: 8, code: vec![0x26], ..Default::default() });
        let loaded = Script::load(&script.save().unwrap()).unwrap();
        assert_eq!(loaded.functions[1].pos, 8);

        script.functions[1].pos = 2;
        assert!(matches!(script.save(), Err(AsbError::Encode { .. })));
    }

    #[test]
    fn misplaced_string() {
        let mut script = sample();
        script.strings[1].pos = 6;
        assert!(matches!(script.save(), Err(AsbError::Encode { .. })));
    }

    #[test]
    fn name_bytes_are_kept_verbatim() {
        for name in [b"".as_slice(), &[0x83, 0x41], &[0xff; MAX_NAME_LEN]] {
            let mut script = sample();
            script.name = name.to_vec();
            let loaded = Script::load(&script.save().unwrap()).unwrap();
            assert_eq!(loaded.name, name);
        }

        let mut script = sample();
        script.name = vec![b'x'; NAME_CAPACITY];
        assert!(matches!(script.save(), Err(AsbError::Encode { .. })));
        script.name = b"a\0b".to_vec();
        assert!(matches!(script.save(), Err(AsbError::Encode { .. })));
    }

    #[test]
    fn summary_decodes_the_name() {
        let mut script = sample();
        script.name = vec![0x83, 0x41];
        assert_eq!(script.summary(Nls::ShiftJIS).name, "\u{30a2}");
    }

    #[test]
    fn reset_clears_everything() {
        let mut script = sample();
        script.reset();
        assert_eq!(script, Script::default());
    }
}
