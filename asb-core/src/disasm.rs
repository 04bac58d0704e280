//! Bytecode to assembly text.
//!
//! Every function is scanned twice: once to collect jump targets, once to
//! print. Decoding happens before any text is produced, so a malformed
//! function fails the whole disassembly.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;

use crate::container::{Function, Script};
use crate::error::{AsbError, Result};
use crate::isa::{read_instruction, Instruction, Operand, PRINT_SIGNATURE};
use crate::lexer::{escape_bytes, is_number};
use crate::nls::Nls;
use crate::stream::{peek_bytes, ByteReader};
use crate::talker::{infer_talkers, TalkerTable};

#[derive(Debug, Clone, Default)]
pub struct DisasmOptions {
    pub nls: Nls,
    pub talkers: TalkerTable,
}

/// `prefix_XXXX` below 0x10000, full width above.
fn synthetic_name(prefix: &str, addr: u32) -> String {
    if addr < 0x1_0000 {
        format!("{prefix}_{addr:04x}")
    } else {
        format!("{prefix}_{addr:08x}")
    }
}

pub fn label_name(addr: u32) -> String {
    synthetic_name("label", addr)
}

pub fn string_symbol(pos: u32) -> String {
    synthetic_name("str", pos)
}

/// Whether decoded function-name text can stand as its own string symbol.
fn usable_as_symbol(text: &str) -> bool {
    !text.is_empty()
        && !is_number(text)
        && !["str_", "label_", "local_", "@"]
            .iter()
            .any(|prefix| text.starts_with(prefix))
        && !text
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || ",;=:\"'\\".contains(c))
}

/// Bare when the name is a plain token that encodes back exactly, quoted
/// otherwise.
fn script_name(name: &[u8], nls: Nls) -> String {
    let bare = nls.decode_strict(name).filter(|text| {
        !text.is_empty()
            && nls.reproduces(text, name)
            && !text.starts_with('"')
            && !text
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || c == ';')
    });
    match bare {
        Some(text) => text.into_owned(),
        None => format!("\"{}\"", escape_bytes(nls, name)),
    }
}

/// Per-script naming decided before any function is printed.
struct Symbols {
    /// String offset -> symbol used in the `strings` block and as operand.
    strings: HashMap<u32, String>,
    /// Text of every function name, used to keep function names out of
    /// `str_XXXX` operands.
    function_names: HashSet<Vec<u8>>,
}

impl Symbols {
    fn build(script: &Script, nls: Nls) -> Self {
        let mut strings = HashMap::new();
        let mut taken = HashSet::new();
        let mut function_names = HashSet::new();

        for f in &script.functions {
            let Some(entry) = script.string_at(f.name) else {
                continue;
            };
            function_names.insert(entry.bytes.clone());
            if strings.contains_key(&entry.pos) {
                continue;
            }
            let Some(text) = nls.decode_strict(&entry.bytes) else {
                continue;
            };
            if usable_as_symbol(&text)
                && nls.reproduces(&text, &entry.bytes)
                && taken.insert(text.to_string())
            {
                strings.insert(entry.pos, text.into_owned());
            }
        }

        for s in &script.strings {
            strings
                .entry(s.pos)
                .or_insert_with(|| string_symbol(s.pos));
        }

        Self {
            strings,
            function_names,
        }
    }

    fn function(&self, f: &Function) -> Result<&str> {
        self.strings.get(&f.name).map(String::as_str).ok_or_else(|| {
            AsbError::decode(
                f.pos as usize,
                format!("function name 0x{:X} does not reference a string", f.name),
            )
        })
    }

    /// A `pushc` constant names a string only when it hits a string that is
    /// not a function name and the constant is printed right away.
    fn string_operand(&self, script: &Script, value: u32, code: &[u8], next: usize) -> Option<&str> {
        let entry = script.string_at(value)?;
        if self.function_names.contains(&entry.bytes) {
            return None;
        }
        if peek_bytes(code, next, PRINT_SIGNATURE.len()) != Some(PRINT_SIGNATURE.as_slice()) {
            return None;
        }
        self.strings.get(&value).map(String::as_str)
    }
}

struct DecodedFunction {
    /// Instruction plus the function-relative offset of the next one.
    instructions: Vec<(Instruction, usize)>,
    labels: BTreeMap<u32, String>,
}

fn decode_function(f: &Function) -> Result<DecodedFunction> {
    // Pass 1: jump targets and instruction boundaries.
    let mut targets = BTreeSet::new();
    let mut starts = HashSet::new();
    let mut reader = ByteReader::with_base(&f.code, f.pos as usize);
    while !reader.at_end() {
        let inst = read_instruction(&mut reader)?;
        starts.insert(inst.addr);
        for operand in &inst.operands {
            if let Operand::Label(addr) = operand {
                targets.insert(*addr);
            }
        }
    }
    let labels = targets
        .into_iter()
        .filter(|addr| starts.contains(addr))
        .map(|addr| (addr, label_name(addr)))
        .collect();

    // Pass 2: full decode for printing.
    let mut instructions = Vec::new();
    let mut reader = ByteReader::with_base(&f.code, f.pos as usize);
    while !reader.at_end() {
        let inst = read_instruction(&mut reader)?;
        instructions.push((inst, reader.position()));
    }

    Ok(DecodedFunction {
        instructions,
        labels,
    })
}

struct Printer<'a> {
    script: &'a Script,
    symbols: &'a Symbols,
}

impl Printer<'_> {
    fn operand(
        &self,
        f: &Function,
        decoded: &DecodedFunction,
        inst: &Instruction,
        next: usize,
        operand: &Operand,
        comments: &mut Vec<String>,
    ) -> Result<String> {
        let text = match operand {
            Operand::Local(i) => format!("local_{i:02x}"),
            Operand::U8(v) if *v < 10 => v.to_string(),
            Operand::U8(v) => {
                comments.push(v.to_string());
                format!("0x{v:02x}")
            }
            Operand::S32(v) => {
                if *v as i32 >= 10 {
                    comments.push((*v as i32).to_string());
                }
                format!("0x{v:08x}")
            }
            Operand::S32OrStr(v) => match self.symbols.string_operand(self.script, *v, &f.code, next) {
                Some(symbol) => symbol.to_string(),
                None => (*v as i32).to_string(),
            },
            Operand::Array(entries) => entries
                .iter()
                .map(|e| format!("0x{e:08x}"))
                .collect::<Vec<_>>()
                .join(","),
            Operand::Func(index) => {
                let target = self.script.functions.get(*index as usize).ok_or_else(|| {
                    AsbError::decode(
                        inst.addr as usize,
                        format!(
                            "call to function #{} of {}",
                            index,
                            self.script.functions.len()
                        ),
                    )
                })?;
                self.symbols.function(target)?.to_string()
            }
            Operand::NFunc(id) => format!("@native{id:02x}"),
            Operand::Label(addr) => match decoded.labels.get(addr) {
                Some(name) => name.clone(),
                None => format!("0x{addr:08x}"),
            },
        };
        Ok(text)
    }

    fn function(&self, out: &mut String, f: &Function) -> Result<()> {
        let decoded = decode_function(f)?;
        let name = self.symbols.function(f)?;
        log::debug!(
            "disassembling `{}` at 0x{:X}: {} instruction(s), {} label(s)",
            name,
            f.pos,
            decoded.instructions.len(),
            decoded.labels.len()
        );

        writeln!(out, "function {},{}", name, f.num_params)?;
        for (inst, next) in &decoded.instructions {
            if let Some(label) = decoded.labels.get(&inst.addr) {
                writeln!(out, "{label}:")?;
            }

            let mut comments = Vec::new();
            let mut operands = Vec::with_capacity(inst.operands.len());
            for operand in &inst.operands {
                operands.push(self.operand(f, &decoded, inst, *next, operand, &mut comments)?);
            }

            let mut line = format!("\t{}", inst.opcode.mnemonic());
            if !operands.is_empty() {
                line.push('\t');
                line.push_str(&operands.join(","));
            }
            if !comments.is_empty() {
                line.push_str("\t; ");
                line.push_str(&comments.join(", "));
            }
            writeln!(out, "{line}")?;
        }
        writeln!(out, "endfunction")?;
        Ok(())
    }
}

pub fn disassemble(script: &Script, options: &DisasmOptions) -> Result<String> {
    let symbols = Symbols::build(script, options.nls);
    let printer = Printer {
        script,
        symbols: &symbols,
    };

    let mut out = String::new();
    writeln!(out, "; ASB script disassembly.")?;
    writeln!(
        out,
        "; String literals were decoded from {} and are written here as UTF-8;",
        options.nls
    )?;
    writeln!(
        out,
        "; the assembler encodes them back to {}. \\xNN is a raw byte.",
        options.nls
    )?;
    writeln!(out, "script {}", script_name(&script.name, options.nls))?;

    if !script.strings.is_empty() {
        let talkers = infer_talkers(script, &options.talkers);
        writeln!(out)?;
        writeln!(out, "strings")?;
        for s in &script.strings {
            let text = escape_bytes(options.nls, &s.bytes);
            write!(out, "\t{} = \"{}\"", symbols.strings[&s.pos], text)?;
            if let Some(talker) = talkers.get(&s.pos) {
                write!(out, "\t; {talker}")?;
            }
            writeln!(out)?;
        }
        writeln!(out, "endstrings")?;
    }

    for f in &script.functions {
        writeln!(out)?;
        printer.function(&mut out, f)?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::StringEntry;
    use pretty_assertions::assert_eq;

    fn body(text: &str) -> Vec<&str> {
        text.lines()
            .skip_while(|l| !l.starts_with("function"))
            .collect()
    }

    fn script(strings: &[&[u8]], code: Vec<u8>) -> Script {
        let mut pos = 0;
        let strings = strings
            .iter()
            .map(|b| {
                let entry = StringEntry { pos, bytes: b.to_vec() };
                pos = entry.next_pos();
                entry
            })
            .collect();
        Script {
            name: "t".into(),
            strings,
            functions: vec![Function { name: 0, code, ..Default::default() }],
        }
    }

    #[test]
    fn synthetic_names() {
        assert_eq!(label_name(0x2a), "label_002a");
        assert_eq!(label_name(0xffff), "label_ffff");
        assert_eq!(label_name(0x1_0000), "label_00010000");
        assert_eq!(string_symbol(5), "str_0005");
    }

    #[test]
    fn labels_and_comments() {
        // jz 0x0c ; pushb 12 ; pushi 0x2a ; ret
        let code = hex::decode("220c000000040c052a00000026").unwrap();
        let text = disassemble(&script(&[b"main"], code), &DisasmOptions::default()).unwrap();
        assert_eq!(
            body(&text),
            vec![
                "function main,0",
                "\tjz\tlabel_000c",
                "\tpushb\t0x0c\t; 12",
                "\tpushi\t0x0000002a\t; 42",
                "label_000c:",
                "\tret",
                "endfunction",
            ]
        );
    }

    #[test]
    fn jump_into_the_middle_of_an_instruction_stays_raw() {
        let code = hex::decode("2101000000").unwrap();
        let text = disassemble(&script(&[b"main"], code), &DisasmOptions::default()).unwrap();
        assert!(text.contains("\tjmp\t0x00000001\n"), "{text}");
        assert!(!text.contains("label_"));
    }

    #[test]
    fn printed_string_becomes_a_symbol() {
        let mut code = hex::decode("0305000000").unwrap();
        code.extend(PRINT_SIGNATURE);
        code.extend(hex::decode("030500000026").unwrap());
        let text = disassemble(&script(&[b"main", b"hello"], code), &DisasmOptions::default()).unwrap();
        assert_eq!(
            body(&text),
            vec![
                "function main,0",
                "\tpushc\tstr_0005",
                "\tcalln\t@native00,1",
                "\tpushc\t5",
                "\tret",
                "endfunction",
            ]
        );
        assert!(text.contains("\tmain = \"main\"\n"));
        assert!(text.contains("\tstr_0005 = \"hello\"\n"));
    }

    #[test]
    fn function_name_string_stays_numeric() {
        let mut code = hex::decode("0300000000").unwrap();
        code.extend(PRINT_SIGNATURE);
        let text = disassemble(&script(&[b"main"], code), &DisasmOptions::default()).unwrap();
        assert!(text.contains("\tpushc\t0\n"), "{text}");
    }

    #[test]
    fn unknown_opcode_fails_with_address() {
        let mut s = script(&[b"main"], vec![0x00, 0x00, 0x30]);
        s.functions[0].pos = 0x40;
        let err = disassemble(&s, &DisasmOptions::default()).unwrap_err();
        assert_eq!(err.position(), Some(0x42));
    }

    #[test]
    fn call_out_of_range() {
        let code = hex::decode("2503000000").unwrap();
        let err = disassemble(&script(&[b"main"], code), &DisasmOptions::default()).unwrap_err();
        assert_eq!(err.position(), Some(0));
    }

    #[test]
    fn escaped_text_and_talker_comment() {
        // pushc 0 ; calln @native1d,2 ; pushc 5 ; calln @native00,1
        let mut code = hex::decode("0300000000").unwrap();
        code.extend([0x29, 0x1D, 0, 0, 0, 2]);
        code.extend(hex::decode("0305000000").unwrap());
        code.extend(PRINT_SIGNATURE);
        let text = disassemble(&script(&[b"main", b"say \"hi\"\n"], code), &DisasmOptions::default()).unwrap();
        assert!(
            text.contains("\tstr_0005 = \"say \\\"hi\\\"\\n\"\t; Kazuki\n"),
            "{text}"
        );
    }

    #[test]
    fn awkward_function_name_falls_back_to_symbol() {
        let text = disassemble(&script(&[b"two words"], vec![0x26]), &DisasmOptions::default()).unwrap();
        assert!(text.contains("\tstr_0000 = \"two words\"\n"));
        assert!(text.contains("function str_0000,0\n"));
    }

    #[test]
    fn script_name_forms() {
        let nls = Nls::ShiftJIS;
        assert_eq!(script_name(b"demo", nls), "demo");
        assert_eq!(script_name(&[0x83, 0x41], nls), "\u{30a2}");
        assert_eq!(script_name(b"", nls), "\"\"");
        assert_eq!(script_name(b"two words", nls), "\"two words\"");
        assert_eq!(script_name(&[0xed, 0x40], nls), "\"\\xed@\"");
    }

    #[test]
    fn lossy_bytes_are_escaped() {
        let strings: &[&[u8]] = &[b"main", &[0xed, 0x40], &[0xff, 0x41]];
        let text = disassemble(&script(strings, vec![0x26]), &DisasmOptions::default()).unwrap();
        assert!(text.contains("\tstr_0005 = \"\\xed@\"\n"), "{text}");
        assert!(text.contains("\tstr_0008 = \"\\xffA\"\n"), "{text}");
    }

    #[test]
    fn lossy_function_name_is_not_a_symbol() {
        let strings: &[&[u8]] = &[&[0x87, 0x90]];
        let text = disassemble(&script(strings, vec![0x26]), &DisasmOptions::default()).unwrap();
        assert!(text.contains("function str_0000,0\n"), "{text}");
    }
}
