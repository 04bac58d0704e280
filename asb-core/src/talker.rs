//! Speaker inference for dialogue strings.
//!
//! Scripts select the speaking character with `pushc <id>` followed by
//! `calln @native1d,2` (or `@native1e,2`), and print a line with
//! `pushc <string>` followed by `calln @native00,1`. Walking the code in
//! table order and remembering the last selected character gives a good guess
//! of who says what.

use std::collections::HashMap;

use crate::container::Script;
use crate::isa::{read_instruction, Opcode, Operand, PRINT_SIGNATURE};
use crate::stream::ByteReader;

const SET_TALKER_SIGNATURES: [[u8; 6]; 2] = [
    [0x29, 0x1D, 0x00, 0x00, 0x00, 0x02],
    [0x29, 0x1E, 0x00, 0x00, 0x00, 0x02],
];

pub const DEFAULT_TALKERS: [&str; 29] = [
    "Kazuki",
    "Sayaka",
    "Rin",
    "Mio",
    "Haruto",
    "Aoi",
    "Tsubasa",
    "Yuuka",
    "Shiori",
    "Kenji",
    "Natsume",
    "Ayane",
    "Ren",
    "Chiaki",
    "Misaki",
    "Takeru",
    "Hinata",
    "Kaede",
    "Souta",
    "Madoka",
    "Teacher",
    "Mother",
    "Father",
    "Girl",
    "Boy",
    "Voice",
    "Both",
    "Them three",
    "All",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkerTable {
    names: Vec<String>,
}

impl Default for TalkerTable {
    fn default() -> Self {
        Self::new(DEFAULT_TALKERS.iter().map(|s| s.to_string()).collect())
    }
}

impl TalkerTable {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn name(&self, id: i64) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn followed_by(reader: &ByteReader<'_>, signature: &[u8; 6]) -> bool {
    reader.peek_bytes(signature.len()) == Some(signature.as_slice())
}

/// Character id of the first print of each string, scanning every function
/// with a single "current character" state.
fn first_speakers(script: &Script) -> HashMap<u32, i64> {
    let mut current: i64 = -1;
    let mut speakers = HashMap::new();

    for f in &script.functions {
        let mut reader = ByteReader::with_base(&f.code, f.pos as usize);
        while !reader.at_end() {
            let Ok(inst) = read_instruction(&mut reader) else {
                // Undecodable tail; nothing more to learn from this function.
                break;
            };
            let (Opcode::PushC, [Operand::S32OrStr(value)]) = (inst.opcode, inst.operands.as_slice())
            else {
                continue;
            };

            if SET_TALKER_SIGNATURES
                .iter()
                .any(|sig| followed_by(&reader, sig))
            {
                current = *value as i32 as i64;
            } else if current >= 0 && followed_by(&reader, &PRINT_SIGNATURE) {
                speakers.entry(*value).or_insert(current);
            }
        }
    }

    speakers
}

/// Speaker of every string that has one, keyed by string offset.
pub fn infer_talkers(script: &Script, table: &TalkerTable) -> HashMap<u32, String> {
    first_speakers(script)
        .into_iter()
        .filter_map(|(pos, id)| table.name(id).map(|name| (pos, name.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Function, StringEntry};

    fn pushc(v: u32) -> Vec<u8> {
        let mut b = vec![0x03];
        b.extend_from_slice(&v.to_le_bytes());
        b
    }

    fn script(code: Vec<u8>) -> Script {
        Script {
            name: "t".into(),
            strings: vec![
                StringEntry { pos: 0, bytes: b"main".to_vec() },
                StringEntry { pos: 5, bytes: b"line".to_vec() },
            ],
            functions: vec![Function { name: 0, code, ..Default::default() }],
        }
    }

    #[test]
    fn speaker_selected_before_print() {
        let mut code = Vec::new();
        code.extend(pushc(7));
        code.extend(pushc(1));
        code.extend(SET_TALKER_SIGNATURES[0]);
        code.extend(pushc(5));
        code.extend(PRINT_SIGNATURE);
        code.push(0x26);
        let talkers = infer_talkers(&script(code), &TalkerTable::default());
        assert_eq!(talkers.get(&5).map(String::as_str), Some("Sayaka"));
        assert!(!talkers.contains_key(&0));
    }

    #[test]
    fn first_print_wins() {
        let mut code = Vec::new();
        code.extend(pushc(5));
        code.extend(PRINT_SIGNATURE);
        code.extend(pushc(28));
        code.extend(SET_TALKER_SIGNATURES[1]);
        code.extend(pushc(5));
        code.extend(PRINT_SIGNATURE);
        code.extend(pushc(2));
        code.extend(SET_TALKER_SIGNATURES[0]);
        code.extend(pushc(5));
        code.extend(PRINT_SIGNATURE);
        let s = script(code);
        let talkers = infer_talkers(&s, &TalkerTable::default());
        assert_eq!(talkers.get(&5).map(String::as_str), Some("All"));
    }

    #[test]
    fn out_of_range_id_is_no_talker() {
        let mut code = Vec::new();
        code.extend(pushc(29));
        code.extend(SET_TALKER_SIGNATURES[0]);
        code.extend(pushc(5));
        code.extend(PRINT_SIGNATURE);
        code.extend(pushc(0));
        code.extend(SET_TALKER_SIGNATURES[0]);
        code.extend(pushc(5));
        code.extend(PRINT_SIGNATURE);
        let s = script(code);
        assert!(infer_talkers(&s, &TalkerTable::default()).is_empty());
    }

    #[test]
    fn garbage_code_is_not_an_error() {
        let s = script(vec![0x03, 0x05, 0x00, 0xFF, 0xFF, 0x44]);
        assert!(infer_talkers(&s, &TalkerTable::default()).is_empty());
    }

    #[test]
    fn custom_table() {
        let table = TalkerTable::new(vec!["Narrator".into()]);
        assert_eq!(table.name(0), Some("Narrator"));
        assert_eq!(table.name(-1), None);
        assert_eq!(table.len(), 1);
    }
}
