use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use encoding_rs::{GBK, SHIFT_JIS, UTF_8};
use serde::{Deserialize, Serialize};

/// Text encoding of the strings stored in a script container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Nls {
    #[default]
    #[serde(rename = "sjis")]
    ShiftJIS,
    #[serde(rename = "gbk")]
    GBK,
    #[serde(rename = "utf8")]
    UTF8,
}

impl FromStr for Nls {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "sjis" | "shiftjis" | "shift_jis" | "shift-jis" => Ok(Nls::ShiftJIS),
            "gbk" | "gb18030" => Ok(Nls::GBK),
            "utf8" | "utf-8" => Ok(Nls::UTF8),
            other => Err(format!("unknown NLS: {other}")),
        }
    }
}

impl fmt::Display for Nls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Nls::ShiftJIS => "Shift-JIS",
            Nls::GBK => "GBK",
            Nls::UTF8 => "UTF-8",
        };
        f.write_str(name)
    }
}

impl Nls {
    fn encoding(self) -> &'static encoding_rs::Encoding {
        match self {
            Nls::ShiftJIS => SHIFT_JIS,
            Nls::GBK => GBK,
            Nls::UTF8 => UTF_8,
        }
    }

    /// Decode raw script bytes. Malformed sequences are replaced and logged.
    pub fn decode<'a>(self, bytes: &'a [u8]) -> Cow<'a, str> {
        let (text, _, had_errors) = self.encoding().decode(bytes);
        if had_errors {
            log::warn!("{} decode error in {:02x?}", self, bytes);
        }
        text
    }

    /// Decode without replacement, `None` on any malformed sequence.
    pub fn decode_strict<'a>(self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        self.encoding()
            .decode_without_bom_handling_and_without_replacement(bytes)
    }

    /// Whether `text` encodes back to exactly `bytes`.
    pub fn reproduces(self, text: &str, bytes: &[u8]) -> bool {
        self.encode(text).as_deref() == Some(bytes)
    }

    /// Encode text back to script bytes, `None` if a character has no
    /// representation in this encoding.
    pub fn encode(self, text: &str) -> Option<Vec<u8>> {
        let (bytes, _, had_errors) = self.encoding().encode(text);
        if had_errors {
            return None;
        }
        Some(bytes.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_aliases() {
        assert_eq!("sjis".parse::<Nls>(), Ok(Nls::ShiftJIS));
        assert_eq!("UTF-8".parse::<Nls>(), Ok(Nls::UTF8));
        assert_eq!("gb18030".parse::<Nls>(), Ok(Nls::GBK));
        assert!("latin1".parse::<Nls>().is_err());
    }

    #[test]
    fn shift_jis_roundtrip() {
        let text = "こんにちは\nABC";
        let bytes = Nls::ShiftJIS.encode(text).unwrap();
        assert_ne!(bytes.as_slice(), text.as_bytes());
        assert_eq!(Nls::ShiftJIS.decode(&bytes), text);
    }

    #[test]
    fn strict_decode_and_lossy_pairs() {
        assert_eq!(Nls::ShiftJIS.decode_strict(&[0xff, 0x41]), None);
        // NEC-selected IBM extension: decodes, but encodes to the IBM code point
        let text = Nls::ShiftJIS.decode_strict(&[0xed, 0x40]).unwrap();
        assert!(!Nls::ShiftJIS.reproduces(&text, &[0xed, 0x40]));
        let text = Nls::ShiftJIS.decode_strict(&[0x82, 0xa0]).unwrap();
        assert!(Nls::ShiftJIS.reproduces(&text, &[0x82, 0xa0]));
    }

    #[test]
    fn unencodable_text() {
        assert_eq!(Nls::ShiftJIS.encode("\u{1F600}"), None);
    }
}
