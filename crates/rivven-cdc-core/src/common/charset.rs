//! # Column Charsets
//!
//! Decodes raw column bytes according to the charset the server declares for
//! each character column, so a value reads the same whether it came from a
//! chunk query or from the change log.
//!
//! Charsets are a closed set resolved once, when table metadata is loaded
//! ([`Charset::from_mysql_name`]). An unknown name is a configuration error;
//! there is no fallback decoder.
//!
//! | MySQL name | Codec |
//! |------------|-------|
//! | `ascii` | 7-bit ASCII |
//! | `utf8`, `utf8mb3`, `utf8mb4` | UTF-8 |
//! | `ucs2` | UCS-2 big endian (BMP only) |
//! | `utf16` / `utf16le` | UTF-16 big / little endian |
//! | `latin1` | windows-1252 (MySQL's latin1) |
//! | `latin2`, `greek`, `hebrew` | ISO-8859-2/7/8 |
//! | `cp866`, `cp1250`, `cp1251`, `cp1256`, `cp1257`, `tis620` | IBM/Windows code pages |
//! | `koi8r`, `koi8u`, `macroman`, `macce` | KOI8 and Mac code pages |
//! | `sjis` | Shift_JIS, JIS X 0208 only |
//! | `cp932` | windows-31j |
//! | `ujis`, `eucjpms` | EUC-JP, JIS X 0208 and half-width katakana |
//! | `euckr`, `gbk`, `gb2312`, `gb18030`, `big5` | Korean/Chinese double-byte |
//!
//! Multi-byte decoders accept some sequences their encoders never produce
//! (NEC-selected IBM duplicates in cp932, JIS X 0212 in EUC-JP, HKSCS in
//! Big5). Decoding rejects any input that does not encode back to the same
//! bytes, so a decoded value always maps to exactly one byte string.

use crate::common::{CdcError, Result};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A server-declared column charset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Charset {
    Ascii,
    Utf8,
    Ucs2,
    Utf16,
    Utf16le,
    Latin1,
    Latin2,
    Greek,
    Hebrew,
    Cp866,
    Tis620,
    Cp1250,
    Cp1251,
    Cp1256,
    Cp1257,
    Koi8r,
    Koi8u,
    MacRoman,
    MacCe,
    Sjis,
    Cp932,
    Ujis,
    EucJpMs,
    EucKr,
    Gbk,
    Gb2312,
    Gb18030,
    Big5,
}

/// How a charset is actually decoded.
enum Codec {
    Ascii,
    Utf8,
    Ucs2,
    Utf16 { big_endian: bool },
    Whatwg(&'static Encoding),
    /// WHATWG Shift_JIS restricted to JIS X 0208
    JisX0208,
    MacCe,
}

impl Charset {
    /// Every supported charset.
    pub const ALL: [Charset; 28] = [
        Charset::Ascii,
        Charset::Utf8,
        Charset::Ucs2,
        Charset::Utf16,
        Charset::Utf16le,
        Charset::Latin1,
        Charset::Latin2,
        Charset::Greek,
        Charset::Hebrew,
        Charset::Cp866,
        Charset::Tis620,
        Charset::Cp1250,
        Charset::Cp1251,
        Charset::Cp1256,
        Charset::Cp1257,
        Charset::Koi8r,
        Charset::Koi8u,
        Charset::MacRoman,
        Charset::MacCe,
        Charset::Sjis,
        Charset::Cp932,
        Charset::Ujis,
        Charset::EucJpMs,
        Charset::EucKr,
        Charset::Gbk,
        Charset::Gb2312,
        Charset::Gb18030,
        Charset::Big5,
    ];

    /// Resolve a MySQL charset name (case-insensitive).
    pub fn from_mysql_name(name: &str) -> Result<Self> {
        let charset = match name.trim().to_ascii_lowercase().as_str() {
            "ascii" => Charset::Ascii,
            "utf8" | "utf8mb3" | "utf8mb4" => Charset::Utf8,
            "ucs2" => Charset::Ucs2,
            "utf16" => Charset::Utf16,
            "utf16le" => Charset::Utf16le,
            "latin1" => Charset::Latin1,
            "latin2" => Charset::Latin2,
            "greek" => Charset::Greek,
            "hebrew" => Charset::Hebrew,
            "cp866" => Charset::Cp866,
            "tis620" => Charset::Tis620,
            "cp1250" => Charset::Cp1250,
            "cp1251" => Charset::Cp1251,
            "cp1256" => Charset::Cp1256,
            "cp1257" => Charset::Cp1257,
            "koi8r" => Charset::Koi8r,
            "koi8u" => Charset::Koi8u,
            "macroman" => Charset::MacRoman,
            "macce" => Charset::MacCe,
            "sjis" => Charset::Sjis,
            "cp932" => Charset::Cp932,
            "ujis" => Charset::Ujis,
            "eucjpms" => Charset::EucJpMs,
            "euckr" => Charset::EucKr,
            "gbk" => Charset::Gbk,
            "gb2312" => Charset::Gb2312,
            "gb18030" => Charset::Gb18030,
            "big5" => Charset::Big5,
            _ => return Err(CdcError::unsupported_charset(name)),
        };
        Ok(charset)
    }

    /// Canonical MySQL name.
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Ascii => "ascii",
            Charset::Utf8 => "utf8mb4",
            Charset::Ucs2 => "ucs2",
            Charset::Utf16 => "utf16",
            Charset::Utf16le => "utf16le",
            Charset::Latin1 => "latin1",
            Charset::Latin2 => "latin2",
            Charset::Greek => "greek",
            Charset::Hebrew => "hebrew",
            Charset::Cp866 => "cp866",
            Charset::Tis620 => "tis620",
            Charset::Cp1250 => "cp1250",
            Charset::Cp1251 => "cp1251",
            Charset::Cp1256 => "cp1256",
            Charset::Cp1257 => "cp1257",
            Charset::Koi8r => "koi8r",
            Charset::Koi8u => "koi8u",
            Charset::MacRoman => "macroman",
            Charset::MacCe => "macce",
            Charset::Sjis => "sjis",
            Charset::Cp932 => "cp932",
            Charset::Ujis => "ujis",
            Charset::EucJpMs => "eucjpms",
            Charset::EucKr => "euckr",
            Charset::Gbk => "gbk",
            Charset::Gb2312 => "gb2312",
            Charset::Gb18030 => "gb18030",
            Charset::Big5 => "big5",
        }
    }

    /// Maximum bytes per character.
    pub fn max_bytes_per_char(&self) -> usize {
        match self {
            Charset::Utf8 | Charset::Gb18030 => 4,
            Charset::Ujis | Charset::EucJpMs => 3,
            Charset::Ucs2
            | Charset::Utf16
            | Charset::Utf16le
            | Charset::Sjis
            | Charset::Cp932
            | Charset::EucKr
            | Charset::Gbk
            | Charset::Gb2312
            | Charset::Big5 => 2,
            _ => 1,
        }
    }

    fn codec(&self) -> Codec {
        match self {
            Charset::Ascii => Codec::Ascii,
            Charset::Utf8 => Codec::Utf8,
            Charset::Ucs2 => Codec::Ucs2,
            Charset::Utf16 => Codec::Utf16 { big_endian: true },
            Charset::Utf16le => Codec::Utf16 { big_endian: false },
            Charset::Latin1 => Codec::Whatwg(encoding_rs::WINDOWS_1252),
            Charset::Latin2 => Codec::Whatwg(encoding_rs::ISO_8859_2),
            Charset::Greek => Codec::Whatwg(encoding_rs::ISO_8859_7),
            Charset::Hebrew => Codec::Whatwg(encoding_rs::ISO_8859_8),
            Charset::Cp866 => Codec::Whatwg(encoding_rs::IBM866),
            Charset::Tis620 => Codec::Whatwg(encoding_rs::WINDOWS_874),
            Charset::Cp1250 => Codec::Whatwg(encoding_rs::WINDOWS_1250),
            Charset::Cp1251 => Codec::Whatwg(encoding_rs::WINDOWS_1251),
            Charset::Cp1256 => Codec::Whatwg(encoding_rs::WINDOWS_1256),
            Charset::Cp1257 => Codec::Whatwg(encoding_rs::WINDOWS_1257),
            Charset::Koi8r => Codec::Whatwg(encoding_rs::KOI8_R),
            Charset::Koi8u => Codec::Whatwg(encoding_rs::KOI8_U),
            Charset::MacRoman => Codec::Whatwg(encoding_rs::MACINTOSH),
            Charset::MacCe => Codec::MacCe,
            Charset::Sjis => Codec::JisX0208,
            // WHATWG Shift_JIS is windows-31j
            Charset::Cp932 => Codec::Whatwg(encoding_rs::SHIFT_JIS),
            Charset::Ujis | Charset::EucJpMs => Codec::Whatwg(encoding_rs::EUC_JP),
            Charset::EucKr => Codec::Whatwg(encoding_rs::EUC_KR),
            Charset::Gbk | Charset::Gb2312 => Codec::Whatwg(encoding_rs::GBK),
            Charset::Gb18030 => Codec::Whatwg(encoding_rs::GB18030),
            Charset::Big5 => Codec::Whatwg(encoding_rs::BIG5),
        }
    }

    /// Decode column bytes into text.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self.codec() {
            Codec::Ascii => {
                if let Some(idx) = bytes.iter().position(|b| !b.is_ascii()) {
                    return Err(self.invalid(format!("non-ASCII byte at offset {}", idx)));
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            Codec::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| self.invalid(e.to_string())),
            Codec::Ucs2 => {
                let units = self.code_units(bytes, true)?;
                units
                    .into_iter()
                    .map(|unit| {
                        char::from_u32(u32::from(unit))
                            .ok_or_else(|| self.invalid(format!("surrogate unit {:#06x}", unit)))
                    })
                    .collect()
            }
            Codec::Utf16 { big_endian } => {
                let units = self.code_units(bytes, big_endian)?;
                String::from_utf16(&units).map_err(|e| self.invalid(e.to_string()))
            }
            Codec::Whatwg(encoding) => self.decode_exact(encoding, bytes),
            Codec::JisX0208 => {
                self.check_jis_x0208(bytes)?;
                self.decode_exact(encoding_rs::SHIFT_JIS, bytes)
            }
            Codec::MacCe => Ok(bytes
                .iter()
                .map(|&b| {
                    if b < 0x80 {
                        b as char
                    } else {
                        MAC_CE_HIGH[(b - 0x80) as usize]
                    }
                })
                .collect()),
        }
    }

    /// Encode text into column bytes.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self.codec() {
            Codec::Ascii => {
                if let Some(c) = text.chars().find(|c| !c.is_ascii()) {
                    return Err(self.unmappable(c));
                }
                Ok(text.as_bytes().to_vec())
            }
            Codec::Utf8 => Ok(text.as_bytes().to_vec()),
            Codec::Ucs2 => {
                let mut out = Vec::with_capacity(text.len() * 2);
                for c in text.chars() {
                    let unit = u16::try_from(u32::from(c)).map_err(|_| self.unmappable(c))?;
                    out.extend_from_slice(&unit.to_be_bytes());
                }
                Ok(out)
            }
            Codec::Utf16 { big_endian } => Ok(text
                .encode_utf16()
                .flat_map(|unit| {
                    if big_endian {
                        unit.to_be_bytes()
                    } else {
                        unit.to_le_bytes()
                    }
                })
                .collect()),
            Codec::Whatwg(encoding) => self.encode_strict(encoding, text),
            Codec::JisX0208 => {
                let bytes = self.encode_strict(encoding_rs::SHIFT_JIS, text)?;
                self.check_jis_x0208(&bytes)?;
                Ok(bytes)
            }
            Codec::MacCe => text
                .chars()
                .map(|c| {
                    if c.is_ascii() {
                        Ok(c as u8)
                    } else {
                        MAC_CE_HIGH
                            .iter()
                            .position(|&m| m == c)
                            .map(|idx| 0x80 + idx as u8)
                            .ok_or_else(|| self.unmappable(c))
                    }
                })
                .collect(),
        }
    }

    fn decode_exact(&self, encoding: &'static Encoding, bytes: &[u8]) -> Result<String> {
        let text = encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .ok_or_else(|| self.invalid("malformed byte sequence"))?;
        let (encoded, _, had_errors) = encoding.encode(&text);
        if had_errors || encoded.as_ref() != bytes {
            return Err(self.invalid("byte sequence has no canonical mapping"));
        }
        Ok(text.into_owned())
    }

    fn encode_strict(&self, encoding: &'static Encoding, text: &str) -> Result<Vec<u8>> {
        let (bytes, _, had_errors) = encoding.encode(text);
        if had_errors {
            return Err(self.invalid("text contains characters outside the charset"));
        }
        Ok(bytes.into_owned())
    }

    /// Reject Shift_JIS bytes outside JIS X 0208 and half-width katakana:
    /// NEC row 13 (lead 0x87), the unassigned rows 85-94 (leads 0xEB-0xEF),
    /// user-defined and IBM extension leads (0xF0-0xFC), and single 0x80.
    fn check_jis_x0208(&self, bytes: &[u8]) -> Result<()> {
        let mut idx = 0;
        while idx < bytes.len() {
            match bytes[idx] {
                0x00..=0x7F | 0xA1..=0xDF => idx += 1,
                0x81..=0x84 | 0x88..=0x9F | 0xE0..=0xEA => idx += 2,
                b => {
                    return Err(self.invalid(format!(
                        "byte {:#04x} at offset {} is outside JIS X 0208",
                        b, idx
                    )))
                }
            }
        }
        Ok(())
    }

    fn code_units(&self, bytes: &[u8], big_endian: bool) -> Result<Vec<u16>> {
        if bytes.len() % 2 != 0 {
            return Err(self.invalid(format!("odd byte length {}", bytes.len())));
        }
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| {
                if big_endian {
                    u16::from_be_bytes([pair[0], pair[1]])
                } else {
                    u16::from_le_bytes([pair[0], pair[1]])
                }
            })
            .collect())
    }

    fn invalid(&self, reason: impl Into<String>) -> CdcError {
        CdcError::decode(self.name(), reason)
    }

    fn unmappable(&self, c: char) -> CdcError {
        CdcError::decode(
            self.name(),
            format!("character U+{:04X} has no mapping", c as u32),
        )
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Charset {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_mysql_name(s)
    }
}

/// Mac Central European, bytes 0x80..=0xFF.
const MAC_CE_HIGH: [char; 128] = [
    '\u{00C4}', '\u{0100}', '\u{0101}', '\u{00C9}', '\u{0104}', '\u{00D6}', '\u{00DC}', '\u{00E1}',
    '\u{0105}', '\u{010C}', '\u{00E4}', '\u{010D}', '\u{0106}', '\u{0107}', '\u{00E9}', '\u{0179}',
    '\u{017A}', '\u{010E}', '\u{00ED}', '\u{010F}', '\u{0112}', '\u{0113}', '\u{0116}', '\u{00F3}',
    '\u{0117}', '\u{00F4}', '\u{00F6}', '\u{00F5}', '\u{00FA}', '\u{011A}', '\u{011B}', '\u{00FC}',
    '\u{2020}', '\u{00B0}', '\u{0118}', '\u{00A3}', '\u{00A7}', '\u{2022}', '\u{00B6}', '\u{00DF}',
    '\u{00AE}', '\u{00A9}', '\u{2122}', '\u{0119}', '\u{00A8}', '\u{2260}', '\u{0123}', '\u{012E}',
    '\u{012F}', '\u{012A}', '\u{2264}', '\u{2265}', '\u{012B}', '\u{0136}', '\u{2202}', '\u{2211}',
    '\u{0142}', '\u{013B}', '\u{013C}', '\u{013D}', '\u{013E}', '\u{0139}', '\u{013A}', '\u{0145}',
    '\u{0146}', '\u{0143}', '\u{00AC}', '\u{221A}', '\u{0144}', '\u{0147}', '\u{2206}', '\u{00AB}',
    '\u{00BB}', '\u{2026}', '\u{00A0}', '\u{0148}', '\u{0150}', '\u{00D5}', '\u{0151}', '\u{014C}',
    '\u{2013}', '\u{2014}', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}', '\u{00F7}', '\u{25CA}',
    '\u{014D}', '\u{0154}', '\u{0155}', '\u{0158}', '\u{2039}', '\u{203A}', '\u{0159}', '\u{0156}',
    '\u{0157}', '\u{0160}', '\u{201A}', '\u{201E}', '\u{0161}', '\u{015A}', '\u{015B}', '\u{00C1}',
    '\u{0164}', '\u{0165}', '\u{00CD}', '\u{017D}', '\u{017E}', '\u{016A}', '\u{00D3}', '\u{00D4}',
    '\u{016B}', '\u{016E}', '\u{00DA}', '\u{016F}', '\u{0170}', '\u{0171}', '\u{0172}', '\u{0173}',
    '\u{00DD}', '\u{00FD}', '\u{0137}', '\u{017B}', '\u{0141}', '\u{017C}', '\u{0122}', '\u{02C7}',
];
