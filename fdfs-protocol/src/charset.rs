//! Charset transcoding for text fields on the wire.

use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// Charsets a cluster may be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Latin1,
}

impl Charset {
    /// Resolves a configured charset name, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self, ProtocolError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Ok(Charset::Utf8),
            "ISO-8859-1" | "ISO8859-1" | "ISO_8859_1" | "LATIN1" => Ok(Charset::Latin1),
            _ => Err(ProtocolError::UnsupportedCharset(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO8859-1",
        }
    }

    /// Decodes wire bytes to text.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    /// Encodes text to wire bytes.
    pub fn encode(&self, s: &str) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Charset::Utf8 => Ok(s.as_bytes().to_vec()),
            Charset::Latin1 => s
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        ProtocolError::InvalidArgument(format!(
                            "character {:?} is not representable in {}",
                            c,
                            self.name()
                        ))
                    })
                })
                .collect(),
        }
    }
}

impl FromStr for Charset {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Charset::from_name(s)
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Transcodes bytes in `charset` to UTF-8 bytes.
pub fn transcode(bytes: &[u8], charset: &str) -> Result<Vec<u8>, ProtocolError> {
    Ok(Charset::from_name(charset)?.decode(bytes).into_bytes())
}
