//! Base64 with a configurable alphabet tail and pad character.
//!
//! Storage servers embed file metadata in generated filenames using a
//! URL-safe variant (`-`, `_`, `.`); [`Base64::filename`] builds that codec.

use crate::error::ProtocolError;

const IGNORE: i8 = -1;
const PAD: i8 = -2;

/// A Base64 codec.
#[derive(Debug, Clone)]
pub struct Base64 {
    line_separator: String,
    line_length: usize,
    value_to_char: [u8; 64],
    char_to_value: [i8; 256],
    pad: u8,
}

impl Base64 {
    /// Standard alphabet (`+`, `/`, `=`) without line wrapping.
    pub fn new() -> Self {
        Self::with_alphabet(b'+', b'/', b'=', 0)
    }

    /// Alphabet used for metadata embedded in remote filenames.
    pub fn filename() -> Self {
        Self::with_alphabet(b'-', b'_', b'.', 0)
    }

    /// Builds a codec from the characters for values 62 and 63, the pad
    /// character, and a line length (0 disables wrapping).
    pub fn with_alphabet(ch_plus: u8, ch_splash: u8, ch_pad: u8, line_length: usize) -> Self {
        let mut value_to_char = [0u8; 64];
        let tail = [ch_plus, ch_splash];
        for (slot, ch) in value_to_char.iter_mut().zip(
            (b'A'..=b'Z')
                .chain(b'a'..=b'z')
                .chain(b'0'..=b'9')
                .chain(tail),
        ) {
            *slot = ch;
        }

        let mut char_to_value = [IGNORE; 256];
        for (value, &ch) in value_to_char.iter().enumerate() {
            char_to_value[ch as usize] = value as i8;
        }
        char_to_value[ch_pad as usize] = PAD;

        Self {
            line_separator: "\n".to_string(),
            line_length: (line_length / 4) * 4,
            value_to_char,
            char_to_value,
            pad: ch_pad,
        }
    }

    /// Sets the wrap width, rounded down to a multiple of 4.
    pub fn with_line_length(mut self, line_length: usize) -> Self {
        self.line_length = (line_length / 4) * 4;
        self
    }

    pub fn with_line_separator(mut self, separator: impl Into<String>) -> Self {
        self.line_separator = separator.into();
        self
    }

    pub fn line_length(&self) -> usize {
        self.line_length
    }

    /// Encodes bytes, padding the final group and wrapping lines if configured.
    /// The last line is never terminated with a separator.
    pub fn encode(&self, b: &[u8]) -> String {
        let mut out = String::with_capacity(self.encoded_len(b.len()));
        let mut line_pos = 0;

        let mut chunks = b.chunks_exact(3);
        for chunk in &mut chunks {
            self.start_quad(&mut out, &mut line_pos);
            let quad = self.encode_triple(chunk[0], chunk[1], chunk[2]);
            out.extend(quad.iter().map(|&c| c as char));
        }

        match *chunks.remainder() {
            [b0] => {
                self.start_quad(&mut out, &mut line_pos);
                let quad = self.encode_triple(b0, 0, 0);
                out.extend(quad[..2].iter().map(|&c| c as char));
                out.push(self.pad as char);
                out.push(self.pad as char);
            }
            [b0, b1] => {
                self.start_quad(&mut out, &mut line_pos);
                let quad = self.encode_triple(b0, b1, 0);
                out.extend(quad[..3].iter().map(|&c| c as char));
                out.push(self.pad as char);
            }
            _ => {}
        }

        out
    }

    /// Decodes a complete Base64 string.
    ///
    /// Characters outside the alphabet (such as line breaks) are skipped. Each
    /// pad character decodes as zero and shortens the output by one byte.
    pub fn decode(&self, s: &str) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity((s.len() / 4) * 3);
        let mut cycle = 0;
        let mut combined: u32 = 0;
        let mut dummies = 0;

        for &c in s.as_bytes() {
            let value = match self.char_to_value[c as usize] {
                IGNORE => continue,
                PAD => {
                    dummies += 1;
                    0
                }
                v => v as u32,
            };

            combined = (combined << 6) | value;
            cycle += 1;
            if cycle == 4 {
                out.push((combined >> 16) as u8);
                out.push((combined >> 8) as u8);
                out.push(combined as u8);
                combined = 0;
                cycle = 0;
            }
        }

        if cycle != 0 {
            return Err(ProtocolError::MalformedInput(
                "input to decode is not a multiple of 4 characters".to_string(),
            ));
        }

        if dummies > out.len() {
            return Err(ProtocolError::MalformedInput(
                "more pad characters than data".to_string(),
            ));
        }
        out.truncate(out.len() - dummies);
        Ok(out)
    }

    /// Decodes input whose trailing pad characters may have been dropped.
    pub fn decode_auto(&self, s: &str) -> Result<Vec<u8>, ProtocolError> {
        let remain = s.len() % 4;
        if remain == 0 {
            return self.decode(s);
        }

        let mut padded = String::with_capacity(s.len() + 4 - remain);
        padded.push_str(s);
        for _ in remain..4 {
            padded.push(self.pad as char);
        }
        self.decode(&padded)
    }

    fn encoded_len(&self, n: usize) -> usize {
        let mut len = n.div_ceil(3) * 4;
        if self.line_length != 0 && len > 0 {
            let lines = (len + self.line_length - 1) / self.line_length - 1;
            len += lines * self.line_separator.len();
        }
        len
    }

    fn start_quad(&self, out: &mut String, line_pos: &mut usize) {
        *line_pos += 4;
        if *line_pos > self.line_length {
            if self.line_length != 0 {
                out.push_str(&self.line_separator);
            }
            *line_pos = 4;
        }
    }

    fn encode_triple(&self, b0: u8, b1: u8, b2: u8) -> [u8; 4] {
        let combined = (u32::from(b0) << 16) | (u32::from(b1) << 8) | u32::from(b2);
        [
            self.value_to_char[((combined >> 18) & 0x3f) as usize],
            self.value_to_char[((combined >> 12) & 0x3f) as usize],
            self.value_to_char[((combined >> 6) & 0x3f) as usize],
            self.value_to_char[(combined & 0x3f) as usize],
        ]
    }
}

impl Default for Base64 {
    fn default() -> Self {
        Self::new()
    }
}
