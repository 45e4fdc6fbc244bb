//! Fixed-layout record decoding.
//!
//! Tracker statistics responses are flat arrays of equally sized records.
//! A [`Schema`] lists each field's name and width in wire order; offsets are
//! computed once by summing widths. [`decode_records`] applies a record
//! type's schema to every width-sized window of a buffer.

use crate::charset::Charset;
use crate::codec::{buff2int32, buff2long, trim_field};
use crate::error::ProtocolError;
use chrono::{DateTime, TimeZone, Utc};

/// Position of one field within a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

/// Ordered field table for one record kind.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<FieldInfo>,
    record_size: usize,
}

impl Schema {
    /// Builds a schema from `(name, width)` pairs in wire order.
    pub fn build(layout: &[(&'static str, usize)]) -> Self {
        let mut offset = 0;
        let fields = layout
            .iter()
            .map(|&(name, size)| {
                let field = FieldInfo { name, offset, size };
                offset += size;
                field
            })
            .collect();

        Self {
            fields,
            record_size: offset,
        }
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    /// Looks a field up by name.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Typed accessors over one record window of a buffer.
#[derive(Debug, Clone, Copy)]
pub struct RecordReader<'a> {
    bs: &'a [u8],
    offset: usize,
    charset: Charset,
}

impl<'a> RecordReader<'a> {
    pub fn new(bs: &'a [u8], offset: usize, charset: Charset) -> Self {
        Self {
            bs,
            offset,
            charset,
        }
    }

    fn slice(&self, field: &FieldInfo) -> &'a [u8] {
        let start = self.offset + field.offset;
        &self.bs[start..start + field.size]
    }

    /// Fixed-width text, transcoded and stripped of padding.
    pub fn string(&self, field: &FieldInfo) -> String {
        let text = self.charset.decode(self.slice(field));
        trim_field(&text).to_string()
    }

    pub fn long(&self, field: &FieldInfo) -> i64 {
        buff2long(self.bs, self.offset + field.offset)
    }

    /// An 8-byte wire integer narrowed to i32.
    pub fn int(&self, field: &FieldInfo) -> i32 {
        self.long(field) as i32
    }

    pub fn int32(&self, field: &FieldInfo) -> i32 {
        buff2int32(self.bs, self.offset + field.offset)
    }

    pub fn byte(&self, field: &FieldInfo) -> u8 {
        self.bs[self.offset + field.offset]
    }

    pub fn boolean(&self, field: &FieldInfo) -> bool {
        self.byte(field) != 0
    }

    /// Unix timestamp in seconds.
    pub fn date(&self, field: &FieldInfo) -> DateTime<Utc> {
        Utc.timestamp_opt(self.long(field), 0)
            .single()
            .unwrap_or_default()
    }
}

/// A record kind with a static schema.
pub trait Record: Sized {
    /// The field table shared by every record of this kind.
    fn schema() -> &'static Schema;

    /// Decodes one record from the window described by `reader`.
    fn decode(reader: &RecordReader<'_>) -> Self;
}

/// Decodes every record in `bs`.
///
/// The buffer length must be an exact multiple of the record size.
pub fn decode_records<T: Record>(bs: &[u8], charset: Charset) -> Result<Vec<T>, ProtocolError> {
    let width = T::schema().record_size();
    if width == 0 || bs.len() % width != 0 {
        return Err(ProtocolError::InvalidRecordLength {
            len: bs.len(),
            width,
        });
    }

    Ok((0..bs.len())
        .step_by(width)
        .map(|offset| T::decode(&RecordReader::new(bs, offset, charset)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    #[derive(Debug, PartialEq)]
    struct Pair {
        name: String,
        count: i64,
        flag: bool,
    }

    impl Record for Pair {
        fn schema() -> &'static Schema {
            static SCHEMA: OnceLock<Schema> = OnceLock::new();
            SCHEMA.get_or_init(|| Schema::build(&[("name", 6), ("count", 8), ("flag", 1)]))
        }

        fn decode(r: &RecordReader<'_>) -> Self {
            let f = Self::schema().fields();
            Self {
                name: r.string(&f[0]),
                count: r.long(&f[1]),
                flag: r.boolean(&f[2]),
            }
        }
    }

    fn pair_bytes(name: &[u8], count: i64, flag: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 6];
        buf[..name.len()].copy_from_slice(name);
        buf.extend_from_slice(&count.to_be_bytes());
        buf.push(flag);
        buf
    }

    #[test]
    fn test_schema_offsets() {
        let schema = Pair::schema();
        assert_eq!(schema.record_size(), 15);
        assert_eq!(schema.field("count").unwrap().offset, 6);
        assert_eq!(schema.field("flag").unwrap().offset, 14);
        assert!(schema.field("missing").is_none());
    }

    #[test]
    fn test_decode_two_records() {
        let mut buf = pair_bytes(b"ab", 42, 1);
        buf.extend(pair_bytes(b"cdef  ", -7, 0));

        let records: Vec<Pair> = decode_records(&buf, Charset::Utf8).unwrap();
        assert_eq!(
            records,
            vec![
                Pair {
                    name: "ab".into(),
                    count: 42,
                    flag: true
                },
                Pair {
                    name: "cdef".into(),
                    count: -7,
                    flag: false
                },
            ]
        );
    }

    #[test]
    fn test_decode_empty_buffer() {
        let records: Vec<Pair> = decode_records(&[], Charset::Utf8).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_invalid_record_length() {
        let result = decode_records::<Pair>(&[0u8; 16], Charset::Utf8);
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidRecordLength { len: 16, width: 15 })
        ));
    }

    #[test]
    fn test_reader_accessors() {
        let schema = Schema::build(&[("i32", 4), ("date", 8), ("int", 8)]);
        let mut buf = (-2i32).to_be_bytes().to_vec();
        buf.extend_from_slice(&1_600_000_000i64.to_be_bytes());
        buf.extend_from_slice(&23000i64.to_be_bytes());

        let r = RecordReader::new(&buf, 0, Charset::Utf8);
        let f = schema.fields();
        assert_eq!(r.int32(&f[0]), -2);
        assert_eq!(r.date(&f[1]).timestamp(), 1_600_000_000);
        assert_eq!(r.int(&f[2]), 23000);
    }
}
