//! Fixed-stride element layouts
//!
//! A layout tells a view how to carve a segment into elements: either raw
//! single bytes, or packed records described by a C-style format string
//! (`"ddd"` is three f64 fields, `"<3f"` three little-endian f32, `">HH"`
//! two big-endian u16). Records are always packed: the stride is exactly
//! the sum of the field widths, whatever the byte order.

use crate::error::{Result, ShmError};
use serde::{Deserialize, Serialize};

/// Byte order of a record's fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Native,
    Little,
    Big,
}

/// A single fixed-width numeric field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl FieldKind {
    fn from_code(code: char) -> Option<Self> {
        match code {
            'b' => Some(Self::I8),
            'B' => Some(Self::U8),
            'h' => Some(Self::I16),
            'H' => Some(Self::U16),
            'i' | 'l' => Some(Self::I32),
            'I' | 'L' => Some(Self::U32),
            'q' => Some(Self::I64),
            'Q' => Some(Self::U64),
            'f' => Some(Self::F32),
            'd' => Some(Self::F64),
            _ => None,
        }
    }

    /// Packed width of the field in bytes
    pub fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    fn code(self) -> char {
        match self {
            Self::I8 => 'b',
            Self::U8 => 'B',
            Self::I16 => 'h',
            Self::U16 => 'H',
            Self::I32 => 'i',
            Self::U32 => 'I',
            Self::I64 => 'q',
            Self::U64 => 'Q',
            Self::F32 => 'f',
            Self::F64 => 'd',
        }
    }
}

/// One decoded field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    /// Numeric value as f64 (lossy for 64-bit integers beyond 2^53)
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::UInt(v) => v as f64,
            Self::F32(v) => v as f64,
            Self::F64(v) => v,
        }
    }

    /// Integer value, if this scalar is an integer that fits i64
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(v),
            Self::UInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Integer value, if this scalar is a non-negative integer
    pub fn as_u64(self) -> Option<u64> {
        match self {
            Self::Int(v) => u64::try_from(v).ok(),
            Self::UInt(v) => Some(v),
            _ => None,
        }
    }

    fn int_value(self, code: char) -> Result<i128> {
        match self {
            Self::Int(v) => Ok(v as i128),
            Self::UInt(v) => Ok(v as i128),
            Self::F32(_) | Self::F64(_) => Err(ShmError::ValueRange {
                code,
                value: format!("{:?}", self),
            }),
        }
    }
}

impl From<i8> for Scalar {
    fn from(v: i8) -> Self {
        Self::Int(v as i64)
    }
}
impl From<i16> for Scalar {
    fn from(v: i16) -> Self {
        Self::Int(v as i64)
    }
}
impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}
impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}
impl From<u8> for Scalar {
    fn from(v: u8) -> Self {
        Self::UInt(v as u64)
    }
}
impl From<u16> for Scalar {
    fn from(v: u16) -> Self {
        Self::UInt(v as u64)
    }
}
impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Self::UInt(v as u64)
    }
}
impl From<u64> for Scalar {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}
impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}
impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

/// One decoded element of a view
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Byte(u8),
    Record(Vec<Scalar>),
}

/// A parsed record format: ordered fixed-width fields with a byte order
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    format: String,
    order: ByteOrder,
    fields: Vec<FieldKind>,
    stride: usize,
}

impl RecordLayout {
    /// Parse a format string.
    ///
    /// An optional prefix selects byte order (`<` little, `>` or `!` big,
    /// `=` or `@` native, native if absent); each following field code may
    /// carry a decimal repeat count. Whitespace between fields is ignored.
    pub fn parse(format: &str) -> Result<Self> {
        let err = |reason: String| ShmError::LayoutParse {
            format: format.to_string(),
            reason,
        };

        let mut chars = format.chars().peekable();
        let order = match chars.peek() {
            Some('<') => {
                chars.next();
                ByteOrder::Little
            }
            Some('>') | Some('!') => {
                chars.next();
                ByteOrder::Big
            }
            Some('=') | Some('@') => {
                chars.next();
                ByteOrder::Native
            }
            _ => ByteOrder::Native,
        };

        let mut fields = Vec::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_whitespace() {
                chars.next();
                continue;
            }
            let mut repeat = 1usize;
            if c.is_ascii_digit() {
                let mut n = 0usize;
                while let Some(&d) = chars.peek() {
                    if let Some(digit) = d.to_digit(10) {
                        n = n
                            .checked_mul(10)
                            .and_then(|n| n.checked_add(digit as usize))
                            .ok_or_else(|| err("repeat count overflows".into()))?;
                        chars.next();
                    } else {
                        break;
                    }
                }
                repeat = n;
            }
            let code = chars
                .next()
                .ok_or_else(|| err("repeat count with no field code".into()))?;
            let kind =
                FieldKind::from_code(code).ok_or_else(|| err(format!("unknown field code '{code}'")))?;
            for _ in 0..repeat {
                fields.push(kind);
            }
        }

        if fields.is_empty() {
            return Err(err("format declares no fields".into()));
        }

        let stride = fields.iter().map(|f| f.size()).sum();
        Ok(Self {
            format: format.to_string(),
            order,
            fields,
            stride,
        })
    }

    /// The original format string, preserved exactly for the wire
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Byte order of every field
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Field kinds in declaration order (repeat counts expanded)
    pub fn fields(&self) -> &[FieldKind] {
        &self.fields
    }

    /// Packed size of one record
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Decode one record from exactly `stride` bytes.
    pub fn unpack(&self, bytes: &[u8]) -> Vec<Scalar> {
        debug_assert_eq!(bytes.len(), self.stride);
        let mut values = Vec::with_capacity(self.fields.len());
        let mut offset = 0;
        for &field in &self.fields {
            values.push(decode_field(field, self.order, &bytes[offset..offset + field.size()]));
            offset += field.size();
        }
        values
    }

    /// Encode one record into exactly `stride` bytes.
    pub fn pack(&self, values: &[Scalar], out: &mut [u8]) -> Result<()> {
        debug_assert_eq!(out.len(), self.stride);
        if values.len() != self.fields.len() {
            return Err(ShmError::FieldCount {
                expected: self.fields.len(),
                got: values.len(),
            });
        }
        let mut offset = 0;
        for (&field, &value) in self.fields.iter().zip(values) {
            encode_field(field, self.order, value, &mut out[offset..offset + field.size()])?;
            offset += field.size();
        }
        Ok(())
    }
}

macro_rules! decode_int {
    ($ty:ty, $order:expr, $bytes:expr) => {{
        let arr = <[u8; std::mem::size_of::<$ty>()]>::try_from($bytes).unwrap();
        match $order {
            ByteOrder::Little => <$ty>::from_le_bytes(arr),
            ByteOrder::Big => <$ty>::from_be_bytes(arr),
            ByteOrder::Native => <$ty>::from_ne_bytes(arr),
        }
    }};
}

macro_rules! encode_bytes {
    ($value:expr, $order:expr, $out:expr) => {{
        let arr = match $order {
            ByteOrder::Little => $value.to_le_bytes(),
            ByteOrder::Big => $value.to_be_bytes(),
            ByteOrder::Native => $value.to_ne_bytes(),
        };
        $out.copy_from_slice(&arr);
    }};
}

fn decode_field(field: FieldKind, order: ByteOrder, bytes: &[u8]) -> Scalar {
    match field {
        FieldKind::I8 => Scalar::Int(bytes[0] as i8 as i64),
        FieldKind::U8 => Scalar::UInt(bytes[0] as u64),
        FieldKind::I16 => Scalar::Int(decode_int!(i16, order, bytes) as i64),
        FieldKind::U16 => Scalar::UInt(decode_int!(u16, order, bytes) as u64),
        FieldKind::I32 => Scalar::Int(decode_int!(i32, order, bytes) as i64),
        FieldKind::U32 => Scalar::UInt(decode_int!(u32, order, bytes) as u64),
        FieldKind::I64 => Scalar::Int(decode_int!(i64, order, bytes)),
        FieldKind::U64 => Scalar::UInt(decode_int!(u64, order, bytes)),
        FieldKind::F32 => Scalar::F32(decode_int!(f32, order, bytes)),
        FieldKind::F64 => Scalar::F64(decode_int!(f64, order, bytes)),
    }
}

fn encode_field(field: FieldKind, order: ByteOrder, value: Scalar, out: &mut [u8]) -> Result<()> {
    let code = field.code();
    let range_err = || ShmError::ValueRange {
        code,
        value: format!("{value:?}"),
    };

    match field {
        FieldKind::F32 => encode_bytes!((value.as_f64() as f32), order, out),
        FieldKind::F64 => encode_bytes!(value.as_f64(), order, out),
        FieldKind::I8 => {
            let v = i8::try_from(value.int_value(code)?).map_err(|_| range_err())?;
            out[0] = v as u8;
        }
        FieldKind::U8 => {
            out[0] = u8::try_from(value.int_value(code)?).map_err(|_| range_err())?;
        }
        FieldKind::I16 => {
            let v = i16::try_from(value.int_value(code)?).map_err(|_| range_err())?;
            encode_bytes!(v, order, out);
        }
        FieldKind::U16 => {
            let v = u16::try_from(value.int_value(code)?).map_err(|_| range_err())?;
            encode_bytes!(v, order, out);
        }
        FieldKind::I32 => {
            let v = i32::try_from(value.int_value(code)?).map_err(|_| range_err())?;
            encode_bytes!(v, order, out);
        }
        FieldKind::U32 => {
            let v = u32::try_from(value.int_value(code)?).map_err(|_| range_err())?;
            encode_bytes!(v, order, out);
        }
        FieldKind::I64 => {
            let v = i64::try_from(value.int_value(code)?).map_err(|_| range_err())?;
            encode_bytes!(v, order, out);
        }
        FieldKind::U64 => {
            let v = u64::try_from(value.int_value(code)?).map_err(|_| range_err())?;
            encode_bytes!(v, order, out);
        }
    }
    Ok(())
}

/// How a view interprets a segment's bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ElementLayout {
    /// Elements are individual bytes; stride 1
    Raw,
    /// Elements are packed records; stride is the record's packed size
    Record(RecordLayout),
}

impl ElementLayout {
    /// Layout from a format string, or [`ElementLayout::Raw`] for `"raw"`.
    pub fn record(format: &str) -> Result<Self> {
        Ok(Self::Record(RecordLayout::parse(format)?))
    }

    /// Bytes per element
    pub fn stride(&self) -> usize {
        match self {
            Self::Raw => 1,
            Self::Record(rec) => rec.stride(),
        }
    }

    pub(crate) fn mode_name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Record(_) => "record",
        }
    }
}

impl From<ElementLayout> for String {
    fn from(layout: ElementLayout) -> Self {
        match layout {
            ElementLayout::Raw => "raw".to_string(),
            ElementLayout::Record(rec) => rec.format.clone(),
        }
    }
}

impl TryFrom<String> for ElementLayout {
    type Error = ShmError;

    // No record code spells "raw", so the wire form is unambiguous.
    fn try_from(s: String) -> Result<Self> {
        if s == "raw" {
            Ok(Self::Raw)
        } else {
            Self::record(&s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_triple_double() {
        let rec = RecordLayout::parse("ddd").unwrap();
        assert_eq!(rec.stride(), 24);
        assert_eq!(rec.fields(), &[FieldKind::F64; 3]);
        assert_eq!(rec.order(), ByteOrder::Native);
    }

    #[test]
    fn test_parse_repeat_and_prefix() {
        let rec = RecordLayout::parse("<3f").unwrap();
        assert_eq!(rec.stride(), 12);
        assert_eq!(rec.order(), ByteOrder::Little);

        let rec = RecordLayout::parse(">HH").unwrap();
        assert_eq!(rec.stride(), 4);
        assert_eq!(rec.order(), ByteOrder::Big);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            RecordLayout::parse("3z"),
            Err(ShmError::LayoutParse { .. })
        ));
        assert!(matches!(
            RecordLayout::parse(""),
            Err(ShmError::LayoutParse { .. })
        ));
        assert!(matches!(
            RecordLayout::parse("<"),
            Err(ShmError::LayoutParse { .. })
        ));
    }

    #[test]
    fn test_big_endian_packing() {
        let rec = RecordLayout::parse(">H").unwrap();
        let mut buf = [0u8; 2];
        rec.pack(&[Scalar::UInt(0x0102)], &mut buf).unwrap();
        assert_eq!(buf, [0x01, 0x02]);

        let little = RecordLayout::parse("<H").unwrap();
        little.pack(&[Scalar::UInt(0x0102)], &mut buf).unwrap();
        assert_eq!(buf, [0x02, 0x01]);
    }

    #[test]
    fn test_pack_unpack_mixed() {
        let rec = RecordLayout::parse("<bIf").unwrap();
        assert_eq!(rec.stride(), 9);
        let mut buf = [0u8; 9];
        rec.pack(
            &[Scalar::Int(-5), Scalar::UInt(70000), Scalar::F32(1.5)],
            &mut buf,
        )
        .unwrap();
        let values = rec.unpack(&buf);
        assert_eq!(
            values,
            vec![Scalar::Int(-5), Scalar::UInt(70000), Scalar::F32(1.5)]
        );
    }

    #[test]
    fn test_pack_range_checked() {
        let rec = RecordLayout::parse("B").unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(
            rec.pack(&[Scalar::Int(256)], &mut buf),
            Err(ShmError::ValueRange { .. })
        ));
        assert!(matches!(
            rec.pack(&[Scalar::F64(1.0)], &mut buf),
            Err(ShmError::ValueRange { .. })
        ));
    }

    #[test]
    fn test_pack_arity_checked() {
        let rec = RecordLayout::parse("dd").unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(
            rec.pack(&[Scalar::F64(1.0)], &mut buf),
            Err(ShmError::FieldCount {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn test_int_coerces_into_float_field() {
        let rec = RecordLayout::parse("d").unwrap();
        let mut buf = [0u8; 8];
        rec.pack(&[Scalar::Int(3)], &mut buf).unwrap();
        assert_eq!(rec.unpack(&buf), vec![Scalar::F64(3.0)]);
    }

    #[test]
    fn test_layout_wire_form() {
        let layout = ElementLayout::record("<3f").unwrap();
        let s: String = layout.clone().into();
        assert_eq!(s, "<3f");
        assert_eq!(ElementLayout::try_from(s).unwrap(), layout);

        assert_eq!(
            ElementLayout::try_from("raw".to_string()).unwrap(),
            ElementLayout::Raw
        );
        assert_eq!(String::from(ElementLayout::Raw), "raw");
    }
}
