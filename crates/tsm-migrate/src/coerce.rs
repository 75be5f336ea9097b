//! Type coercion layer
//!
//! Maps a typed source field value to a destination column type and a
//! wire-encodable value. Total and deterministic: every representable
//! [`FieldValue`] maps to exactly one [`CoercedField`], and adding a new
//! variant fails to compile until the match below handles it.
//!
//! Destination columns are narrower than the source type system in two
//! places, both handled here:
//!
//! - The wire protocol cannot carry native Infinity/NaN, so non-finite
//!   floats become reserved sentinel constants near the representable
//!   extreme of the field's width. The six constants are mutually
//!   distinct and reversible on read.
//! - 64-bit integers (signed 64-bit and unsigned values needing more
//!   than 32 bits for the full range) travel as decimal text; the
//!   destination casts the text back to an exact numeric column.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;

/// Declared bit width of an integer field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            8 => Some(IntWidth::W8),
            16 => Some(IntWidth::W16),
            32 => Some(IntWidth::W32),
            64 => Some(IntWidth::W64),
            _ => None,
        }
    }
}

/// Declared bit width of a float field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatWidth {
    W32,
    W64,
}

impl FloatWidth {
    pub fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            32 => Some(FloatWidth::W32),
            64 => Some(FloatWidth::W64),
            _ => None,
        }
    }
}

/// Declared kind of an absent (JSON null) field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullKind {
    Int(IntWidth),
    Uint(IntWidth),
    Float(FloatWidth),
    /// String, block, or any other non-numeric declaration
    Other,
}

/// One decommutated field value, tagged with its source declaration
///
/// Exactly one variant is populated; integer and float variants carry the
/// bit width declared in the log entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int { width: IntWidth, value: i64 },
    Uint { width: IntWidth, value: u64 },
    Float32(f32),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Array(Vec<Value>),
    Object(serde_json::Map<String, Value>),
    /// Declared field whose value was absent in the payload
    Null(NullKind),
}

/// Destination column type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// Exact decimal, transmitted as text
    Decimal,
    Varchar,
    Boolean,
}

/// Wire-encodable value, already sentinel-substituted and normalized
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Line-protocol integer field (`123i`)
    Integer(i64),
    /// Line-protocol float field
    Float(f64),
    /// Quoted string field
    Text(String),
    Bool(bool),
    /// Declared NULL with no sentinel representation; the serializer
    /// omits the field and the destination stores a native NULL
    Absent,
}

/// Output of the coercion layer
#[derive(Debug, Clone, PartialEq)]
pub struct CoercedField {
    pub column: ColumnType,
    pub value: WireValue,
}

// Non-finite float sentinels. Chosen at and just below the representable
// extreme of each width so a finite reading instrument value cannot
// produce them, and each of the six is distinct. Bit patterns are part of
// the storage contract; readers reverse them.

/// 32-bit +Infinity sentinel: `f32::MAX` (bits 0x7F7F_FFFF)
pub const F32_POS_INF_SENTINEL: f32 = f32::MAX;
/// 32-bit -Infinity sentinel: `f32::MIN` (bits 0xFF7F_FFFF)
pub const F32_NEG_INF_SENTINEL: f32 = f32::MIN;
/// 32-bit NaN sentinel: one ULP below `f32::MAX` (bits 0x7F7F_FFFE)
pub const F32_NAN_SENTINEL: f32 = f32::from_bits(0x7F7F_FFFE);

/// 64-bit +Infinity sentinel: `f64::MAX` (bits 0x7FEF_FFFF_FFFF_FFFF)
pub const F64_POS_INF_SENTINEL: f64 = f64::MAX;
/// 64-bit -Infinity sentinel: `f64::MIN` (bits 0xFFEF_FFFF_FFFF_FFFF)
pub const F64_NEG_INF_SENTINEL: f64 = f64::MIN;
/// 64-bit NaN sentinel: one ULP below `f64::MAX` (bits 0x7FEF_FFFF_FFFF_FFFE)
pub const F64_NAN_SENTINEL: f64 = f64::from_bits(0x7FEF_FFFF_FFFF_FFFE);

// Integer NULL sentinels: the destination column type minimum. A source
// value equal to the exact minimum is therefore indistinguishable from
// NULL. Known, accepted lossy edge case inherited from the historical
// data contract; do not remap source data to avoid the collision.

/// NULL sentinel for 32-bit integer columns
pub const INT_NULL_SENTINEL: i32 = i32::MIN;
/// NULL sentinel for 64-bit integer and decimal columns
pub const LONG_NULL_SENTINEL: i64 = i64::MIN;

/// Coerce one field value to its destination column type and wire value
///
/// Total over `FieldValue`; never drops a field (declared NULLs without a
/// sentinel representation become `WireValue::Absent`, which the wire
/// serializer renders as a native destination NULL by omission).
pub fn coerce(field: &FieldValue) -> CoercedField {
    match field {
        // Signed <=32 bits fits the 32-bit integer column
        FieldValue::Int {
            width: IntWidth::W8 | IntWidth::W16 | IntWidth::W32,
            value,
        } => CoercedField {
            column: ColumnType::Int,
            value: WireValue::Integer(*value),
        },
        // Signed 64-bit needs full-range preservation: decimal text
        FieldValue::Int {
            width: IntWidth::W64,
            value,
        } => CoercedField {
            column: ColumnType::Decimal,
            value: WireValue::Text(value.to_string()),
        },
        // Unsigned <=16 bits fits the signed 32-bit range
        FieldValue::Uint {
            width: IntWidth::W8 | IntWidth::W16,
            value,
        } => CoercedField {
            column: ColumnType::Int,
            value: WireValue::Integer(*value as i64),
        },
        // Unsigned 32-bit needs 33 bits: 64-bit integer column
        FieldValue::Uint {
            width: IntWidth::W32,
            value,
        } => CoercedField {
            column: ColumnType::Long,
            value: WireValue::Integer(*value as i64),
        },
        // Unsigned 64-bit exceeds the signed 64-bit range: decimal text
        FieldValue::Uint {
            width: IntWidth::W64,
            value,
        } => CoercedField {
            column: ColumnType::Decimal,
            value: WireValue::Text(value.to_string()),
        },
        FieldValue::Float32(v) => CoercedField {
            column: ColumnType::Float,
            value: WireValue::Float(substitute_f32(*v) as f64),
        },
        FieldValue::Float64(v) => CoercedField {
            column: ColumnType::Double,
            value: WireValue::Float(substitute_f64(*v)),
        },
        FieldValue::Text(s) => CoercedField {
            column: ColumnType::Varchar,
            value: WireValue::Text(s.clone()),
        },
        FieldValue::Bytes(b) => CoercedField {
            column: ColumnType::Varchar,
            value: WireValue::Text(BASE64.encode(b)),
        },
        FieldValue::Bool(b) => CoercedField {
            column: ColumnType::Boolean,
            value: WireValue::Bool(*b),
        },
        FieldValue::Array(items) => CoercedField {
            column: ColumnType::Varchar,
            value: WireValue::Text(Value::Array(items.clone()).to_string()),
        },
        FieldValue::Object(map) => CoercedField {
            column: ColumnType::Varchar,
            value: WireValue::Text(Value::Object(map.clone()).to_string()),
        },
        FieldValue::Null(kind) => coerce_null(*kind),
    }
}

/// Substitute the reserved 32-bit sentinel for a non-finite value
fn substitute_f32(v: f32) -> f32 {
    if v.is_nan() {
        F32_NAN_SENTINEL
    } else if v == f32::INFINITY {
        F32_POS_INF_SENTINEL
    } else if v == f32::NEG_INFINITY {
        F32_NEG_INF_SENTINEL
    } else {
        v
    }
}

/// Substitute the reserved 64-bit sentinel for a non-finite value
fn substitute_f64(v: f64) -> f64 {
    if v.is_nan() {
        F64_NAN_SENTINEL
    } else if v == f64::INFINITY {
        F64_POS_INF_SENTINEL
    } else if v == f64::NEG_INFINITY {
        F64_NEG_INF_SENTINEL
    } else {
        v
    }
}

/// Coerce a declared-NULL value
///
/// Integer columns get the column minimum sentinel; everything else is
/// reported as `Absent` and stored as a native destination NULL.
fn coerce_null(kind: NullKind) -> CoercedField {
    match kind {
        NullKind::Int(IntWidth::W8 | IntWidth::W16 | IntWidth::W32)
        | NullKind::Uint(IntWidth::W8 | IntWidth::W16) => CoercedField {
            column: ColumnType::Int,
            value: WireValue::Integer(INT_NULL_SENTINEL as i64),
        },
        NullKind::Uint(IntWidth::W32) => CoercedField {
            column: ColumnType::Long,
            value: WireValue::Integer(LONG_NULL_SENTINEL),
        },
        NullKind::Int(IntWidth::W64) | NullKind::Uint(IntWidth::W64) => CoercedField {
            column: ColumnType::Decimal,
            value: WireValue::Text(LONG_NULL_SENTINEL.to_string()),
        },
        NullKind::Float(FloatWidth::W32) => CoercedField {
            column: ColumnType::Float,
            value: WireValue::Absent,
        },
        NullKind::Float(FloatWidth::W64) => CoercedField {
            column: ColumnType::Double,
            value: WireValue::Absent,
        },
        NullKind::Other => CoercedField {
            column: ColumnType::Varchar,
            value: WireValue::Absent,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_signed_widths_map_to_int_and_decimal() {
        let c = coerce(&FieldValue::Int {
            width: IntWidth::W16,
            value: -300,
        });
        assert_eq!(c.column, ColumnType::Int);
        assert_eq!(c.value, WireValue::Integer(-300));

        let c = coerce(&FieldValue::Int {
            width: IntWidth::W64,
            value: i64::MAX,
        });
        assert_eq!(c.column, ColumnType::Decimal);
        assert_eq!(c.value, WireValue::Text("9223372036854775807".to_string()));
    }

    #[test]
    fn test_unsigned_width_promotion() {
        let c = coerce(&FieldValue::Uint {
            width: IntWidth::W16,
            value: 65535,
        });
        assert_eq!(c.column, ColumnType::Int);
        assert_eq!(c.value, WireValue::Integer(65535));

        // u32::MAX needs 33 bits, promoted to the 64-bit column
        let c = coerce(&FieldValue::Uint {
            width: IntWidth::W32,
            value: u32::MAX as u64,
        });
        assert_eq!(c.column, ColumnType::Long);
        assert_eq!(c.value, WireValue::Integer(4_294_967_295));

        // u64::MAX exceeds the signed 64-bit range entirely
        let c = coerce(&FieldValue::Uint {
            width: IntWidth::W64,
            value: u64::MAX,
        });
        assert_eq!(c.column, ColumnType::Decimal);
        assert_eq!(c.value, WireValue::Text("18446744073709551615".to_string()));
    }

    #[test]
    fn test_six_float_sentinels_are_distinct() {
        let sentinels = [
            F32_POS_INF_SENTINEL as f64,
            F32_NEG_INF_SENTINEL as f64,
            F32_NAN_SENTINEL as f64,
            F64_POS_INF_SENTINEL,
            F64_NEG_INF_SENTINEL,
            F64_NAN_SENTINEL,
        ];
        for (i, a) in sentinels.iter().enumerate() {
            assert!(a.is_finite());
            for b in &sentinels[i + 1..] {
                assert_ne!(a.to_bits(), b.to_bits());
            }
        }
    }

    #[test]
    fn test_nonfinite_f32_substitution() {
        for (input, expected) in [
            (f32::INFINITY, F32_POS_INF_SENTINEL),
            (f32::NEG_INFINITY, F32_NEG_INF_SENTINEL),
            (f32::NAN, F32_NAN_SENTINEL),
        ] {
            let c = coerce(&FieldValue::Float32(input));
            assert_eq!(c.column, ColumnType::Float);
            assert_eq!(c.value, WireValue::Float(expected as f64));
        }
    }

    #[test]
    fn test_nonfinite_f64_substitution() {
        for (input, expected) in [
            (f64::INFINITY, F64_POS_INF_SENTINEL),
            (f64::NEG_INFINITY, F64_NEG_INF_SENTINEL),
            (f64::NAN, F64_NAN_SENTINEL),
        ] {
            let c = coerce(&FieldValue::Float64(input));
            assert_eq!(c.column, ColumnType::Double);
            assert_eq!(c.value, WireValue::Float(expected));
        }
    }

    #[test]
    fn test_finite_floats_pass_through_bit_exact() {
        let c = coerce(&FieldValue::Float32(1.5));
        assert_eq!(c.value, WireValue::Float(1.5));

        let c = coerce(&FieldValue::Float64(-2.25e-300));
        assert_eq!(c.value, WireValue::Float(-2.25e-300));
    }

    #[test]
    fn test_block_is_base64() {
        let c = coerce(&FieldValue::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]));
        assert_eq!(c.column, ColumnType::Varchar);
        assert_eq!(c.value, WireValue::Text("3q2+7w==".to_string()));
    }

    #[test]
    fn test_array_and_object_are_json_text() {
        let c = coerce(&FieldValue::Array(vec![1.into(), 2.into(), 3.into()]));
        assert_eq!(c.column, ColumnType::Varchar);
        assert_eq!(c.value, WireValue::Text("[1,2,3]".to_string()));

        let mut map = serde_json::Map::new();
        map.insert("RED".to_string(), 5.into());
        let c = coerce(&FieldValue::Object(map));
        assert_eq!(c.value, WireValue::Text("{\"RED\":5}".to_string()));
    }

    #[test]
    fn test_null_int_gets_minimum_sentinel() {
        let c = coerce(&FieldValue::Null(NullKind::Int(IntWidth::W16)));
        assert_eq!(c.value, WireValue::Integer(i32::MIN as i64));

        let c = coerce(&FieldValue::Null(NullKind::Uint(IntWidth::W32)));
        assert_eq!(c.value, WireValue::Integer(i64::MIN));

        let c = coerce(&FieldValue::Null(NullKind::Int(IntWidth::W64)));
        assert_eq!(c.value, WireValue::Text(i64::MIN.to_string()));
    }

    #[test]
    fn test_null_float_and_text_are_absent() {
        let c = coerce(&FieldValue::Null(NullKind::Float(FloatWidth::W64)));
        assert_eq!(c.value, WireValue::Absent);

        let c = coerce(&FieldValue::Null(NullKind::Other));
        assert_eq!(c.value, WireValue::Absent);
    }

    proptest! {
        // Round-trip law: any i32 other than the reserved minimum decodes
        // back exactly from its wire integer
        #[test]
        fn prop_i32_round_trip(v in (i32::MIN + 1)..=i32::MAX) {
            let c = coerce(&FieldValue::Int { width: IntWidth::W32, value: v as i64 });
            prop_assert_eq!(c.value, WireValue::Integer(v as i64));
        }

        // 64-bit values preserve full precision through the decimal text
        // encoding
        #[test]
        fn prop_i64_text_round_trip(v in proptest::num::i64::ANY) {
            let c = coerce(&FieldValue::Int { width: IntWidth::W64, value: v });
            if let WireValue::Text(s) = c.value {
                prop_assert_eq!(s.parse::<i64>().unwrap(), v);
            } else {
                prop_assert!(false, "expected text encoding");
            }
        }

        #[test]
        fn prop_u64_text_round_trip(v in proptest::num::u64::ANY) {
            let c = coerce(&FieldValue::Uint { width: IntWidth::W64, value: v });
            if let WireValue::Text(s) = c.value {
                prop_assert_eq!(s.parse::<u64>().unwrap(), v);
            } else {
                prop_assert!(false, "expected text encoding");
            }
        }

        // Finite floats in the observed instrument range never collide
        // with a sentinel
        #[test]
        fn prop_finite_f64_never_hits_sentinel(v in -1.0e30f64..1.0e30f64) {
            let c = coerce(&FieldValue::Float64(v));
            if let WireValue::Float(out) = c.value {
                prop_assert_eq!(out.to_bits(), v.to_bits());
                prop_assert!(out.to_bits() != F64_POS_INF_SENTINEL.to_bits());
                prop_assert!(out.to_bits() != F64_NEG_INF_SENTINEL.to_bits());
                prop_assert!(out.to_bits() != F64_NAN_SENTINEL.to_bits());
            } else {
                prop_assert!(false, "expected float encoding");
            }
        }
    }
}
