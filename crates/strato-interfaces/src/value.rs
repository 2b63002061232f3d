//! Typed values exchanged over interfaces.
//!
//! `Value` is the abstract value tree accepted by `send` and produced for
//! received data. It deliberately knows nothing about the wire encoding;
//! marshalling to bytes is the transport codec's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// Custom serialization module for binary data as base64
mod blob_serde {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

// Same as above for arrays of blobs.
mod blob_vec_serde {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    pub fn serialize<S>(blobs: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: Vec<String> = blobs.iter().map(|b| STANDARD.encode(b)).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Type tag declared by a mapping: seven scalar kinds and their arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    Double,
    Integer,
    Boolean,
    LongInteger,
    String,
    BinaryBlob,
    DateTime,
    DoubleArray,
    IntegerArray,
    BooleanArray,
    LongIntegerArray,
    StringArray,
    BinaryBlobArray,
    DateTimeArray,
}

impl MappingType {
    /// Whether this tag is one of the array kinds.
    pub fn is_array(self) -> bool {
        matches!(
            self,
            Self::DoubleArray
                | Self::IntegerArray
                | Self::BooleanArray
                | Self::LongIntegerArray
                | Self::StringArray
                | Self::BinaryBlobArray
                | Self::DateTimeArray
        )
    }

    /// The scalar kind of this tag (identity for scalars).
    pub fn scalar(self) -> Self {
        match self {
            Self::DoubleArray => Self::Double,
            Self::IntegerArray => Self::Integer,
            Self::BooleanArray => Self::Boolean,
            Self::LongIntegerArray => Self::LongInteger,
            Self::StringArray => Self::String,
            Self::BinaryBlobArray => Self::BinaryBlob,
            Self::DateTimeArray => Self::DateTime,
            other => other,
        }
    }

    /// Wire name of the tag, as it appears in interface definitions.
    pub fn name(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::LongInteger => "longinteger",
            Self::String => "string",
            Self::BinaryBlob => "binaryblob",
            Self::DateTime => "datetime",
            Self::DoubleArray => "doublearray",
            Self::IntegerArray => "integerarray",
            Self::BooleanArray => "booleanarray",
            Self::LongIntegerArray => "longintegerarray",
            Self::StringArray => "stringarray",
            Self::BinaryBlobArray => "binaryblobarray",
            Self::DateTimeArray => "datetimearray",
        }
    }
}

impl std::fmt::Display for MappingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A typed value accepted by `send` operations and produced for received
/// data. Integers are 32 bit, long integers 64 bit; arrays are homogeneous
/// by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Double(f64),
    Integer(i32),
    Boolean(bool),
    LongInteger(i64),
    String(String),
    /// Binary data serialized as base64 string
    #[serde(with = "blob_serde")]
    BinaryBlob(Vec<u8>),
    DateTime(DateTime<Utc>),
    DoubleArray(Vec<f64>),
    IntegerArray(Vec<i32>),
    BooleanArray(Vec<bool>),
    LongIntegerArray(Vec<i64>),
    StringArray(Vec<String>),
    #[serde(with = "blob_vec_serde")]
    BinaryBlobArray(Vec<Vec<u8>>),
    DateTimeArray(Vec<DateTime<Utc>>),
}

impl Value {
    /// The mapping type this value would satisfy exactly.
    pub fn mapping_type(&self) -> MappingType {
        match self {
            Self::Double(_) => MappingType::Double,
            Self::Integer(_) => MappingType::Integer,
            Self::Boolean(_) => MappingType::Boolean,
            Self::LongInteger(_) => MappingType::LongInteger,
            Self::String(_) => MappingType::String,
            Self::BinaryBlob(_) => MappingType::BinaryBlob,
            Self::DateTime(_) => MappingType::DateTime,
            Self::DoubleArray(_) => MappingType::DoubleArray,
            Self::IntegerArray(_) => MappingType::IntegerArray,
            Self::BooleanArray(_) => MappingType::BooleanArray,
            Self::LongIntegerArray(_) => MappingType::LongIntegerArray,
            Self::StringArray(_) => MappingType::StringArray,
            Self::BinaryBlobArray(_) => MappingType::BinaryBlobArray,
            Self::DateTimeArray(_) => MappingType::DateTimeArray,
        }
    }

    /// Whether this is one of the array variants with zero elements.
    pub fn is_empty_array(&self) -> bool {
        match self {
            Self::DoubleArray(v) => v.is_empty(),
            Self::IntegerArray(v) => v.is_empty(),
            Self::BooleanArray(v) => v.is_empty(),
            Self::LongIntegerArray(v) => v.is_empty(),
            Self::StringArray(v) => v.is_empty(),
            Self::BinaryBlobArray(v) => v.is_empty(),
            Self::DateTimeArray(v) => v.is_empty(),
            _ => false,
        }
    }

    /// All floating point content, if any, is finite.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Double(v) => v.is_finite(),
            Self::DoubleArray(vs) => vs.iter().all(|v| v.is_finite()),
            _ => true,
        }
    }

    /// Applies the integer-to-double widening a `double`/`doublearray`
    /// mapping permits, so the wire always carries the declared type.
    /// Any other combination is returned unchanged.
    pub fn widen_for(self, target: MappingType) -> Self {
        match (target, self) {
            (MappingType::Double, Self::Integer(v)) => Self::Double(f64::from(v)),
            (MappingType::DoubleArray, Self::IntegerArray(vs)) => {
                Self::DoubleArray(vs.into_iter().map(f64::from).collect())
            }
            (_, value) => value,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Integer(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::LongInteger(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::BinaryBlob(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Self::DoubleArray(v)
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Self::IntegerArray(v)
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Self::BooleanArray(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Self::LongIntegerArray(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::StringArray(v)
    }
}

impl From<Vec<Vec<u8>>> for Value {
    fn from(v: Vec<Vec<u8>>) -> Self {
        Self::BinaryBlobArray(v)
    }
}

impl From<Vec<DateTime<Utc>>> for Value {
    fn from(v: Vec<DateTime<Utc>>) -> Self {
        Self::DateTimeArray(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn mapping_type_names_round_trip() {
        let tags = [
            MappingType::Double,
            MappingType::Integer,
            MappingType::Boolean,
            MappingType::LongInteger,
            MappingType::String,
            MappingType::BinaryBlob,
            MappingType::DateTime,
            MappingType::DoubleArray,
            MappingType::IntegerArray,
            MappingType::BooleanArray,
            MappingType::LongIntegerArray,
            MappingType::StringArray,
            MappingType::BinaryBlobArray,
            MappingType::DateTimeArray,
        ];
        for tag in tags {
            let json = format!("\"{}\"", tag.name());
            let parsed: MappingType = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, tag);
        }
    }

    #[test]
    fn scalar_of_array_tags() {
        assert_eq!(MappingType::DoubleArray.scalar(), MappingType::Double);
        assert_eq!(
            MappingType::LongIntegerArray.scalar(),
            MappingType::LongInteger
        );
        assert!(!MappingType::Double.is_array());
        assert!(MappingType::BinaryBlobArray.is_array());
    }

    #[test]
    fn value_reports_its_mapping_type() {
        assert_eq!(Value::from(3.2).mapping_type(), MappingType::Double);
        assert_eq!(Value::from(7i32).mapping_type(), MappingType::Integer);
        assert_eq!(Value::from(7i64).mapping_type(), MappingType::LongInteger);
        assert_eq!(
            Value::from(vec![true, false]).mapping_type(),
            MappingType::BooleanArray
        );
    }

    #[test]
    fn empty_array_detection() {
        assert!(Value::DoubleArray(vec![]).is_empty_array());
        assert!(!Value::DoubleArray(vec![1.0]).is_empty_array());
        assert!(!Value::String(String::new()).is_empty_array());
        assert!(!Value::BinaryBlob(vec![]).is_empty_array());
    }

    #[test]
    fn finite_check_covers_arrays() {
        assert!(Value::Double(1.5).is_finite());
        assert!(!Value::Double(f64::NAN).is_finite());
        assert!(!Value::DoubleArray(vec![1.0, f64::INFINITY]).is_finite());
        assert!(Value::Integer(4).is_finite());
    }

    #[test]
    fn widening_only_touches_double_targets() {
        assert_eq!(
            Value::Integer(4).widen_for(MappingType::Double),
            Value::Double(4.0)
        );
        assert_eq!(
            Value::IntegerArray(vec![1, 2]).widen_for(MappingType::DoubleArray),
            Value::DoubleArray(vec![1.0, 2.0])
        );
        assert_eq!(
            Value::Integer(4).widen_for(MappingType::LongInteger),
            Value::Integer(4)
        );
        assert_eq!(
            Value::Double(1.5).widen_for(MappingType::Double),
            Value::Double(1.5)
        );
    }

    #[test]
    fn blob_serializes_as_base64() {
        let value = Value::BinaryBlob(vec![0x01, 0x02, 0xff]);
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("AQL/"));
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn datetime_round_trips_through_serde() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let value = Value::DateTime(ts);
        let json = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
