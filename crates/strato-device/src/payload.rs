//! Wire payload codec.
//!
//! Data messages are CBOR maps with a `v` entry holding the value and an
//! optional `t` entry holding the timestamp (RFC 3339 text under tag 0).
//! An unset is a zero-length payload, not an envelope.
//!
//! Decoding is guided by the mapping's declared type: a CBOR integer is
//! accepted for a `double` mapping, integers are range-checked into the
//! declared width, and timestamps tolerate tag 0, tag 1 and bare text.

use chrono::{DateTime, SecondsFormat, Utc};
use ciborium::value::Value as CborValue;

use strato_interfaces::{InterfaceError, MappingType, Value};

use crate::error::{DeviceError, DeviceResult};

/// A decoded data payload, before the value is type-checked.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub value: CborValue,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Encode an individual value, with its timestamp when the mapping
/// declares one.
pub fn encode_individual(value: &Value, timestamp: Option<DateTime<Utc>>) -> DeviceResult<Vec<u8>> {
    encode_envelope(cbor_from_value(value), timestamp)
}

/// Encode an object aggregate. Keys are the leaf names under the common
/// parent path.
pub fn encode_object(
    pairs: &[(String, Value)],
    timestamp: Option<DateTime<Utc>>,
) -> DeviceResult<Vec<u8>> {
    let entries = pairs
        .iter()
        .map(|(leaf, value)| (CborValue::Text(leaf.clone()), cbor_from_value(value)))
        .collect();
    encode_envelope(CborValue::Map(entries), timestamp)
}

/// The wire form of a property unset.
pub fn encode_unset() -> Vec<u8> {
    Vec::new()
}

/// Decode a data payload into its envelope. Fails on anything that is not
/// a CBOR map with a `v` entry.
pub fn decode_envelope(payload: &[u8]) -> DeviceResult<Envelope> {
    let decoded: CborValue = ciborium::from_reader(payload)
        .map_err(|e| DeviceError::Transport(format!("payload decoding failed: {e}")))?;
    let CborValue::Map(entries) = decoded else {
        return Err(DeviceError::Transport(
            "payload is not a CBOR map".to_string(),
        ));
    };

    let mut value = None;
    let mut timestamp = None;
    for (key, entry) in entries {
        match key {
            CborValue::Text(k) if k == "v" => value = Some(entry),
            CborValue::Text(k) if k == "t" => {
                timestamp = Some(timestamp_from_cbor(entry).ok_or_else(|| {
                    DeviceError::Transport("unreadable timestamp in payload".to_string())
                })?);
            }
            _ => {}
        }
    }

    let value = value
        .ok_or_else(|| DeviceError::Transport("payload has no value entry".to_string()))?;
    Ok(Envelope { value, timestamp })
}

/// Convert a decoded CBOR item into a typed value, guided by the
/// mapping's declared type.
pub fn value_from_cbor(cbor: CborValue, target: MappingType) -> DeviceResult<Value> {
    if target.is_array() {
        let CborValue::Array(items) = cbor else {
            return Err(mismatch(target));
        };
        return array_from_cbor(items, target);
    }
    scalar_from_cbor(cbor, target)
}

/// Split a CBOR map into string-keyed entries. Used for incoming object
/// aggregates, where each key names a leaf mapping.
pub fn cbor_map_entries(value: CborValue) -> DeviceResult<Vec<(String, CborValue)>> {
    let CborValue::Map(entries) = value else {
        return Err(DeviceError::Transport(
            "object payload is not a CBOR map".to_string(),
        ));
    };
    entries
        .into_iter()
        .map(|(key, entry)| match key {
            CborValue::Text(k) => Ok((k, entry)),
            _ => Err(DeviceError::Transport(
                "object payload has a non-text key".to_string(),
            )),
        })
        .collect()
}

fn encode_envelope(
    value: CborValue,
    timestamp: Option<DateTime<Utc>>,
) -> DeviceResult<Vec<u8>> {
    let mut entries = vec![(CborValue::Text("v".to_string()), value)];
    if let Some(ts) = timestamp {
        entries.push((CborValue::Text("t".to_string()), timestamp_to_cbor(ts)));
    }
    let mut buf = Vec::new();
    ciborium::into_writer(&CborValue::Map(entries), &mut buf)
        .map_err(|e| DeviceError::Transport(format!("payload encoding failed: {e}")))?;
    Ok(buf)
}

fn cbor_from_value(value: &Value) -> CborValue {
    match value {
        Value::Double(v) => CborValue::Float(*v),
        Value::Integer(v) => CborValue::Integer((*v).into()),
        Value::Boolean(v) => CborValue::Bool(*v),
        Value::LongInteger(v) => CborValue::Integer((*v).into()),
        Value::String(v) => CborValue::Text(v.clone()),
        Value::BinaryBlob(v) => CborValue::Bytes(v.clone()),
        Value::DateTime(v) => timestamp_to_cbor(*v),
        Value::DoubleArray(vs) => {
            CborValue::Array(vs.iter().map(|v| CborValue::Float(*v)).collect())
        }
        Value::IntegerArray(vs) => {
            CborValue::Array(vs.iter().map(|v| CborValue::Integer((*v).into())).collect())
        }
        Value::BooleanArray(vs) => {
            CborValue::Array(vs.iter().map(|v| CborValue::Bool(*v)).collect())
        }
        Value::LongIntegerArray(vs) => {
            CborValue::Array(vs.iter().map(|v| CborValue::Integer((*v).into())).collect())
        }
        Value::StringArray(vs) => {
            CborValue::Array(vs.iter().map(|v| CborValue::Text(v.clone())).collect())
        }
        Value::BinaryBlobArray(vs) => {
            CborValue::Array(vs.iter().map(|v| CborValue::Bytes(v.clone())).collect())
        }
        Value::DateTimeArray(vs) => {
            CborValue::Array(vs.iter().map(|v| timestamp_to_cbor(*v)).collect())
        }
    }
}

fn array_from_cbor(items: Vec<CborValue>, target: MappingType) -> DeviceResult<Value> {
    let scalar = target.scalar();
    let value = match target {
        MappingType::DoubleArray => Value::DoubleArray(
            items
                .into_iter()
                .map(|item| match scalar_from_cbor(item, scalar)? {
                    Value::Double(v) => Ok(v),
                    _ => Err(mismatch(target)),
                })
                .collect::<DeviceResult<Vec<_>>>()?,
        ),
        MappingType::IntegerArray => Value::IntegerArray(
            items
                .into_iter()
                .map(|item| match scalar_from_cbor(item, scalar)? {
                    Value::Integer(v) => Ok(v),
                    _ => Err(mismatch(target)),
                })
                .collect::<DeviceResult<Vec<_>>>()?,
        ),
        MappingType::BooleanArray => Value::BooleanArray(
            items
                .into_iter()
                .map(|item| match scalar_from_cbor(item, scalar)? {
                    Value::Boolean(v) => Ok(v),
                    _ => Err(mismatch(target)),
                })
                .collect::<DeviceResult<Vec<_>>>()?,
        ),
        MappingType::LongIntegerArray => Value::LongIntegerArray(
            items
                .into_iter()
                .map(|item| match scalar_from_cbor(item, scalar)? {
                    Value::LongInteger(v) => Ok(v),
                    _ => Err(mismatch(target)),
                })
                .collect::<DeviceResult<Vec<_>>>()?,
        ),
        MappingType::StringArray => Value::StringArray(
            items
                .into_iter()
                .map(|item| match scalar_from_cbor(item, scalar)? {
                    Value::String(v) => Ok(v),
                    _ => Err(mismatch(target)),
                })
                .collect::<DeviceResult<Vec<_>>>()?,
        ),
        MappingType::BinaryBlobArray => Value::BinaryBlobArray(
            items
                .into_iter()
                .map(|item| match scalar_from_cbor(item, scalar)? {
                    Value::BinaryBlob(v) => Ok(v),
                    _ => Err(mismatch(target)),
                })
                .collect::<DeviceResult<Vec<_>>>()?,
        ),
        MappingType::DateTimeArray => Value::DateTimeArray(
            items
                .into_iter()
                .map(|item| match scalar_from_cbor(item, scalar)? {
                    Value::DateTime(v) => Ok(v),
                    _ => Err(mismatch(target)),
                })
                .collect::<DeviceResult<Vec<_>>>()?,
        ),
        _ => return Err(mismatch(target)),
    };
    Ok(value)
}

fn scalar_from_cbor(cbor: CborValue, target: MappingType) -> DeviceResult<Value> {
    let value = match (target, cbor) {
        (MappingType::Double, CborValue::Float(v)) => Value::Double(v),
        (MappingType::Double, CborValue::Integer(v)) => Value::Double(i128::from(v) as f64),
        (MappingType::Integer, CborValue::Integer(v)) => {
            let wide = i128::from(v);
            let narrow = i32::try_from(wide).map_err(|_| {
                DeviceError::Interface(InterfaceError::Validation(format!(
                    "integer {wide} does not fit a 32 bit mapping"
                )))
            })?;
            Value::Integer(narrow)
        }
        (MappingType::Boolean, CborValue::Bool(v)) => Value::Boolean(v),
        (MappingType::LongInteger, CborValue::Integer(v)) => {
            let wide = i128::from(v);
            let narrow = i64::try_from(wide).map_err(|_| {
                DeviceError::Interface(InterfaceError::Validation(format!(
                    "integer {wide} does not fit a 64 bit mapping"
                )))
            })?;
            Value::LongInteger(narrow)
        }
        (MappingType::String, CborValue::Text(v)) => Value::String(v),
        (MappingType::BinaryBlob, CborValue::Bytes(v)) => Value::BinaryBlob(v),
        (MappingType::DateTime, item) => {
            let ts = timestamp_from_cbor(item).ok_or_else(|| mismatch(target))?;
            Value::DateTime(ts)
        }
        _ => return Err(mismatch(target)),
    };
    Ok(value)
}

fn mismatch(target: MappingType) -> DeviceError {
    DeviceError::Interface(InterfaceError::Validation(format!(
        "payload does not carry a {} value",
        target.name()
    )))
}

fn timestamp_to_cbor(ts: DateTime<Utc>) -> CborValue {
    CborValue::Tag(
        0,
        Box::new(CborValue::Text(
            ts.to_rfc3339_opts(SecondsFormat::Millis, true),
        )),
    )
}

fn timestamp_from_cbor(item: CborValue) -> Option<DateTime<Utc>> {
    match item {
        CborValue::Tag(0, inner) => match *inner {
            CborValue::Text(text) => parse_rfc3339(&text),
            _ => None,
        },
        CborValue::Tag(1, inner) => match *inner {
            CborValue::Integer(secs) => {
                let secs = i64::try_from(i128::from(secs)).ok()?;
                DateTime::from_timestamp(secs, 0)
            }
            CborValue::Float(secs) => {
                let whole = secs.trunc() as i64;
                let nanos = (secs.fract() * 1e9).round() as u32;
                DateTime::from_timestamp(whole, nanos)
            }
            _ => None,
        },
        CborValue::Text(text) => parse_rfc3339(&text),
        _ => None,
    }
}

fn parse_rfc3339(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap()
    }

    #[test]
    fn individual_round_trip_with_timestamp() {
        let payload = encode_individual(&Value::Double(21.5), Some(ts())).unwrap();
        let envelope = decode_envelope(&payload).unwrap();
        assert_eq!(envelope.timestamp, Some(ts()));

        let value = value_from_cbor(envelope.value, MappingType::Double).unwrap();
        assert_eq!(value, Value::Double(21.5));
    }

    #[test]
    fn integer_widens_onto_double_mapping() {
        let payload = encode_individual(&Value::Integer(4), None).unwrap();
        let envelope = decode_envelope(&payload).unwrap();
        assert!(envelope.timestamp.is_none());

        let value = value_from_cbor(envelope.value, MappingType::Double).unwrap();
        assert_eq!(value, Value::Double(4.0));
    }

    #[test]
    fn integer_out_of_range_is_rejected() {
        let payload = encode_individual(&Value::LongInteger(1 << 40), None).unwrap();
        let envelope = decode_envelope(&payload).unwrap();

        let err = value_from_cbor(envelope.value, MappingType::Integer).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Interface(InterfaceError::Validation(_))
        ));
    }

    #[test]
    fn datetime_round_trips_through_tag_zero() {
        let payload = encode_individual(&Value::DateTime(ts()), None).unwrap();
        let envelope = decode_envelope(&payload).unwrap();

        let value = value_from_cbor(envelope.value, MappingType::DateTime).unwrap();
        assert_eq!(value, Value::DateTime(ts()));
    }

    #[test]
    fn bare_text_timestamp_is_accepted() {
        let item = CborValue::Text("2024-05-17T09:30:00Z".to_string());
        assert_eq!(timestamp_from_cbor(item), Some(ts()));
    }

    #[test]
    fn epoch_timestamp_is_accepted() {
        let item = CborValue::Tag(1, Box::new(CborValue::Integer(ts().timestamp().into())));
        assert_eq!(timestamp_from_cbor(item), Some(ts()));
    }

    #[test]
    fn object_payload_carries_leaf_entries() {
        let pairs = vec![
            ("lat".to_string(), Value::Double(45.1)),
            ("lon".to_string(), Value::Double(11.2)),
        ];
        let payload = encode_object(&pairs, Some(ts())).unwrap();
        let envelope = decode_envelope(&payload).unwrap();

        let entries = cbor_map_entries(envelope.value).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "lat");
        let lat = value_from_cbor(entries[0].1.clone(), MappingType::Double).unwrap();
        assert_eq!(lat, Value::Double(45.1));
    }

    #[test]
    fn arrays_decode_elementwise() {
        let payload =
            encode_individual(&Value::IntegerArray(vec![1, 2, 3]), None).unwrap();
        let envelope = decode_envelope(&payload).unwrap();

        let widened = value_from_cbor(envelope.value.clone(), MappingType::DoubleArray).unwrap();
        assert_eq!(widened, Value::DoubleArray(vec![1.0, 2.0, 3.0]));

        let exact = value_from_cbor(envelope.value, MappingType::IntegerArray).unwrap();
        assert_eq!(exact, Value::IntegerArray(vec![1, 2, 3]));
    }

    #[test]
    fn unset_is_a_zero_length_payload() {
        assert!(encode_unset().is_empty());
        assert!(decode_envelope(&encode_unset()).is_err());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let payload = encode_individual(&Value::String("on".to_string()), None).unwrap();
        let envelope = decode_envelope(&payload).unwrap();
        assert!(value_from_cbor(envelope.value, MappingType::Boolean).is_err());
    }
}
