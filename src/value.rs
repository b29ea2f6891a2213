use prost_types::value::Kind;
use prost_types::{ListValue, Value as WireValue};

use crate::{Error, StructType, Type};

/// A single Cloud Spanner value, decoded from (or encodable to) the JSON-ish
/// wire representation the Spanner protocol uses inside `PartialResultSet`s
/// and statement parameters.
///
/// `NUMERIC`, `TIMESTAMP` and `DATE` values travel as strings on the wire and
/// are kept in that form; conversion into richer types is left to
/// [`FromSpanner`] implementations.
///
/// [`FromSpanner`]: crate::FromSpanner
// https://cloud.google.com/spanner/docs/reference/rest/v1/TypeCode
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A `NULL` of the given type.
    Null(Type),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Numeric(String),
    Timestamp(String),
    Date(String),
    Array(Type, Vec<Value>),
    Struct(StructType, Vec<Value>),
}

impl Value {
    /// The Cloud Spanner type of this value.
    pub fn spanner_type(&self) -> Type {
        match self {
            Value::Null(tpe) => tpe.clone(),
            Value::Bool(_) => Type::Bool,
            Value::Int64(_) => Type::Int64,
            Value::Float64(_) => Type::Float64,
            Value::String(_) => Type::String,
            Value::Numeric(_) => Type::Numeric,
            Value::Timestamp(_) => Type::Timestamp,
            Value::Date(_) => Type::Date,
            Value::Array(tpe, _) => Type::Array(Box::new(tpe.clone())),
            Value::Struct(struct_type, _) => Type::Struct(struct_type.clone()),
        }
    }

    /// Decodes a wire value against the type reported by the result-set
    /// metadata.
    pub(crate) fn decode(tpe: &Type, value: WireValue) -> Result<Value, Error> {
        let kind = value
            .kind
            .ok_or_else(|| Error::Codec("wire value is missing its kind".to_string()))?;

        if let Kind::NullValue(_) = kind {
            return Ok(Value::Null(tpe.clone()));
        }

        match (tpe, kind) {
            (Type::Bool, Kind::BoolValue(value)) => Ok(Value::Bool(value)),
            // INT64 does not fit in a double, so the wire encodes it as a
            // decimal string.
            (Type::Int64, Kind::StringValue(value)) => value
                .parse()
                .map(Value::Int64)
                .map_err(|_| Error::Codec(format!("invalid INT64 literal: {value:?}"))),
            (Type::Float64, Kind::NumberValue(value)) => Ok(Value::Float64(value)),
            // Non-finite doubles have no JSON number representation.
            (Type::Float64, Kind::StringValue(value)) => match value.as_str() {
                "NaN" => Ok(Value::Float64(f64::NAN)),
                "Infinity" => Ok(Value::Float64(f64::INFINITY)),
                "-Infinity" => Ok(Value::Float64(f64::NEG_INFINITY)),
                other => Err(Error::Codec(format!("invalid FLOAT64 literal: {other:?}"))),
            },
            (Type::String, Kind::StringValue(value)) => Ok(Value::String(value)),
            (Type::Numeric, Kind::StringValue(value)) => Ok(Value::Numeric(value)),
            (Type::Timestamp, Kind::StringValue(value)) => Ok(Value::Timestamp(value)),
            (Type::Date, Kind::StringValue(value)) => Ok(Value::Date(value)),
            (Type::Array(element), Kind::ListValue(list)) => list
                .values
                .into_iter()
                .map(|value| Value::decode(element, value))
                .collect::<Result<Vec<Value>, Error>>()
                .map(|values| Value::Array((**element).clone(), values)),
            (Type::Struct(struct_type), Kind::ListValue(list)) => {
                if list.values.len() != struct_type.fields().len() {
                    return Err(Error::Codec(format!(
                        "struct value has {} fields, type expects {}",
                        list.values.len(),
                        struct_type.fields().len()
                    )));
                }
                list.values
                    .into_iter()
                    .zip(struct_type.types())
                    .map(|(value, tpe)| Value::decode(tpe, value))
                    .collect::<Result<Vec<Value>, Error>>()
                    .map(|values| Value::Struct(struct_type.clone(), values))
            }
            (tpe, _) => Err(Error::Codec(format!(
                "cannot decode a {tpe:?} column from its wire representation"
            ))),
        }
    }
}

impl From<Value> for WireValue {
    fn from(value: Value) -> Self {
        let kind = match value {
            Value::Null(_) => Kind::NullValue(0),
            Value::Bool(value) => Kind::BoolValue(value),
            Value::Int64(value) => Kind::StringValue(value.to_string()),
            Value::Float64(value) if value.is_nan() => Kind::StringValue("NaN".to_string()),
            Value::Float64(value) if value == f64::INFINITY => {
                Kind::StringValue("Infinity".to_string())
            }
            Value::Float64(value) if value == f64::NEG_INFINITY => {
                Kind::StringValue("-Infinity".to_string())
            }
            Value::Float64(value) => Kind::NumberValue(value),
            Value::String(value)
            | Value::Numeric(value)
            | Value::Timestamp(value)
            | Value::Date(value) => Kind::StringValue(value),
            Value::Array(_, values) | Value::Struct(_, values) => Kind::ListValue(ListValue {
                values: values.into_iter().map(Into::into).collect(),
            }),
        };
        Self { kind: Some(kind) }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn wire(kind: Kind) -> WireValue {
        WireValue { kind: Some(kind) }
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(
            Value::decode(&Type::Bool, wire(Kind::BoolValue(true))).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::decode(&Type::Int64, wire(Kind::StringValue("-42".to_string()))).unwrap(),
            Value::Int64(-42)
        );
        assert_eq!(
            Value::decode(&Type::Float64, wire(Kind::NumberValue(1.5))).unwrap(),
            Value::Float64(1.5)
        );
        assert_eq!(
            Value::decode(&Type::String, wire(Kind::StringValue("abc".to_string()))).unwrap(),
            Value::String("abc".to_string())
        );
        assert_eq!(
            Value::decode(&Type::Numeric, wire(Kind::StringValue("99.99".to_string()))).unwrap(),
            Value::Numeric("99.99".to_string())
        );
    }

    #[test]
    fn test_decode_non_finite_float64() {
        assert_matches::assert_matches!(
            Value::decode(&Type::Float64, wire(Kind::StringValue("Infinity".to_string()))),
            Ok(Value::Float64(value)) if value == f64::INFINITY
        );
        assert_matches::assert_matches!(
            Value::decode(&Type::Float64, wire(Kind::StringValue("NaN".to_string()))),
            Ok(Value::Float64(value)) if value.is_nan()
        );
    }

    #[test]
    fn test_decode_null() {
        assert_eq!(
            Value::decode(&Type::Int64, wire(Kind::NullValue(0))).unwrap(),
            Value::Null(Type::Int64)
        );
    }

    #[test]
    fn test_decode_array() {
        let decoded = Value::decode(
            &Type::array(Type::Int64),
            wire(Kind::ListValue(ListValue {
                values: vec![
                    wire(Kind::StringValue("1".to_string())),
                    wire(Kind::NullValue(0)),
                ],
            })),
        )
        .unwrap();
        assert_eq!(
            decoded,
            Value::Array(
                Type::Int64,
                vec![Value::Int64(1), Value::Null(Type::Int64)]
            )
        );
    }

    #[test]
    fn test_decode_mismatched_kind() {
        assert_matches::assert_matches!(
            Value::decode(&Type::Int64, wire(Kind::BoolValue(true))),
            Err(Error::Codec(_))
        );
        assert_matches::assert_matches!(
            Value::decode(&Type::Int64, wire(Kind::StringValue("not a number".to_string()))),
            Err(Error::Codec(_))
        );
    }

    #[test]
    fn test_encode_round_trip() {
        let values = vec![
            Value::Bool(false),
            Value::Int64(7),
            Value::Float64(2.25),
            Value::String("hello".to_string()),
            Value::Null(Type::String),
            Value::Array(Type::Int64, vec![Value::Int64(1), Value::Int64(2)]),
        ];
        for value in values {
            let tpe = value.spanner_type();
            let encoded: WireValue = value.clone().into();
            assert_eq!(Value::decode(&tpe, encoded).unwrap(), value);
        }
    }
}
