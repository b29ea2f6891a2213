#[cfg(feature = "numeric")]
use bigdecimal::BigDecimal;

use crate::{Error, Type, Value};

/// Typed read access to a decoded column value.
///
/// [`Row::get`] goes through this trait: `bool`, `i64`, `f64` and `String`
/// read the matching scalar columns, the narrower integer types read `INT64`
/// columns with a range check, and `&str` borrows string columns without
/// copying. Wrap the target in `Option` to accept `NULL` — a bare target
/// treats `NULL` as an error — and in `Vec` to read `ARRAY` columns, whose
/// elements follow the same rules. With the `numeric` feature enabled,
/// `bigdecimal::BigDecimal` reads `NUMERIC` columns.
///
/// [`Row::get`]: crate::Row::get
pub trait FromSpanner<'a>: Sized {
    /// Converts a value known not to be `NULL`.
    fn from_value(value: &'a Value) -> Result<Self, Error>;

    /// Converts a `NULL` of the given column type. Errors unless the
    /// implementor has a `NULL` representation.
    fn from_null(tpe: &Type) -> Result<Self, Error> {
        let _ = tpe;
        Err(Error::Codec("column value was NULL".to_string()))
    }

    /// Entry point used by row access: dispatches on nullness.
    fn from_nullable(value: &'a Value) -> Result<Self, Error> {
        match value {
            Value::Null(tpe) => Self::from_null(tpe),
            value => Self::from_value(value),
        }
    }
}

fn mismatch<T>(expected: &str, found: &Value) -> Result<T, Error> {
    Err(Error::Codec(format!(
        "cannot read a {:?} column as {expected}",
        found.spanner_type()
    )))
}

impl<'a, T> FromSpanner<'a> for Option<T>
where
    T: FromSpanner<'a>,
{
    fn from_value(value: &'a Value) -> Result<Self, Error> {
        T::from_value(value).map(Some)
    }

    fn from_null(_tpe: &Type) -> Result<Self, Error> {
        Ok(None)
    }
}

impl<'a, T> FromSpanner<'a> for Vec<T>
where
    T: FromSpanner<'a>,
{
    fn from_value(value: &'a Value) -> Result<Self, Error> {
        match value {
            Value::Array(_, elements) => elements.iter().map(T::from_nullable).collect(),
            other => mismatch("ARRAY", other),
        }
    }
}

impl<'a> FromSpanner<'a> for bool {
    fn from_value(value: &'a Value) -> Result<Self, Error> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => mismatch("BOOL", other),
        }
    }
}

impl<'a> FromSpanner<'a> for f64 {
    fn from_value(value: &'a Value) -> Result<Self, Error> {
        match value {
            Value::Float64(v) => Ok(*v),
            other => mismatch("FLOAT64", other),
        }
    }
}

impl<'a> FromSpanner<'a> for String {
    fn from_value(value: &'a Value) -> Result<Self, Error> {
        match value {
            Value::String(v) => Ok(v.clone()),
            other => mismatch("STRING", other),
        }
    }
}

impl<'a> FromSpanner<'a> for &'a str {
    fn from_value(value: &'a Value) -> Result<Self, Error> {
        match value {
            Value::String(v) => Ok(v.as_str()),
            other => mismatch("STRING", other),
        }
    }
}

#[cfg(feature = "numeric")]
impl<'a> FromSpanner<'a> for BigDecimal {
    fn from_value(value: &'a Value) -> Result<Self, Error> {
        match value {
            Value::Numeric(v) => v
                .parse()
                .map_err(|_| Error::Codec(format!("NUMERIC literal {v:?} did not parse"))),
            other => mismatch("NUMERIC", other),
        }
    }
}

// every integer type reads INT64 columns; narrowing is range-checked
macro_rules! int64_column {
    ($($int:ty),+) => {
        $(
            impl<'a> FromSpanner<'a> for $int {
                fn from_value(value: &'a Value) -> Result<Self, Error> {
                    let Value::Int64(v) = value else {
                        return mismatch("INT64", value);
                    };
                    <$int>::try_from(*v).map_err(|_| {
                        Error::Codec(format!(
                            "INT64 value {v} does not fit in {}",
                            stringify!($int)
                        ))
                    })
                }
            }
        )+
    };
}

int64_column!(i64, i32, i16, i8, u32, u16, u8);

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_scalars_read_their_matching_columns() {
        assert!(bool::from_nullable(&Value::Bool(true)).unwrap());
        assert_eq!(i64::from_nullable(&Value::Int64(-7)).unwrap(), -7);
        assert_eq!(f64::from_nullable(&Value::Float64(2.5)).unwrap(), 2.5);
        assert_eq!(
            String::from_nullable(&Value::String("abc".to_string())).unwrap(),
            "abc"
        );
        assert_eq!(
            <&str>::from_nullable(&Value::String("abc".to_string())).unwrap(),
            "abc"
        );
    }

    #[test]
    fn test_integer_narrowing_is_range_checked() {
        assert_eq!(u8::from_nullable(&Value::Int64(255)).unwrap(), 255);
        assert_matches!(u8::from_nullable(&Value::Int64(256)), Err(Error::Codec(_)));
        assert_matches!(u32::from_nullable(&Value::Int64(-1)), Err(Error::Codec(_)));
        assert_eq!(i16::from_nullable(&Value::Int64(-32768)).unwrap(), i16::MIN);
        assert_eq!(
            i64::from_nullable(&Value::Int64(i64::MAX)).unwrap(),
            i64::MAX
        );
    }

    #[test]
    fn test_null_requires_an_option_target() {
        let null = Value::Null(Type::Int64);
        assert_matches!(i64::from_nullable(&null), Err(Error::Codec(_)));
        assert_eq!(Option::<i64>::from_nullable(&null).unwrap(), None);
        assert_eq!(
            Option::<i64>::from_nullable(&Value::Int64(3)).unwrap(),
            Some(3)
        );
    }

    #[test]
    fn test_arrays_and_nullable_elements() {
        let array = Value::Array(
            Type::Bool,
            vec![Value::Bool(true), Value::Null(Type::Bool), Value::Bool(false)],
        );
        assert_eq!(
            Vec::<Option<bool>>::from_nullable(&array).unwrap(),
            vec![Some(true), None, Some(false)]
        );
        // a non-Option element type refuses arrays holding NULLs
        assert_matches!(Vec::<bool>::from_nullable(&array), Err(Error::Codec(_)));

        let empty = Value::Array(Type::Int64, vec![]);
        assert_eq!(
            Vec::<i64>::from_nullable(&empty).unwrap(),
            Vec::<i64>::new()
        );

        // NULL array vs array of NULLs
        let null_array = Value::Null(Type::array(Type::Bool));
        assert_matches!(Vec::<bool>::from_nullable(&null_array), Err(Error::Codec(_)));
        assert_eq!(
            Option::<Vec<bool>>::from_nullable(&null_array).unwrap(),
            None
        );
    }

    #[test]
    fn test_column_type_mismatches() {
        assert_matches!(i64::from_nullable(&Value::Bool(true)), Err(Error::Codec(_)));
        assert_matches!(
            bool::from_nullable(&Value::String("true".to_string())),
            Err(Error::Codec(_))
        );
        assert_matches!(
            String::from_nullable(&Value::Float64(1.0)),
            Err(Error::Codec(_))
        );
        assert_matches!(
            Vec::<i64>::from_nullable(&Value::Int64(1)),
            Err(Error::Codec(_))
        );
    }

    #[cfg(feature = "numeric")]
    #[test]
    fn test_numeric_parses_into_bigdecimal() {
        let value = Value::Numeric("123.99".to_string());
        assert_eq!(
            BigDecimal::from_nullable(&value).unwrap(),
            "123.99".parse::<BigDecimal>().unwrap()
        );
        assert_matches!(
            BigDecimal::from_nullable(&Value::Numeric("not a number".to_string())),
            Err(Error::Codec(_))
        );
        assert_matches!(
            BigDecimal::from_nullable(&Value::Int64(1)),
            Err(Error::Codec(_))
        );
    }
}
