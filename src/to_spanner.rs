#[cfg(feature = "numeric")]
use bigdecimal::BigDecimal;

use crate::{Error, Type, Value};

/// Conversion of Rust values into Spanner bind parameters.
///
/// [`Statement::bind`] accepts anything implementing this trait: `bool`, the
/// integer types up to 64 bits (all bound as `INT64`), `f64`, string types,
/// and — behind the `numeric` feature — `bigdecimal::BigDecimal` as
/// `NUMERIC`. `Option<T>` binds a `NULL` when `None`; the declared type
/// still travels with the parameter so the server can type the query.
/// `Vec<T>` and `&[T]` bind `ARRAY` values, whose elements may themselves be
/// `Option`.
///
/// [`Statement::bind`]: crate::Statement::bind
pub trait ToSpanner {
    /// The bind value for `self`.
    fn to_spanner(&self) -> Result<Value, Error>;

    /// The Spanner type this implementation binds as, used to populate the
    /// statement's parameter-type map.
    fn spanner_type() -> Type
    where
        Self: Sized,
    {
        unreachable!()
    }
}

impl<T: ToSpanner> ToSpanner for Option<T> {
    fn to_spanner(&self) -> Result<Value, Error> {
        match self {
            Some(value) => value.to_spanner(),
            None => Ok(Value::Null(T::spanner_type())),
        }
    }

    fn spanner_type() -> Type {
        T::spanner_type()
    }
}

impl<T: ToSpanner> ToSpanner for &[T] {
    fn to_spanner(&self) -> Result<Value, Error> {
        let mut elements = Vec::with_capacity(self.len());
        for value in self.iter() {
            elements.push(value.to_spanner()?);
        }
        Ok(Value::Array(T::spanner_type(), elements))
    }

    fn spanner_type() -> Type {
        Type::Array(Box::new(T::spanner_type()))
    }
}

impl<T: ToSpanner> ToSpanner for Vec<T> {
    fn to_spanner(&self) -> Result<Value, Error> {
        self.as_slice().to_spanner()
    }

    fn spanner_type() -> Type {
        Type::Array(Box::new(T::spanner_type()))
    }
}

macro_rules! scalar_binding {
    ($($rust:ty as $variant:ident: |$v:ident| $convert:expr;)+) => {
        $(
            impl ToSpanner for $rust {
                fn to_spanner(&self) -> Result<Value, Error> {
                    let $v = self;
                    Ok(Value::$variant($convert))
                }

                fn spanner_type() -> Type {
                    Type::$variant
                }
            }
        )+
    };
}

scalar_binding! {
    bool as Bool: |v| *v;
    i8 as Int64: |v| i64::from(*v);
    u8 as Int64: |v| i64::from(*v);
    i16 as Int64: |v| i64::from(*v);
    u16 as Int64: |v| i64::from(*v);
    i32 as Int64: |v| i64::from(*v);
    u32 as Int64: |v| i64::from(*v);
    i64 as Int64: |v| *v;
    f64 as Float64: |v| *v;
    String as String: |v| v.clone();
}

// `str` itself is implemented so that string literals bind directly
impl ToSpanner for str {
    fn to_spanner(&self) -> Result<Value, Error> {
        Ok(Value::String(self.to_owned()))
    }

}

impl ToSpanner for &str {
    fn to_spanner(&self) -> Result<Value, Error> {
        (**self).to_spanner()
    }

    fn spanner_type() -> Type {
        Type::String
    }
}

#[cfg(feature = "numeric")]
impl ToSpanner for BigDecimal {
    fn to_spanner(&self) -> Result<Value, Error> {
        Ok(Value::Numeric(self.to_string()))
    }

    fn spanner_type() -> Type {
        Type::Numeric
    }
}
