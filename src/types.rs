use std::convert::TryFrom;

use googapis::google::spanner::v1 as proto;
use proto::TypeCode;

use crate::Error;

/// The shape shared by every row of a result set: ordered fields, each with
/// an optional name.
///
/// Expression columns without an alias have no name and can only be
/// addressed by position.
#[derive(Clone, Debug, PartialEq)]
pub struct StructType(pub Vec<(Option<String>, Type)>);

impl StructType {
    pub fn fields(&self) -> &[(Option<String>, Type)] {
        &self.0
    }

    /// Position of the first field carrying the given name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.0
            .iter()
            .position(|(field, _)| field.as_deref() == Some(name))
    }

    pub fn types(&self) -> impl Iterator<Item = &Type> {
        self.0.iter().map(|(_, tpe)| tpe)
    }
}

/// A Cloud Spanner column type.
// https://cloud.google.com/spanner/docs/reference/rest/v1/TypeCode
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Bool,
    Int64,
    Float64,
    String,
    Bytes,
    Json,
    Numeric,
    Timestamp,
    Date,
    Array(Box<Type>),
    Struct(StructType),
}

impl Type {
    pub fn array(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    pub fn struct_of(fields: Vec<(&str, Type)>) -> Self {
        Type::Struct(StructType(
            fields
                .into_iter()
                .map(|(name, tpe)| (Some(name.to_string()), tpe))
                .collect(),
        ))
    }
}

impl TryFrom<&proto::Type> for Type {
    type Error = Error;

    fn try_from(value: &proto::Type) -> Result<Self, Self::Error> {
        let code = TypeCode::from_i32(value.code)
            .ok_or_else(|| Error::Codec(format!("unknown type code {}", value.code)))?;

        Ok(match code {
            TypeCode::Bool => Type::Bool,
            TypeCode::Int64 => Type::Int64,
            TypeCode::Float64 => Type::Float64,
            TypeCode::String => Type::String,
            TypeCode::Bytes => Type::Bytes,
            TypeCode::Json => Type::Json,
            TypeCode::Numeric => Type::Numeric,
            TypeCode::Timestamp => Type::Timestamp,
            TypeCode::Date => Type::Date,
            TypeCode::Array => {
                let element = value.array_element_type.as_deref().ok_or_else(|| {
                    Error::Codec("ARRAY type is missing its element type".to_string())
                })?;
                Type::Array(Box::new(element.try_into()?))
            }
            TypeCode::Struct => {
                let fields = value.struct_type.clone().ok_or_else(|| {
                    Error::Codec("STRUCT type is missing its field list".to_string())
                })?;
                Type::Struct(fields.try_into()?)
            }
            TypeCode::Unspecified => {
                return Err(Error::Codec("type code is unspecified".to_string()))
            }
        })
    }
}

impl TryFrom<proto::Type> for Type {
    type Error = Error;

    fn try_from(value: proto::Type) -> Result<Self, Self::Error> {
        Type::try_from(&value)
    }
}

impl From<&Type> for proto::Type {
    fn from(value: &Type) -> Self {
        let mut encoded = proto::Type {
            code: TypeCode::Unspecified as i32,
            array_element_type: None,
            struct_type: None,
        };
        encoded.code = match value {
            Type::Bool => TypeCode::Bool,
            Type::Int64 => TypeCode::Int64,
            Type::Float64 => TypeCode::Float64,
            Type::String => TypeCode::String,
            Type::Bytes => TypeCode::Bytes,
            Type::Json => TypeCode::Json,
            Type::Numeric => TypeCode::Numeric,
            Type::Timestamp => TypeCode::Timestamp,
            Type::Date => TypeCode::Date,
            Type::Array(element) => {
                encoded.array_element_type = Some(Box::new(element.as_ref().into()));
                TypeCode::Array
            }
            Type::Struct(fields) => {
                encoded.struct_type = Some(fields.into());
                TypeCode::Struct
            }
        } as i32;
        encoded
    }
}

impl TryFrom<proto::StructType> for StructType {
    type Error = Error;

    fn try_from(value: proto::StructType) -> Result<Self, Self::Error> {
        let mut fields = Vec::with_capacity(value.fields.len());
        for field in value.fields {
            let tpe = match &field.r#type {
                Some(tpe) => Type::try_from(tpe)?,
                None => {
                    return Err(Error::Codec(format!(
                        "struct field {:?} is missing its type",
                        field.name
                    )))
                }
            };
            let name = (!field.name.is_empty()).then(|| field.name);
            fields.push((name, tpe));
        }
        Ok(StructType(fields))
    }
}

impl From<&StructType> for proto::StructType {
    fn from(value: &StructType) -> Self {
        proto::StructType {
            fields: value
                .0
                .iter()
                .map(|(name, tpe)| proto::struct_type::Field {
                    name: name.clone().unwrap_or_default(),
                    r#type: Some(tpe.into()),
                })
                .collect(),
        }
    }
}
