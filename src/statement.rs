use std::collections::{BTreeMap, HashMap};

use googapis::google::spanner::v1 as proto;

use crate::{Error, ToSpanner, Value};

/// A SQL statement together with its named bind parameters.
///
/// Parameters are referenced in the SQL text with an `@` prefix:
///
/// ```
/// use spanner_reactive::Statement;
///
/// let statement = Statement::new("SELECT * FROM BOOKS WHERE CATEGORY = @category")
///     .bind("category", &100i64)
///     .unwrap();
/// assert_eq!(statement.sql(), "SELECT * FROM BOOKS WHERE CATEGORY = @category");
/// ```
#[derive(Debug, Clone)]
pub struct Statement {
    sql: String,
    params: Vec<(String, Value)>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Binds a value to the named parameter. Fails when the value cannot be
    /// represented as a Spanner value.
    pub fn bind<T>(mut self, name: impl Into<String>, value: &T) -> Result<Self, Error>
    where
        T: ToSpanner + ?Sized,
    {
        let value = value.to_spanner()?;
        self.params.push((name.into(), value));
        Ok(self)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Wire encoding of the bind parameters: the `params` struct and the
    /// accompanying `param_types` map of `ExecuteSqlRequest`.
    pub(crate) fn encoded_params(
        &self,
    ) -> (Option<prost_types::Struct>, HashMap<String, proto::Type>) {
        if self.params.is_empty() {
            return (None, HashMap::new());
        }

        let mut fields = BTreeMap::new();
        let mut param_types = HashMap::new();
        for (name, value) in &self.params {
            param_types.insert(name.clone(), (&value.spanner_type()).into());
            fields.insert(name.clone(), value.clone().into());
        }
        (Some(prost_types::Struct { fields }), param_types)
    }
}

impl From<&Statement> for proto::execute_batch_dml_request::Statement {
    fn from(value: &Statement) -> Self {
        let (params, param_types) = value.encoded_params();
        proto::execute_batch_dml_request::Statement {
            sql: value.sql.clone(),
            params,
            param_types,
        }
    }
}
