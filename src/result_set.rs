use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use googapis::google::spanner::v1 as proto;
use prost_types::value::Kind;
use prost_types::Value as WireValue;

use crate::connection::PartialResultStream;
use crate::{Error, FromSpanner, StructType, Value};

/// A trait implemented by types that can index into a row.
///
/// Only the crate itself implements this.
pub trait RowIndex: private::Sealed {
    #[doc(hidden)]
    fn index(&self, struct_type: &StructType) -> Option<usize>;
}

/// Allows indexing into a row using a column position.
impl RowIndex for usize {
    fn index(&self, struct_type: &StructType) -> Option<usize> {
        (*self < struct_type.fields().len()).then(|| *self)
    }
}

/// Allows indexing into a row using a column name.
impl RowIndex for str {
    fn index(&self, struct_type: &StructType) -> Option<usize> {
        struct_type.field_index(self)
    }
}

impl<'a, T> RowIndex for &'a T
where
    T: RowIndex + ?Sized,
{
    fn index(&self, struct_type: &StructType) -> Option<usize> {
        <T as RowIndex>::index(self, struct_type)
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for usize {}
    impl Sealed for str {}
    impl<'a, T> Sealed for &'a T where T: ?Sized + Sealed {}
}

/// One row of a result set, copied out of the wire cursor.
///
/// Every row of a result set shares the same [`StructType`].
pub struct Row {
    row_type: Arc<StructType>,
    columns: Vec<Value>,
}

impl Row {
    /// Returns the structure of this row (field names and types).
    pub fn row_type(&self) -> &StructType {
        &self.row_type
    }

    /// Returns true when this row has no fields.
    pub fn is_empty(&self) -> bool {
        self.row_type.fields().is_empty()
    }

    /// Returns the converted value of the specified column.
    ///
    /// An error is returned if the requested column does not exist or if the
    /// decoding of the value returns an error.
    pub fn get<'a, T, R>(&'a self, row_index: R) -> Result<T, Error>
    where
        T: FromSpanner<'a>,
        R: RowIndex + std::fmt::Display,
    {
        self.get_impl(&row_index)
    }

    /// Returns the converted value of the specified column.
    ///
    /// # Panics
    ///
    /// Panics if the specified index does not exist or if the value cannot be
    /// converted to the requested type.
    pub fn get_unchecked<'a, T, R>(&'a self, row_index: R) -> T
    where
        T: FromSpanner<'a>,
        R: RowIndex + std::fmt::Display,
    {
        match self.get_impl(&row_index) {
            Ok(value) => value,
            Err(error) => panic!(
                "unexpected error while reading column {}: {}",
                row_index, error
            ),
        }
    }

    fn get_impl<'a, T, R>(&'a self, row_index: &R) -> Result<T, Error>
    where
        T: FromSpanner<'a>,
        R: RowIndex + std::fmt::Display,
    {
        match row_index.index(&self.row_type) {
            None => Err(Error::Codec(format!("no such column {}", row_index))),
            Some(index) => <T as FromSpanner>::from_nullable(&self.columns[index]),
        }
    }
}

/// Prints the row's type, but omits the values.
impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Row")
            .field("columns", &self.row_type)
            .finish()
    }
}

/// One unit of progress of a [`RowCursor`].
#[derive(Debug)]
pub(crate) enum CursorStep {
    /// The stream is exhausted or the cursor was cancelled; no further rows.
    Done,
    /// A chunk was consumed without completing a row.
    NotReady,
    Row(Row),
}

/// Pull cursor over a `PartialResultSet` stream.
///
/// Spanner streams *values*, not rows: each chunk carries a flat value list
/// and may end mid-value (`chunked_value`), in which case the trailing value
/// is completed by the head of the next chunk. The cursor carries those
/// partial values across chunks and hands out whole decoded rows.
pub(crate) struct RowCursor {
    stream: Option<PartialResultStream>,
    row_type: Option<Arc<StructType>>,
    decoded: VecDeque<Row>,
    partial_row: Vec<WireValue>,
    chunked_value: Option<WireValue>,
}

impl RowCursor {
    pub(crate) fn new(stream: PartialResultStream) -> Self {
        Self {
            stream: Some(stream),
            row_type: None,
            decoded: VecDeque::new(),
            partial_row: Vec::new(),
            chunked_value: None,
        }
    }

    /// Stops the server-side stream. No further rows are produced, including
    /// rows already decoded but not yet handed out.
    pub(crate) fn cancel(&mut self) {
        self.stream = None;
        self.decoded.clear();
    }

    /// Advances the cursor by at most one underlying chunk.
    pub(crate) async fn step(&mut self) -> Result<CursorStep, Error> {
        if let Some(row) = self.decoded.pop_front() {
            return Ok(CursorStep::Row(row));
        }

        let stream = match self.stream.as_mut() {
            None => return Ok(CursorStep::Done),
            Some(stream) => stream,
        };

        match stream.next().await {
            None => {
                self.stream = None;
                if !self.partial_row.is_empty() || self.chunked_value.is_some() {
                    return Err(Error::Codec(
                        "result stream ended in the middle of a row".to_string(),
                    ));
                }
                Ok(CursorStep::Done)
            }
            Some(Err(status)) => {
                self.stream = None;
                Err(status.into())
            }
            Some(Ok(chunk)) => {
                self.absorb(chunk)?;
                match self.decoded.pop_front() {
                    Some(row) => Ok(CursorStep::Row(row)),
                    None => Ok(CursorStep::NotReady),
                }
            }
        }
    }

    fn absorb(&mut self, mut chunk: proto::PartialResultSet) -> Result<(), Error> {
        let row_type = match &self.row_type {
            Some(row_type) => Arc::clone(row_type),
            None => {
                let struct_type = chunk
                    .metadata
                    .take()
                    .and_then(|metadata| metadata.row_type)
                    .ok_or_else(|| {
                        Error::Codec("first result chunk is missing row type metadata".to_string())
                    })?;
                let row_type = Arc::new(StructType::try_from(struct_type)?);
                self.row_type = Some(Arc::clone(&row_type));
                row_type
            }
        };

        let mut values = chunk.values;

        // complete the value the previous chunk left unfinished
        if let Some(pending) = self.chunked_value.take() {
            match values.first_mut() {
                Some(first) => merge_chunked_value(pending, first)?,
                // chunk without values; keep carrying
                None => self.chunked_value = Some(pending),
            }
        }
        if chunk.chunked_value {
            self.chunked_value = values.pop();
        }

        let width = row_type.fields().len();
        if width == 0 {
            if values.is_empty() {
                return Ok(());
            }
            return Err(Error::Codec(
                "result chunk carries values for a zero-column row type".to_string(),
            ));
        }

        for value in values {
            self.partial_row.push(value);
            if self.partial_row.len() == width {
                let columns = std::mem::take(&mut self.partial_row)
                    .into_iter()
                    .zip(row_type.types())
                    .map(|(value, tpe)| Value::decode(tpe, value))
                    .collect::<Result<Vec<Value>, Error>>()?;
                self.decoded.push_back(Row {
                    row_type: Arc::clone(&row_type),
                    columns,
                });
            }
        }

        Ok(())
    }
}

/// Completes `target`, the first value of a chunk, with `previous`, the
/// unfinished trailing value of the chunk before it.
///
/// Only strings and lists can be split across chunks; for lists the boundary
/// elements may themselves be split, recursively.
fn merge_chunked_value(previous: WireValue, target: &mut WireValue) -> Result<(), Error> {
    match (previous.kind, target.kind.as_mut()) {
        (Some(Kind::StringValue(mut head)), Some(Kind::StringValue(tail))) => {
            head.push_str(tail);
            *tail = head;
            Ok(())
        }
        (Some(Kind::ListValue(head)), Some(Kind::ListValue(tail))) => {
            let mut merged = head.values;
            let mut rest = std::mem::take(&mut tail.values).into_iter();

            // the boundary pair may need merging in turn; scalars are never
            // split, so they just concatenate
            match merged.pop() {
                Some(last)
                    if matches!(
                        last.kind,
                        Some(Kind::StringValue(_)) | Some(Kind::ListValue(_))
                    ) =>
                {
                    match rest.next() {
                        Some(mut boundary) => {
                            merge_chunked_value(last, &mut boundary)?;
                            merged.push(boundary);
                        }
                        None => merged.push(last),
                    }
                }
                Some(last) => merged.push(last),
                None => {}
            }
            merged.extend(rest);
            tail.values = merged;
            Ok(())
        }
        _ => Err(Error::Codec(
            "mismatched kinds in chunked value".to_string(),
        )),
    }
}
