//! Statements, bound parameter values, and result sets.

// self
use crate::_prelude::*;

/// Value bound to a statement parameter or returned in a row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum SqlValue {
	/// SQL `NULL`.
	Null,
	/// Boolean (`bit`).
	Bool(bool),
	/// Integer up to 64 bits.
	Int(i64),
	/// Floating point.
	Float(f64),
	/// Unicode text.
	Text(String),
	/// Binary payload.
	Bytes(Vec<u8>),
	/// Timestamp with offset.
	Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
}
impl SqlValue {
	/// Returns `true` for [`SqlValue::Null`].
	pub fn is_null(&self) -> bool {
		matches!(self, Self::Null)
	}

	/// Integer view, if the value is an integer.
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Self::Int(value) => Some(*value),
			_ => None,
		}
	}

	/// Text view, if the value is text.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Text(value) => Some(value),
			_ => None,
		}
	}
}
impl From<bool> for SqlValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}
impl From<i32> for SqlValue {
	fn from(value: i32) -> Self {
		Self::Int(value.into())
	}
}
impl From<i64> for SqlValue {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}
impl From<f64> for SqlValue {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}
impl From<&str> for SqlValue {
	fn from(value: &str) -> Self {
		Self::Text(value.to_owned())
	}
}
impl From<String> for SqlValue {
	fn from(value: String) -> Self {
		Self::Text(value)
	}
}
impl From<Vec<u8>> for SqlValue {
	fn from(value: Vec<u8>) -> Self {
		Self::Bytes(value)
	}
}
impl From<OffsetDateTime> for SqlValue {
	fn from(value: OffsetDateTime) -> Self {
		Self::Timestamp(value)
	}
}
impl<T> From<Option<T>> for SqlValue
where
	T: Into<SqlValue>,
{
	fn from(value: Option<T>) -> Self {
		value.map_or(Self::Null, Into::into)
	}
}

/// Statement text with positionally bound parameters.
///
/// Parameters travel to the driver separately from the text; they are never spliced in.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
	/// Statement text with `?` placeholders.
	pub text: String,
	/// Values bound to the placeholders, in order.
	pub params: Vec<SqlValue>,
}
impl Statement {
	/// Creates a statement without parameters.
	pub fn new(text: impl Into<String>) -> Self {
		Self { text: text.into(), params: Vec::new() }
	}

	/// Appends one bound parameter.
	pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
		self.params.push(value.into());

		self
	}

	/// Replaces all bound parameters.
	pub fn with_params(mut self, params: impl IntoIterator<Item = SqlValue>) -> Self {
		self.params = params.into_iter().collect();

		self
	}
}

/// Rows returned by a statement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
	/// Column names in select-list order.
	pub columns: Vec<String>,
	/// Row values aligned with `columns`.
	pub rows: Vec<Vec<SqlValue>>,
	/// Affected row count reported for DML, if any.
	pub rows_affected: Option<u64>,
}
impl ResultSet {
	/// Creates a result set with the given columns and no rows.
	pub fn with_columns<I, S>(columns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self { columns: columns.into_iter().map(Into::into).collect(), ..Default::default() }
	}

	/// Appends one row.
	pub fn push_row(mut self, row: Vec<SqlValue>) -> Self {
		self.rows.push(row);

		self
	}

	/// Result of a DML statement.
	pub fn affected(count: u64) -> Self {
		Self { rows_affected: Some(count), ..Default::default() }
	}

	/// Value at `row`/`column`, if present.
	pub fn value(&self, row: usize, column: &str) -> Option<&SqlValue> {
		let index = self.columns.iter().position(|name| name == column)?;

		self.rows.get(row)?.get(index)
	}

	/// Returns `true` when no rows were returned.
	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}
}
