use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::schema::{ColumnDef, ColumnType, TargetTableSpec};

/// A source field after coercion. `Absent` is an empty source field, kept
/// distinct from `Invalid` (text that failed coercion) so a nullable column
/// can take the destination's default while a malformed value rejects the
/// whole row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Timestamp(NaiveDateTime),
    Absent,
    Invalid(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            FieldValue::Absent => Ok(()),
            FieldValue::Invalid(raw) => f.write_str(raw),
        }
    }
}

/// One row after type coercion and validation, ready for insertion.
/// Values are positionally aligned with the spec's insert columns.
#[derive(Debug, Clone)]
pub struct MappedRecord {
    values: Vec<FieldValue>,
}

impl MappedRecord {
    pub fn new(values: Vec<FieldValue>) -> Self {
        MappedRecord { values }
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Per-row mapping failures. These are recovered: the row is rejected and
/// the load continues.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RowError {
    #[error("expected {expected} fields, found {found}")]
    Arity { expected: usize, found: usize },

    #[error("required column '{column}' has no value")]
    RequiredFieldMissing { column: String },

    #[error("column '{column}': cannot interpret '{value}' as {expected}")]
    TypeCoercion {
        column: String,
        value: String,
        expected: &'static str,
    },
}

impl RowError {
    /// Stable label recorded in load reports.
    pub fn error_type(&self) -> &'static str {
        match self {
            RowError::Arity { .. } => "arity",
            RowError::RequiredFieldMissing { .. } => "required_field_missing",
            RowError::TypeCoercion { .. } => "type_coercion",
        }
    }
}

/// Map one raw source row onto the spec's insert columns.
///
/// The row is rejected outright on a field-count mismatch (never truncated
/// or padded), on an absent value in a required column, and on any value the
/// declared type cannot absorb. The whole row is rejected even when only one
/// field is bad.
pub fn map_row(fields: &[&str], spec: &TargetTableSpec) -> Result<MappedRecord, RowError> {
    let columns = spec.insert_columns();
    if fields.len() != columns.len() {
        return Err(RowError::Arity {
            expected: columns.len(),
            found: fields.len(),
        });
    }

    let mut values = Vec::with_capacity(columns.len());
    for (column, raw) in columns.iter().zip(fields) {
        match coerce(raw, column) {
            FieldValue::Absent if !column.nullable => {
                return Err(RowError::RequiredFieldMissing {
                    column: column.name.clone(),
                });
            }
            FieldValue::Invalid(value) => {
                return Err(RowError::TypeCoercion {
                    column: column.name.clone(),
                    value,
                    expected: column.col_type.name(),
                });
            }
            value => values.push(value),
        }
    }

    Ok(MappedRecord { values })
}

/// Coerce one raw field to its column's declared type. Total: failures come
/// back as `FieldValue::Invalid`, never as an error. An empty field is
/// `Absent` regardless of type; whitespace-only text is not absent.
pub fn coerce(raw: &str, column: &ColumnDef) -> FieldValue {
    if raw.is_empty() {
        return FieldValue::Absent;
    }

    match column.col_type {
        ColumnType::Text => FieldValue::Text(raw.to_string()),
        ColumnType::Integer => match raw.trim().parse::<i64>() {
            Ok(n) => FieldValue::Integer(n),
            Err(_) => FieldValue::Invalid(raw.to_string()),
        },
        ColumnType::Timestamp => match parse_timestamp(raw.trim()) {
            Some(ts) => FieldValue::Timestamp(ts),
            None => FieldValue::Invalid(raw.to_string()),
        },
    }
}

/// Parse the timestamp shapes the historical extracts carry: RFC 3339
/// (offsets normalized to UTC), `T`- or space-separated date-times with
/// optional fractional seconds, and bare dates taken as midnight.
fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }

    let formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for format in &formats {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts);
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TargetTableSpec;

    fn hires_spec() -> TargetTableSpec {
        TargetTableSpec::catalog("hired_employees").unwrap()
    }

    fn spec_with(target: &[&str], insert: &[&str]) -> TargetTableSpec {
        let target: Vec<String> = target.iter().map(|s| s.to_string()).collect();
        let insert: Vec<String> = insert.iter().map(|s| s.to_string()).collect();
        TargetTableSpec::from_column_lists("t", &target, &insert).unwrap()
    }

    #[test]
    fn test_timestamp_coercion() {
        let col = ColumnDef::required("datetime", ColumnType::Timestamp);
        let test_cases = [
            // (input, expected normalized form, description)
            ("2021-11-07T02:48:42Z", "2021-11-07 02:48:42", "RFC 3339 UTC"),
            (
                "2021-11-07T02:48:42+02:00",
                "2021-11-07 00:48:42",
                "RFC 3339 offset normalized",
            ),
            ("2021-11-07T02:48:42", "2021-11-07 02:48:42", "ISO 8601"),
            (
                "2021-11-07T02:48:42.123",
                "2021-11-07 02:48:42",
                "fractional seconds",
            ),
            ("2021-11-07 02:48:42", "2021-11-07 02:48:42", "space separated"),
            ("2021-11-07 02:48", "2021-11-07 02:48:00", "without seconds"),
            ("2021-11-07", "2021-11-07 00:00:00", "bare date"),
            (" 2021-11-07T02:48:42Z ", "2021-11-07 02:48:42", "padded"),
        ];

        for (input, expected, description) in test_cases {
            match coerce(input, &col) {
                FieldValue::Timestamp(ts) => assert_eq!(
                    ts.format("%Y-%m-%d %H:%M:%S").to_string(),
                    expected,
                    "failed: {}",
                    description
                ),
                other => panic!("{}: expected timestamp, got {:?}", description, other),
            }
        }
    }

    #[test]
    fn test_timestamp_rejects_garbage() {
        let col = ColumnDef::required("datetime", ColumnType::Timestamp);
        for input in ["x", "2021-13-01T00:00:00Z", "tomorrow", "2021/11/07", "42"] {
            assert!(
                matches!(coerce(input, &col), FieldValue::Invalid(_)),
                "expected invalid for '{}'",
                input
            );
        }
    }

    #[test]
    fn test_integer_coercion() {
        let col = ColumnDef::required("id", ColumnType::Integer);
        assert_eq!(coerce("4535", &col), FieldValue::Integer(4535));
        assert_eq!(coerce(" 42 ", &col), FieldValue::Integer(42));
        assert_eq!(coerce("-7", &col), FieldValue::Integer(-7));
        assert!(matches!(coerce("4.5", &col), FieldValue::Invalid(_)));
        assert!(matches!(coerce("abc", &col), FieldValue::Invalid(_)));
        assert!(matches!(coerce(" ", &col), FieldValue::Invalid(_)));
    }

    #[test]
    fn test_empty_field_is_absent_for_every_type() {
        for col_type in [ColumnType::Text, ColumnType::Integer, ColumnType::Timestamp] {
            let col = ColumnDef::nullable("c", col_type);
            assert_eq!(coerce("", &col), FieldValue::Absent);
        }
    }

    #[test]
    fn test_map_row_happy_path() {
        let spec = hires_spec();
        let record = map_row(
            &["4535", "Marcelo Spinka", "2021-07-27T16:02:08Z", "1", "52"],
            &spec,
        )
        .unwrap();

        assert_eq!(record.len(), 5);
        assert_eq!(record.values()[0], FieldValue::Integer(4535));
        assert_eq!(
            record.values()[1],
            FieldValue::Text("Marcelo Spinka".to_string())
        );
        assert!(matches!(record.values()[2], FieldValue::Timestamp(_)));
    }

    #[test]
    fn test_map_row_arity_mismatch() {
        let spec = hires_spec();
        let err = map_row(&["4535", "Marcelo Spinka"], &spec).unwrap_err();
        assert_eq!(
            err,
            RowError::Arity {
                expected: 5,
                found: 2
            }
        );
        assert_eq!(err.error_type(), "arity");
    }

    #[test]
    fn test_map_row_required_field_missing() {
        let spec = hires_spec();
        let err = map_row(&["4535", "Marcelo Spinka", "", "1", "52"], &spec).unwrap_err();
        assert!(matches!(
            err,
            RowError::RequiredFieldMissing { ref column } if column == "datetime"
        ));
        assert_eq!(err.error_type(), "required_field_missing");
    }

    #[test]
    fn test_map_row_coercion_failure_rejects_whole_row() {
        let spec = hires_spec();
        let err = map_row(&["4535", "Marcelo Spinka", "not-a-date", "1", "52"], &spec).unwrap_err();
        assert!(matches!(
            err,
            RowError::TypeCoercion { ref column, .. } if column == "datetime"
        ));
    }

    #[test]
    fn test_nullable_column_accepts_absent() {
        let spec = spec_with(&["name:text", "hired_at:timestamp?"], &["name", "hired_at"]);
        let record = map_row(&["Eng", ""], &spec).unwrap();
        assert_eq!(record.values()[1], FieldValue::Absent);
    }

    #[test]
    fn test_required_and_coercion_examples() {
        // One row missing a required timestamp, one row with a malformed one.
        let spec = spec_with(&["name:text", "hired_at:timestamp"], &["name", "hired_at"]);
        assert!(matches!(
            map_row(&["Eng", ""], &spec),
            Err(RowError::RequiredFieldMissing { .. })
        ));
        assert!(matches!(
            map_row(&["Sales", "x"], &spec),
            Err(RowError::TypeCoercion { .. })
        ));
    }

    #[test]
    fn test_map_row_is_deterministic() {
        let spec = hires_spec();
        let fields = ["1", "A", "2021-01-01T00:00:00Z", "2", "3"];
        let first = map_row(&fields, &spec).unwrap();
        let second = map_row(&fields, &spec).unwrap();
        assert_eq!(first.values(), second.values());
    }
}
