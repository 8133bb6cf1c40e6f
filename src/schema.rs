use std::fmt;

use thiserror::Error;

/// Declared type of a destination column. Source fields are coerced to one
/// of these before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Timestamp,
}

impl ColumnType {
    /// Parse a type name as written in a column list (`id:int`).
    pub fn parse(s: &str) -> Option<ColumnType> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "string" | "str" | "varchar" => Some(ColumnType::Text),
            "int" | "integer" | "bigint" => Some(ColumnType::Integer),
            "timestamp" | "datetime" => Some(ColumnType::Timestamp),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A column as it exists in the destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn required(name: &str, col_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            col_type,
            nullable: false,
        }
    }

    pub fn nullable(name: &str, col_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            col_type,
            nullable: true,
        }
    }
}

/// Errors raised while constructing a [`TargetTableSpec`]. These are fatal:
/// a load never starts with a bad descriptor.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("target column list is empty")]
    EmptyTargetColumns,

    #[error("insert column list is empty")]
    EmptyInsertColumns,

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("insert column '{0}' is not a target column")]
    NotInTarget(String),

    #[error("insert columns must follow target column order (column '{0}' is out of order)")]
    OutOfOrder(String),

    #[error("column '{column}' has unknown type '{type_name}'")]
    UnknownType { column: String, type_name: String },

    #[error("invalid column spec '{0}'")]
    InvalidColumnSpec(String),

    #[error("no built-in descriptor for table '{0}'")]
    UnknownTable(String),
}

/// Schema descriptor binding source field order to destination columns.
///
/// `target_columns` is the full ordered column list as it exists in the
/// destination, including generated ones. `insert_columns` is the ordered
/// subset supplied by the source file, one per source field, in source field
/// order. Both are validated once at construction; the mapper and loader
/// treat a constructed spec as trusted.
#[derive(Debug, Clone)]
pub struct TargetTableSpec {
    table_name: String,
    target_columns: Vec<ColumnDef>,
    insert_columns: Vec<ColumnDef>,
}

impl TargetTableSpec {
    /// Build a spec from full column definitions and the insertable subset
    /// by name. Fails when either list is empty, a name is duplicated, an
    /// insert column is missing from the target list, or the insert columns
    /// do not preserve target order.
    pub fn new(
        table_name: &str,
        target_columns: Vec<ColumnDef>,
        insert_names: &[String],
    ) -> Result<Self, SchemaError> {
        if target_columns.is_empty() {
            return Err(SchemaError::EmptyTargetColumns);
        }
        if insert_names.is_empty() {
            return Err(SchemaError::EmptyInsertColumns);
        }

        for (i, col) in target_columns.iter().enumerate() {
            if target_columns[..i].iter().any(|c| c.name == col.name) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
        }

        // Resolve insert names against the target list, enforcing that they
        // form an ordered subsequence of it.
        let mut insert_columns = Vec::with_capacity(insert_names.len());
        let mut last_index: Option<usize> = None;
        for name in insert_names {
            if insert_columns.iter().any(|c: &ColumnDef| &c.name == name) {
                return Err(SchemaError::DuplicateColumn(name.clone()));
            }
            let index = target_columns
                .iter()
                .position(|c| &c.name == name)
                .ok_or_else(|| SchemaError::NotInTarget(name.clone()))?;
            if let Some(last) = last_index {
                if index < last {
                    return Err(SchemaError::OutOfOrder(name.clone()));
                }
            }
            last_index = Some(index);
            insert_columns.push(target_columns[index].clone());
        }

        Ok(Self {
            table_name: table_name.to_string(),
            target_columns,
            insert_columns,
        })
    }

    /// Build a spec from call-time column lists. Target entries use
    /// `name[:type][?]` form (`type` one of text/int/timestamp, default
    /// text; trailing `?` marks the column nullable). Insert entries are
    /// bare names.
    pub fn from_column_lists(
        table_name: &str,
        target_specs: &[String],
        insert_names: &[String],
    ) -> Result<Self, SchemaError> {
        let target_columns = target_specs
            .iter()
            .map(|s| parse_column_spec(s))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(table_name, target_columns, insert_names)
    }

    /// Look up the built-in descriptor for one of the historical tables.
    /// A qualified name (`migration_tables.hired_employees`) resolves by its
    /// final segment; the full name is kept for generated SQL.
    pub fn catalog(table_name: &str) -> Result<Self, SchemaError> {
        let base = table_name.rsplit('.').next().unwrap_or(table_name);
        let columns = match base {
            "departments" => vec![
                ColumnDef::required("id", ColumnType::Integer),
                ColumnDef::required("department", ColumnType::Text),
            ],
            "jobs" => vec![
                ColumnDef::required("id", ColumnType::Integer),
                ColumnDef::required("job", ColumnType::Text),
            ],
            "hired_employees" => vec![
                ColumnDef::required("id", ColumnType::Integer),
                ColumnDef::required("name", ColumnType::Text),
                ColumnDef::required("datetime", ColumnType::Timestamp),
                ColumnDef::required("department_id", ColumnType::Integer),
                ColumnDef::required("job_id", ColumnType::Integer),
            ],
            _ => return Err(SchemaError::UnknownTable(table_name.to_string())),
        };
        let insert_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        Self::new(table_name, columns, &insert_names)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn target_columns(&self) -> &[ColumnDef] {
        &self.target_columns
    }

    pub fn insert_columns(&self) -> &[ColumnDef] {
        &self.insert_columns
    }

    pub fn insert_column_names(&self) -> Vec<&str> {
        self.insert_columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Parse one `name[:type][?]` column entry.
fn parse_column_spec(spec: &str) -> Result<ColumnDef, SchemaError> {
    let trimmed = spec.trim();
    let (body, nullable) = match trimmed.strip_suffix('?') {
        Some(body) => (body, true),
        None => (trimmed, false),
    };

    let (name, type_name) = match body.split_once(':') {
        Some((name, ty)) => (name.trim(), Some(ty.trim())),
        None => (body, None),
    };

    if name.is_empty() {
        return Err(SchemaError::InvalidColumnSpec(spec.to_string()));
    }

    let col_type = match type_name {
        None | Some("") => ColumnType::Text,
        Some(ty) => ColumnType::parse(ty).ok_or_else(|| SchemaError::UnknownType {
            column: name.to_string(),
            type_name: ty.to_string(),
        })?,
    };

    Ok(ColumnDef {
        name: name.to_string(),
        col_type,
        nullable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_column_specs() {
        let test_cases = [
            // (input, name, type, nullable)
            ("id:int", "id", ColumnType::Integer, false),
            ("id:integer", "id", ColumnType::Integer, false),
            ("name:text?", "name", ColumnType::Text, true),
            ("datetime:timestamp", "datetime", ColumnType::Timestamp, false),
            ("hired_at:datetime?", "hired_at", ColumnType::Timestamp, true),
            ("comment", "comment", ColumnType::Text, false),
            ("comment?", "comment", ColumnType::Text, true),
            (" padded : int ", "padded", ColumnType::Integer, false),
        ];

        for (input, name, col_type, nullable) in test_cases {
            let col = parse_column_spec(input).unwrap();
            assert_eq!(col.name, name, "name for '{}'", input);
            assert_eq!(col.col_type, col_type, "type for '{}'", input);
            assert_eq!(col.nullable, nullable, "nullable for '{}'", input);
        }
    }

    #[test]
    fn test_parse_column_spec_rejects_bad_input() {
        assert!(matches!(
            parse_column_spec("id:float"),
            Err(SchemaError::UnknownType { .. })
        ));
        assert!(matches!(
            parse_column_spec(":int"),
            Err(SchemaError::InvalidColumnSpec(_))
        ));
        assert!(matches!(
            parse_column_spec("  "),
            Err(SchemaError::InvalidColumnSpec(_))
        ));
    }

    #[test]
    fn test_spec_accepts_insert_subset_in_order() {
        let spec = TargetTableSpec::from_column_lists(
            "events",
            &strings(&["id:int", "name:text", "created_at:timestamp?", "score:int?"]),
            &strings(&["name", "score"]),
        )
        .unwrap();

        assert_eq!(spec.target_columns().len(), 4);
        assert_eq!(spec.insert_column_names(), vec!["name", "score"]);
        assert_eq!(spec.insert_columns()[1].col_type, ColumnType::Integer);
        assert!(spec.insert_columns()[1].nullable);
    }

    #[test]
    fn test_spec_rejects_empty_lists() {
        assert!(matches!(
            TargetTableSpec::from_column_lists("t", &[], &strings(&["a"])),
            Err(SchemaError::EmptyTargetColumns)
        ));
        assert!(matches!(
            TargetTableSpec::from_column_lists("t", &strings(&["a"]), &[]),
            Err(SchemaError::EmptyInsertColumns)
        ));
    }

    #[test]
    fn test_spec_rejects_unknown_insert_column() {
        let err = TargetTableSpec::from_column_lists(
            "t",
            &strings(&["a", "b"]),
            &strings(&["a", "missing"]),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::NotInTarget(name) if name == "missing"));
    }

    #[test]
    fn test_spec_rejects_out_of_order_insert_columns() {
        let err = TargetTableSpec::from_column_lists(
            "t",
            &strings(&["a", "b", "c"]),
            &strings(&["c", "a"]),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::OutOfOrder(name) if name == "a"));
    }

    #[test]
    fn test_spec_rejects_duplicates() {
        assert!(matches!(
            TargetTableSpec::from_column_lists("t", &strings(&["a", "a"]), &strings(&["a"])),
            Err(SchemaError::DuplicateColumn(_))
        ));
        assert!(matches!(
            TargetTableSpec::from_column_lists("t", &strings(&["a", "b"]), &strings(&["a", "a"])),
            Err(SchemaError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn test_catalog_hired_employees() {
        let spec = TargetTableSpec::catalog("hired_employees").unwrap();
        assert_eq!(spec.table_name(), "hired_employees");
        assert_eq!(
            spec.insert_column_names(),
            vec!["id", "name", "datetime", "department_id", "job_id"]
        );
        assert_eq!(spec.insert_columns()[2].col_type, ColumnType::Timestamp);
        assert!(spec.insert_columns().iter().all(|c| !c.nullable));
    }

    #[test]
    fn test_catalog_resolves_qualified_names() {
        let spec = TargetTableSpec::catalog("migration_tables.departments").unwrap();
        assert_eq!(spec.table_name(), "migration_tables.departments");
        assert_eq!(spec.insert_column_names(), vec!["id", "department"]);
    }

    #[test]
    fn test_catalog_unknown_table() {
        assert!(matches!(
            TargetTableSpec::catalog("payroll"),
            Err(SchemaError::UnknownTable(_))
        ));
    }
}
