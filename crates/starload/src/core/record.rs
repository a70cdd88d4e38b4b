//! One row of a resolved schema.

use std::sync::Arc;

use super::schema::ResolvedSchema;
use super::value::SqlValue;
use crate::error::{LoadError, Result};

/// A closed name-to-value mapping over a schema's columns.
///
/// Every column of the schema has a slot, initially NULL. Access by a name
/// the schema does not declare fails with [`LoadError::KeyNotFound`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<ResolvedSchema>,
    values: Vec<SqlValue<'static>>,
}

impl Record {
    pub fn new(schema: Arc<ResolvedSchema>) -> Self {
        let values = vec![SqlValue::Null; schema.columns.len()];
        Self { schema, values }
    }

    /// Build a record from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(schema: Arc<ResolvedSchema>, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<SqlValue<'static>>,
    {
        let mut record = Self::new(schema);
        for (name, value) in pairs {
            record.set(name.as_ref(), value)?;
        }
        Ok(record)
    }

    pub fn schema(&self) -> &Arc<ResolvedSchema> {
        &self.schema
    }

    pub fn get(&self, column: &str) -> Result<&SqlValue<'static>> {
        let idx = self.index_of(column)?;
        Ok(&self.values[idx])
    }

    pub fn set(&mut self, column: &str, value: impl Into<SqlValue<'static>>) -> Result<()> {
        let idx = self.index_of(column)?;
        self.values[idx] = value.into();
        Ok(())
    }

    /// Values in schema column order.
    pub fn values(&self) -> &[SqlValue<'static>] {
        &self.values
    }

    /// `(column, value)` pairs for the columns that go into inserts.
    pub fn insert_values(&self) -> impl Iterator<Item = (&super::column::Column, &SqlValue<'static>)> {
        self.schema
            .columns
            .iter()
            .zip(self.values.iter())
            .filter(|(c, _)| !c.is_auto_generated())
    }

    fn index_of(&self, column: &str) -> Result<usize> {
        self.schema
            .position(column)
            .ok_or_else(|| LoadError::key_not_found(&self.schema.table_name, column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::column::{Column, ColumnType};
    use crate::core::schema::{SchemaDef, SchemaRole};

    fn schema() -> Arc<ResolvedSchema> {
        Arc::new(
            SchemaDef::new("Journey", SchemaRole::Table)
                .column(Column::new("ring", ColumnType::Text))
                .column(Column::metric("fellowship_count", ColumnType::Integer))
                .resolve()
                .unwrap(),
        )
    }

    #[test]
    fn test_new_record_is_all_null() {
        let record = Record::new(schema());
        assert!(record.values().iter().all(SqlValue::is_null));
    }

    #[test]
    fn test_get_and_set_by_name() {
        let mut record = Record::new(schema());
        record.set("ring", "One Ring").unwrap();
        record.set("fellowship_count", 9).unwrap();
        assert_eq!(record.get("ring").unwrap(), &SqlValue::from("One Ring".to_string()));
        assert_eq!(record.get("fellowship_count").unwrap(), &SqlValue::I64(9));
    }

    #[test]
    fn test_unknown_column_is_key_not_found() {
        let mut record = Record::new(schema());
        let err = record.set("palantir", 1).unwrap_err();
        assert!(matches!(err, LoadError::KeyNotFound { ref column, .. } if column == "palantir"));
        assert!(record.get("palantir").is_err());
    }

    #[test]
    fn test_insert_values_skip_auto_columns() {
        let record = Record::from_pairs(schema(), [("ring", "Narya")]).unwrap();
        let names: Vec<&str> = record.insert_values().map(|(c, _)| c.name.as_str()).collect();
        assert_eq!(names, vec!["ring", "fellowship_count"]);
    }
}
