//! SQL generation for resolved schemas.
//!
//! DDL comes straight from the schema's columns and options. Inserts are
//! split into an [`InsertTemplate`] (the fixed statement head) and rendered
//! row tuples, so the batch loader can size and regroup rows freely.

use chrono::NaiveDateTime;

use crate::core::identifier::quote_ident;
use crate::core::value::DATETIME_FORMAT;
use crate::core::{Column, ColumnType, Record, ResolvedSchema, SqlValue, APPLICABLE_FROM};
use crate::error::{LoadError, Result};

/// Separator between row tuples of a multi-row insert.
pub const ROW_SEPARATOR: &str = ", ";

/// Name of the unique index dimensions carry over their natural keys.
pub const NATURAL_KEY_INDEX: &str = "natural_key";

/// Indexed prefix length for TEXT natural keys.
const TEXT_KEY_PREFIX: u32 = 255;

/// Fixed head of a multi-row insert statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertTemplate {
    /// `INSERT INTO `table` (`a`, `b`) VALUES `
    pub prefix: String,
    pub separator: &'static str,
}

impl InsertTemplate {
    /// Full statement for the given rendered rows.
    pub fn statement<S: AsRef<str>>(&self, rows: &[S]) -> String {
        let mut sql = String::with_capacity(self.estimate(rows));
        sql.push_str(&self.prefix);
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                sql.push_str(self.separator);
            }
            sql.push_str(row.as_ref());
        }
        sql
    }

    /// Byte length of [`InsertTemplate::statement`] for these rows, without building it.
    pub fn estimate<S: AsRef<str>>(&self, rows: &[S]) -> usize {
        let body: usize = rows.iter().map(|r| r.as_ref().len()).sum();
        let separators = self.separator.len() * rows.len().saturating_sub(1);
        self.prefix.len() + body + separators
    }
}

/// Renders statements for one resolved schema.
#[derive(Debug, Clone, Copy)]
pub struct SqlGenerator<'a> {
    schema: &'a ResolvedSchema,
}

impl<'a> SqlGenerator<'a> {
    pub fn new(schema: &'a ResolvedSchema) -> Self {
        Self { schema }
    }

    pub fn create_table(&self, if_not_exists: bool) -> Result<String> {
        let verb = if if_not_exists {
            "CREATE TABLE IF NOT EXISTS"
        } else {
            "CREATE TABLE"
        };
        let mut columns = self
            .schema
            .columns
            .iter()
            .map(Column::expression)
            .collect::<Result<Vec<_>>>()?;
        if let Some(key) = self.natural_key()? {
            columns.push(key);
        }

        Ok(format!(
            "{} {} (\n  {}\n){}",
            verb,
            self.schema.quoted_table()?,
            columns.join(",\n  "),
            self.schema.options.to_sql()
        ))
    }

    /// Unique index over the natural keys, so `INSERT IGNORE` skips rows
    /// already loaded. TEXT columns are indexed on a prefix.
    fn natural_key(&self) -> Result<Option<String>> {
        let keys = match self.schema.natural_keys.as_deref() {
            Some(keys) if !keys.is_empty() => keys,
            _ => return Ok(None),
        };
        let parts = keys
            .iter()
            .map(|name| -> Result<String> {
                let quoted = quote_ident(name)?;
                Ok(match self.schema.column(name).map(|c| &c.column_type) {
                    Some(ColumnType::Text) => format!("{}({})", quoted, TEXT_KEY_PREFIX),
                    _ => quoted,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(format!(
            "UNIQUE KEY {} ({})",
            quote_ident(NATURAL_KEY_INDEX)?,
            parts.join(", ")
        )))
    }

    pub fn drop_table(&self, if_exists: bool) -> Result<String> {
        let verb = if if_exists {
            "DROP TABLE IF EXISTS"
        } else {
            "DROP TABLE"
        };
        Ok(format!("{} {}", verb, self.schema.quoted_table()?))
    }

    /// Statement head listing every non-auto column.
    pub fn insert_template(&self) -> Result<InsertTemplate> {
        let columns = self
            .schema
            .insert_columns()
            .map(|c| quote_ident(&c.name))
            .collect::<Result<Vec<_>>>()?;

        Ok(InsertTemplate {
            prefix: format!(
                "{} INTO {} ({}) VALUES ",
                self.schema.role.insert_verb(),
                self.schema.quoted_table()?,
                columns.join(", ")
            ),
            separator: ROW_SEPARATOR,
        })
    }

    /// Render one record as a value tuple.
    ///
    /// Dimension keys with a value become a lookup of the dimension row
    /// current at `as_of`.
    pub fn render_row<F>(&self, record: &Record, literal: &F, as_of: NaiveDateTime) -> Result<String>
    where
        F: Fn(&SqlValue<'_>) -> String,
    {
        let mut parts = Vec::with_capacity(self.schema.columns.len());
        for (column, value) in record.insert_values() {
            let part = match (&column.references, value) {
                (Some(dimension), v) if !v.is_null() => {
                    dimension_lookup(dimension, &column.name, v, literal, as_of)?
                }
                _ => literal(value),
            };
            parts.push(part);
        }
        Ok(format!("({})", parts.join(", ")))
    }

    pub fn render_rows<F>(&self, records: &[Record], literal: &F, as_of: NaiveDateTime) -> Result<Vec<String>>
    where
        F: Fn(&SqlValue<'_>) -> String,
    {
        records
            .iter()
            .map(|r| self.render_row(r, literal, as_of))
            .collect()
    }

    /// One multi-row insert for all records, or `None` when there are none.
    pub fn insert<F>(&self, records: &[Record], literal: &F, as_of: NaiveDateTime) -> Result<Option<String>>
    where
        F: Fn(&SqlValue<'_>) -> String,
    {
        if records.is_empty() {
            return Ok(None);
        }
        let rows = self.render_rows(records, literal, as_of)?;
        Ok(Some(self.insert_template()?.statement(&rows)))
    }
}

/// Scalar subquery selecting the primary key of the dimension row whose
/// natural key matches `value`.
fn dimension_lookup<F>(
    dimension: &ResolvedSchema,
    column: &str,
    value: &SqlValue<'_>,
    literal: &F,
    as_of: NaiveDateTime,
) -> Result<String>
where
    F: Fn(&SqlValue<'_>) -> String,
{
    let keys: Vec<&Column> = dimension
        .columns
        .iter()
        .filter(|c| c.flags.natural_key && c.column_type.accepts(value))
        .collect();
    if keys.is_empty() {
        return Err(LoadError::InvalidValue(format!(
            "{} value {} for '{}' matches no natural key of {}",
            value.kind(),
            value,
            column,
            dimension.name
        )));
    }

    let rendered = literal(value);
    let selector = keys
        .iter()
        .map(|k| -> Result<String> { Ok(format!("{} = {}", quote_ident(&k.name)?, rendered)) })
        .collect::<Result<Vec<_>>>()?
        .join(" OR ");
    let table = dimension.quoted_table()?;
    let pk = quote_ident(&dimension.primary_key)?;

    if dimension.column(APPLICABLE_FROM).is_some() {
        let applicable_from = quote_ident(APPLICABLE_FROM)?;
        let as_of = literal(&SqlValue::text_owned(as_of.format(DATETIME_FORMAT).to_string()));
        Ok(format!(
            "(SELECT {pk} FROM {table} WHERE ({selector}) AND {af} = \
             (SELECT MAX({af}) FROM {table} WHERE ({selector}) AND {af} <= {as_of}) LIMIT 1)",
            pk = pk,
            table = table,
            selector = selector,
            af = applicable_from,
            as_of = as_of,
        ))
    } else {
        Ok(format!(
            "(SELECT {pk} FROM {table} WHERE ({selector}) ORDER BY {pk} DESC LIMIT 1)",
            pk = pk,
            table = table,
            selector = selector,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SchemaDef, SchemaRole};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn as_of() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(3019, 3, 25)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn literal(v: &SqlValue<'_>) -> String {
        v.to_sql_literal()
    }

    fn journey() -> Arc<ResolvedSchema> {
        Arc::new(
            SchemaDef::new("Journey", SchemaRole::Table)
                .column(Column::primary_key("id"))
                .column(Column::new("ring", ColumnType::Text))
                .column(Column::new("checkpoint", ColumnType::Text))
                .column(Column::metric("fellowship_count", ColumnType::Integer))
                .resolve()
                .unwrap(),
        )
    }

    fn ring_dimension() -> Arc<ResolvedSchema> {
        Arc::new(
            SchemaDef::new("RingDimension", SchemaRole::Dimension)
                .column(Column::natural_key("name", ColumnType::Varchar(40)))
                .resolve()
                .unwrap(),
        )
    }

    #[test]
    fn test_create_table() {
        let schema = journey();
        let sql = SqlGenerator::new(&schema).create_table(true).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS `journey` (\n  \
             `id` INT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,\n  \
             `ring` TEXT NOT NULL,\n  \
             `checkpoint` TEXT NOT NULL,\n  \
             `fellowship_count` INT NOT NULL\n) \
             ENGINE=InnoDB CHARSET=utf8 COLLATE=utf8_bin"
        );
        let plain = SqlGenerator::new(&schema).create_table(false).unwrap();
        assert!(plain.starts_with("CREATE TABLE `journey`"));
    }

    #[test]
    fn test_dimension_ddl_has_unique_natural_key() {
        let dim = ring_dimension();
        let sql = SqlGenerator::new(&dim).create_table(true).unwrap();
        assert!(sql.contains(",\n  UNIQUE KEY `natural_key` (`name`)\n) ENGINE=InnoDB"));
        assert!(!sql.contains("(`name`, `applicable_from`)"));
    }

    #[test]
    fn test_text_natural_key_is_prefix_indexed() {
        let dim = SchemaDef::new("BearerDimension", SchemaRole::Dimension)
            .column(Column::natural_key("name", ColumnType::Text))
            .column(Column::natural_key("race", ColumnType::Varchar(20)))
            .resolve()
            .unwrap();
        let sql = SqlGenerator::new(&dim).create_table(false).unwrap();
        assert!(sql.contains("UNIQUE KEY `natural_key` (`name`(255), `race`)"));
    }

    #[test]
    fn test_untracked_natural_keys_have_no_index() {
        let sql = SqlGenerator::new(&journey()).create_table(true).unwrap();
        assert!(!sql.contains("UNIQUE KEY"));
    }

    #[test]
    fn test_drop_table() {
        let schema = journey();
        let generator = SqlGenerator::new(&schema);
        assert_eq!(generator.drop_table(true).unwrap(), "DROP TABLE IF EXISTS `journey`");
        assert_eq!(generator.drop_table(false).unwrap(), "DROP TABLE `journey`");
    }

    #[test]
    fn test_insert_excludes_auto_columns() {
        let schema = journey();
        let record = Record::from_pairs(
            Arc::clone(&schema),
            [
                ("ring", SqlValue::from("One")),
                ("checkpoint", SqlValue::from("Bree")),
                ("fellowship_count", SqlValue::from(4)),
            ],
        )
        .unwrap();
        let sql = SqlGenerator::new(&schema)
            .insert(&[record.clone(), record], &literal, as_of())
            .unwrap()
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO `journey` (`ring`, `checkpoint`, `fellowship_count`) VALUES \
             ('One', 'Bree', 4), ('One', 'Bree', 4)"
        );
        assert!(!sql.contains("`id`"));
    }

    #[test]
    fn test_insert_zero_records_is_none() {
        let schema = journey();
        let sql = SqlGenerator::new(&schema).insert(&[], &literal, as_of()).unwrap();
        assert!(sql.is_none());
    }

    #[test]
    fn test_dimension_insert_ignores_duplicates() {
        let dim = ring_dimension();
        let template = SqlGenerator::new(&dim).insert_template().unwrap();
        assert_eq!(template.prefix, "INSERT IGNORE INTO `ring_dimension` (`name`) VALUES ");
    }

    #[test]
    fn test_dimension_key_renders_lookup() {
        let dim = ring_dimension();
        let fact = Arc::new(
            SchemaDef::new("RingFact", SchemaRole::Fact)
                .column(Column::dimension_key("ring", &dim))
                .column(Column::metric("bearers", ColumnType::Integer))
                .resolve()
                .unwrap(),
        );
        let record = Record::from_pairs(
            Arc::clone(&fact),
            [("ring", SqlValue::from("Nenya")), ("bearers", SqlValue::from(1))],
        )
        .unwrap();
        let row = SqlGenerator::new(&fact)
            .render_row(&record, &literal, as_of())
            .unwrap();
        assert_eq!(
            row,
            "((SELECT `id` FROM `ring_dimension` WHERE (`name` = 'Nenya') AND `applicable_from` = \
             (SELECT MAX(`applicable_from`) FROM `ring_dimension` WHERE (`name` = 'Nenya') \
             AND `applicable_from` <= '3019-03-25 12:00:00') LIMIT 1), 1)"
        );
    }

    #[test]
    fn test_null_dimension_key_stays_null() {
        let dim = ring_dimension();
        let fact = SchemaDef::new("RingFact", SchemaRole::Fact)
            .column(Column::dimension_key("ring", &dim))
            .resolve()
            .unwrap();
        let record = Record::new(Arc::new(fact.clone()));
        let row = SqlGenerator::new(&fact).render_row(&record, &literal, as_of()).unwrap();
        assert_eq!(row, "(NULL)");
    }

    #[test]
    fn test_dimension_key_type_mismatch() {
        let dim = ring_dimension();
        let fact = Arc::new(
            SchemaDef::new("RingFact", SchemaRole::Fact)
                .column(Column::dimension_key("ring", &dim))
                .resolve()
                .unwrap(),
        );
        let record = Record::from_pairs(Arc::clone(&fact), [("ring", 3)]).unwrap();
        let err = SqlGenerator::new(&fact)
            .render_row(&record, &literal, as_of())
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidValue(_)));
    }

    #[test]
    fn test_template_estimate_matches_statement() {
        let template = SqlGenerator::new(&journey()).insert_template().unwrap();
        let rows = vec!["('a', 'b', 1)".to_string(), "('c', 'd', 2)".to_string()];
        assert_eq!(template.estimate(&rows), template.statement(&rows).len());
        let none: Vec<String> = vec![];
        assert_eq!(template.estimate(&none), template.prefix.len());
    }
}
