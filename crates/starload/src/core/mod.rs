//! Schema model: columns, schema resolution, records and values.
//!
//! - [`column`]: column declarations and SQL types
//! - [`schema`]: column sets, schema roles and resolution into [`ResolvedSchema`]
//! - [`catalog`]: resolved schemas for a whole warehouse declaration
//! - [`record`]: one row of a resolved schema
//! - [`value`]: SQL values and literal rendering
//! - [`identifier`]: identifier validation, quoting and naming

pub mod catalog;
pub mod column;
pub mod identifier;
pub mod record;
pub mod schema;
pub mod value;

pub use catalog::SchemaCatalog;
pub use column::{Column, ColumnFlags, ColumnType};
pub use record::Record;
pub use schema::{
    ColumnSet, ResolvedSchema, SchemaDef, SchemaRole, TableOptions, Tracking, APPLICABLE_FROM,
};
pub use value::SqlValue;
