//! Resolved schemas for a whole warehouse declaration.
//!
//! Every table declaration is resolved exactly once, parents and referenced
//! dimensions before the tables that use them, and the result is shared as an
//! `Arc<ResolvedSchema>` for the rest of the process.

use std::collections::HashMap;
use std::sync::Arc;

use super::column::{Column, ColumnType};
use super::schema::{ResolvedSchema, SchemaDef, SchemaRole};
use crate::config::{ColumnConfig, ColumnKind, TableConfig};
use crate::error::{LoadError, Result};

/// Cache of resolved schemas, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    order: Vec<String>,
    schemas: HashMap<String, Arc<ResolvedSchema>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every declaration.
    ///
    /// # Errors
    ///
    /// `LoadError::Schema` for cycles through `extends` or `references`,
    /// unknown names, and anything [`SchemaDef::resolve`] rejects.
    pub fn from_config(tables: &[TableConfig]) -> Result<Self> {
        let decls: HashMap<&str, &TableConfig> =
            tables.iter().map(|t| (t.name.as_str(), t)).collect();
        let mut catalog = Self::new();
        let mut in_progress: Vec<String> = Vec::new();

        for table in tables {
            catalog.resolve_named(&table.name, &decls, &mut in_progress)?;
        }
        catalog.order = tables.iter().map(|t| t.name.clone()).collect();
        Ok(catalog)
    }

    /// Add an already resolved schema.
    pub fn insert(&mut self, schema: Arc<ResolvedSchema>) {
        if !self.schemas.contains_key(&schema.name) {
            self.order.push(schema.name.clone());
        }
        self.schemas.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResolvedSchema>> {
        self.schemas.get(name).cloned()
    }

    /// Look up by schema name, falling back to table name.
    pub fn find(&self, name: &str) -> Option<Arc<ResolvedSchema>> {
        self.get(name).or_else(|| {
            self.iter()
                .find(|s| s.table_name == name)
        })
    }

    /// Schemas in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<ResolvedSchema>> + '_ {
        self.order.iter().filter_map(|n| self.schemas.get(n).cloned())
    }

    /// Fact schemas in declaration order.
    pub fn facts(&self) -> Vec<Arc<ResolvedSchema>> {
        self.iter().filter(|s| s.role == SchemaRole::Fact).collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    fn resolve_named(
        &mut self,
        name: &str,
        decls: &HashMap<&str, &TableConfig>,
        in_progress: &mut Vec<String>,
    ) -> Result<Arc<ResolvedSchema>> {
        if let Some(done) = self.schemas.get(name) {
            return Ok(Arc::clone(done));
        }
        if in_progress.iter().any(|n| n == name) {
            in_progress.push(name.to_string());
            return Err(LoadError::Schema(format!(
                "cyclic table declaration: {}",
                in_progress.join(" -> ")
            )));
        }
        let decl = decls
            .get(name)
            .ok_or_else(|| LoadError::Schema(format!("unknown table '{}'", name)))?;

        in_progress.push(name.to_string());

        let mut def = SchemaDef::new(&decl.name, decl.role);
        if let Some(table_name) = &decl.table_name {
            def = def.table_name(table_name);
        }
        for parent in &decl.extends {
            let parent = self.resolve_named(parent, decls, in_progress)?;
            def = def.extends(parent);
        }
        for column in &decl.columns {
            let column = match (&column.kind, &column.references) {
                (ColumnKind::DimensionKey, Some(dim)) => {
                    let dim = self.resolve_named(dim, decls, in_progress)?;
                    build_column(&decl.name, column, Some(&dim))?
                }
                _ => build_column(&decl.name, column, None)?,
            };
            def = def.column(column);
        }
        for (key, value) in &decl.table_options {
            def = def.option(key, value);
        }

        let resolved = Arc::new(def.resolve()?);
        in_progress.pop();
        self.schemas.insert(name.to_string(), Arc::clone(&resolved));
        Ok(resolved)
    }
}

fn build_column(
    table: &str,
    decl: &ColumnConfig,
    dimension: Option<&Arc<ResolvedSchema>>,
) -> Result<Column> {
    let column_type = || -> Result<ColumnType> {
        match &decl.column_type {
            Some(spelling) => spelling.parse(),
            None => Err(LoadError::Schema(format!(
                "column '{}.{}' has no type",
                table, decl.name
            ))),
        }
    };

    let mut column = match decl.kind {
        ColumnKind::Column => Column::new(&decl.name, column_type()?),
        ColumnKind::PrimaryKey => {
            let mut pk = Column::primary_key(&decl.name);
            if decl.column_type.is_some() {
                pk.column_type = column_type()?;
                pk.flags.auto_generated = false;
            }
            pk
        }
        ColumnKind::NaturalKey => Column::natural_key(&decl.name, column_type()?),
        ColumnKind::Metric => Column::metric(&decl.name, column_type()?),
        ColumnKind::Auto => {
            let mut col = Column::new(&decl.name, column_type()?);
            col.flags.auto_generated = true;
            col
        }
        ColumnKind::DimensionKey => {
            let dim = dimension.ok_or_else(|| {
                LoadError::Schema(format!(
                    "dimension key '{}.{}' needs references",
                    table, decl.name
                ))
            })?;
            if dim.role != SchemaRole::Dimension {
                return Err(LoadError::Schema(format!(
                    "dimension key '{}.{}' references {} '{}', not a dimension",
                    table, decl.name, dim.role, dim.name
                )));
            }
            Column::dimension_key(&decl.name, dim)
        }
    };

    if decl.nullable {
        column.nullable = true;
    }
    if let Some(default) = &decl.default {
        column.default = Some(default.clone());
    }
    Ok(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn column(name: &str, kind: ColumnKind, ty: Option<&str>, references: Option<&str>) -> ColumnConfig {
        ColumnConfig {
            name: name.to_string(),
            column_type: ty.map(str::to_string),
            kind,
            references: references.map(str::to_string),
            nullable: false,
            default: None,
        }
    }

    fn table(name: &str, role: SchemaRole, extends: &[&str], columns: Vec<ColumnConfig>) -> TableConfig {
        TableConfig {
            name: name.to_string(),
            table_name: None,
            role,
            extends: extends.iter().map(|s| s.to_string()).collect(),
            columns,
            table_options: BTreeMap::new(),
            source: None,
            historical_source: None,
        }
    }

    fn declarations() -> Vec<TableConfig> {
        vec![
            // Declared before the dimension it references.
            table(
                "FellowshipFact",
                SchemaRole::Fact,
                &[],
                vec![
                    column("ring", ColumnKind::DimensionKey, None, Some("RingDimension")),
                    column("fellowship_count", ColumnKind::Metric, Some("int"), None),
                ],
            ),
            table(
                "RingDimension",
                SchemaRole::Dimension,
                &[],
                vec![column("name", ColumnKind::NaturalKey, Some("varchar(40)"), None)],
            ),
        ]
    }

    #[test]
    fn test_resolves_references_out_of_order() {
        let catalog = SchemaCatalog::from_config(&declarations()).unwrap();
        assert_eq!(catalog.len(), 2);

        let fact = catalog.get("FellowshipFact").unwrap();
        let dim = catalog.get("RingDimension").unwrap();
        let referenced = fact.column("ring").unwrap().references.as_ref().unwrap();
        assert!(Arc::ptr_eq(referenced, &dim));
    }

    #[test]
    fn test_declaration_order_and_facts() {
        let catalog = SchemaCatalog::from_config(&declarations()).unwrap();
        let names: Vec<String> = catalog.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["FellowshipFact", "RingDimension"]);
        assert_eq!(catalog.facts().len(), 1);
        assert!(catalog.find("ring_dimension").is_some());
    }

    #[test]
    fn test_extends_merges_parent_columns() {
        let mut decls = declarations();
        decls.push(table(
            "ExtendedFellowshipFact",
            SchemaRole::Fact,
            &["FellowshipFact"],
            vec![column("distance", ColumnKind::Metric, Some("int"), None)],
        ));
        let catalog = SchemaCatalog::from_config(&decls).unwrap();
        let child = catalog.get("ExtendedFellowshipFact").unwrap();
        assert_eq!(
            child.column_names(),
            vec!["id", "created", "ring", "fellowship_count", "distance"]
        );
        assert_eq!(
            child.metrics,
            Some(vec!["fellowship_count".to_string(), "distance".to_string()])
        );
    }

    #[test]
    fn test_cycle_is_schema_error() {
        let decls = vec![
            table("A", SchemaRole::Table, &["B"], vec![]),
            table("B", SchemaRole::Table, &["A"], vec![]),
        ];
        let err = SchemaCatalog::from_config(&decls).unwrap_err();
        assert!(matches!(err, LoadError::Schema(_)));
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn test_dimension_key_must_reference_dimension() {
        let decls = vec![
            table("Plain", SchemaRole::Table, &[], vec![]),
            table(
                "BadFact",
                SchemaRole::Fact,
                &[],
                vec![column("plain", ColumnKind::DimensionKey, None, Some("Plain"))],
            ),
        ];
        let err = SchemaCatalog::from_config(&decls).unwrap_err();
        assert!(err.to_string().contains("not a dimension"));
    }
}
