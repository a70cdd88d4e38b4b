//! Configuration validation.

use std::collections::HashSet;

use super::{ColumnKind, Config, SourceConfig, TableConfig};
use crate::error::{LoadError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if !config.databases.contains_key(&config.warehouse) {
        return Err(LoadError::Config(format!(
            "warehouse '{}' is not defined under databases",
            config.warehouse
        )));
    }

    for (name, db) in &config.databases {
        if db.host.is_empty() {
            return Err(LoadError::Config(format!("databases.{}.host is required", name)));
        }
        if db.database.is_empty() {
            return Err(LoadError::Config(format!(
                "databases.{}.database is required",
                name
            )));
        }
        if db.user.is_empty() {
            return Err(LoadError::Config(format!("databases.{}.user is required", name)));
        }
    }

    let mut names = HashSet::new();
    for table in &config.tables {
        if !names.insert(table.name.as_str()) {
            return Err(LoadError::Config(format!(
                "table '{}' is declared more than once",
                table.name
            )));
        }
    }

    for table in &config.tables {
        validate_table(config, table, &names)?;
    }

    Ok(())
}

fn validate_table(config: &Config, table: &TableConfig, names: &HashSet<&str>) -> Result<()> {
    for parent in &table.extends {
        if !names.contains(parent.as_str()) {
            return Err(LoadError::Config(format!(
                "table '{}' extends unknown table '{}'",
                table.name, parent
            )));
        }
    }

    for source in [&table.source, &table.historical_source].into_iter().flatten() {
        let SourceConfig::Database { database, .. } = source;
        if !config.databases.contains_key(database) {
            return Err(LoadError::Config(format!(
                "table '{}' reads from unknown database '{}'",
                table.name, database
            )));
        }
    }

    for column in &table.columns {
        let needs_type = !matches!(column.kind, ColumnKind::PrimaryKey | ColumnKind::DimensionKey);
        if needs_type && column.column_type.is_none() {
            return Err(LoadError::Config(format!(
                "column '{}.{}' needs a type",
                table.name, column.name
            )));
        }
        match (&column.kind, &column.references) {
            (ColumnKind::DimensionKey, None) => {
                return Err(LoadError::Config(format!(
                    "dimension key '{}.{}' needs references",
                    table.name, column.name
                )));
            }
            (ColumnKind::DimensionKey, Some(dim)) if !names.contains(dim.as_str()) => {
                return Err(LoadError::Config(format!(
                    "dimension key '{}.{}' references unknown table '{}'",
                    table.name, column.name, dim
                )));
            }
            _ => {}
        }
        // Auto columns never appear in inserts, so MySQL must fill them.
        if column.kind == ColumnKind::Auto && column.default.is_none() && !column.nullable {
            return Err(LoadError::Config(format!(
                "auto column '{}.{}' needs a default or nullable: true",
                table.name, column.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnConfig, DatabaseConfig};
    use crate::core::SchemaRole;
    use std::collections::BTreeMap;

    fn database(name: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 3306,
            database: name.to_string(),
            user: "loader".to_string(),
            password: "password".to_string(),
            ssl_mode: "disable".to_string(),
        }
    }

    fn column(name: &str, kind: ColumnKind, ty: Option<&str>) -> ColumnConfig {
        ColumnConfig {
            name: name.to_string(),
            column_type: ty.map(str::to_string),
            kind,
            references: None,
            nullable: false,
            default: None,
        }
    }

    fn table(name: &str, role: SchemaRole, columns: Vec<ColumnConfig>) -> TableConfig {
        TableConfig {
            name: name.to_string(),
            table_name: None,
            role,
            extends: vec![],
            columns,
            table_options: BTreeMap::new(),
            source: None,
            historical_source: None,
        }
    }

    fn valid_config() -> Config {
        let mut databases = BTreeMap::new();
        databases.insert("warehouse".to_string(), database("dw"));
        databases.insert("shire".to_string(), database("shire"));

        let mut ring_key = column("ring", ColumnKind::DimensionKey, None);
        ring_key.references = Some("RingDimension".to_string());

        let mut fact = table(
            "FellowshipFact",
            SchemaRole::Fact,
            vec![ring_key, column("fellowship_count", ColumnKind::Metric, Some("int"))],
        );
        fact.source = Some(SourceConfig::Database {
            database: "shire".to_string(),
            query: "SELECT ring, fellowship_count FROM journeys".to_string(),
        });

        Config {
            warehouse: "warehouse".to_string(),
            databases,
            client_config_file: None,
            tables: vec![
                table(
                    "RingDimension",
                    SchemaRole::Dimension,
                    vec![column("name", ColumnKind::NaturalKey, Some("varchar(40)"))],
                ),
                fact,
            ],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_unknown_warehouse() {
        let mut config = valid_config();
        config.warehouse = "mordor".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_host() {
        let mut config = valid_config();
        config.databases.get_mut("shire").unwrap().host = String::new();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("databases.shire.host"));
    }

    #[test]
    fn test_duplicate_table() {
        let mut config = valid_config();
        let dup = config.tables[0].clone();
        config.tables.push(dup);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_unknown_database() {
        let mut config = valid_config();
        config.tables[1].source = Some(SourceConfig::Database {
            database: "isengard".to_string(),
            query: "SELECT 1".to_string(),
        });
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("isengard"));
    }

    #[test]
    fn test_dimension_key_without_references() {
        let mut config = valid_config();
        config.tables[1].columns[0].references = None;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_column_without_type() {
        let mut config = valid_config();
        config.tables[1].columns[1].column_type = None;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_auto_column_needs_default_or_nullable() {
        let mut config = valid_config();
        config.tables[0]
            .columns
            .push(column("loaded_at", ColumnKind::Auto, Some("datetime")));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("RingDimension.loaded_at"));

        config.tables[0].columns[1].default = Some("CURRENT_TIMESTAMP".to_string());
        assert!(validate(&config).is_ok());

        config.tables[0].columns[1].default = None;
        config.tables[0].columns[1].nullable = true;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_database_config_debug_redacts_password() {
        let mut db = database("dw");
        db.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", db);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_123"));
    }
}
