//! The sources project file.
//!
//! A project declares sources, their tables and freshness settings in JSON:
//!
//! ```json
//! {
//!   "name": "shop",
//!   "sources": [
//!     {
//!       "name": "raw",
//!       "loaded_at_field": "_etl_loaded_at",
//!       "freshness": {
//!         "warn_after": { "count": 12, "period": "hour" },
//!         "error_after": { "count": 24, "period": "hour" }
//!       },
//!       "tables": [
//!         { "name": "orders", "location": { "path": "data/orders.csv", "format": "csv" } },
//!         { "name": "customers", "freshness": { "error_after": null } },
//!         { "name": "countries", "freshness": null }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Table-level `freshness` merges field by field with the source default; an
//! explicit `"freshness": null` on a table switches the check off. Table
//! locations are optional and only used to register data with DataFusion.

use datafusion::common::TableReference;
use datafusion::prelude::{CsvReadOptions, ParquetReadOptions, SessionContext};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::criteria::{
    resolve, FreshnessCriteria, FreshnessOverride, FreshnessThreshold, ResolvedFreshness, Setting,
    TableFreshness, ThresholdError,
};
use crate::error::{ErrorContext, FreshnessError, Result};
use crate::node::FreshnessNode;
use crate::selector::NodeSelector;

/// A threshold as written in the project file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThresholdConfig {
    pub count: i64,
    pub period: String,
}

impl ThresholdConfig {
    fn parse(&self) -> std::result::Result<FreshnessThreshold, ThresholdError> {
        FreshnessThreshold::parse(self.count, &self.period)
    }
}

/// Source-level freshness defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CriteriaConfig {
    #[serde(default)]
    pub warn_after: Option<ThresholdConfig>,
    #[serde(default)]
    pub error_after: Option<ThresholdConfig>,
    #[serde(default)]
    pub filter: Option<String>,
}

impl CriteriaConfig {
    fn parse(&self) -> std::result::Result<FreshnessCriteria, ThresholdError> {
        Ok(FreshnessCriteria {
            warn_after: self.warn_after.as_ref().map(ThresholdConfig::parse).transpose()?,
            error_after: self.error_after.as_ref().map(ThresholdConfig::parse).transpose()?,
            filter: self.filter.clone(),
        })
    }
}

/// Table-level freshness overrides. A missing key inherits, `null` clears.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideConfig {
    #[serde(default)]
    pub warn_after: Setting<ThresholdConfig>,
    #[serde(default)]
    pub error_after: Setting<ThresholdConfig>,
    #[serde(default)]
    pub filter: Setting<String>,
}

impl OverrideConfig {
    fn parse(&self) -> std::result::Result<FreshnessOverride, ThresholdError> {
        Ok(FreshnessOverride {
            warn_after: self.warn_after.clone().try_map(|t| t.parse())?,
            error_after: self.error_after.clone().try_map(|t| t.parse())?,
            filter: self.filter.clone(),
        })
    }
}

/// File format of a table location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    Parquet,
}

/// Where a table's data lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableLocation {
    /// File path, relative to the project file
    pub path: PathBuf,
    pub format: TableFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    /// Relation name in the warehouse, when it differs from `name`
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub loaded_at_field: Option<String>,
    #[serde(default)]
    pub freshness: Setting<OverrideConfig>,
    #[serde(default)]
    pub location: Option<TableLocation>,
}

impl TableDefinition {
    pub fn relation(&self) -> &str {
        self.identifier.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceDefinition {
    pub name: String,
    #[serde(default)]
    pub loaded_at_field: Option<String>,
    #[serde(default)]
    pub freshness: Option<CriteriaConfig>,
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
}

/// A configuration problem that keeps one node from being evaluated.
#[derive(Debug)]
pub struct NodeConfigError {
    pub unique_id: String,
    pub error: FreshnessError,
}

/// The nodes selected for one invocation.
#[derive(Debug, Default)]
pub struct FreshnessPlan {
    /// Nodes to evaluate, in project order
    pub nodes: Vec<FreshnessNode>,
    /// Selected nodes whose freshness is switched off
    pub disabled: Vec<String>,
    /// Selected nodes that could not be built
    pub errors: Vec<NodeConfigError>,
}

impl FreshnessPlan {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A parsed project file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourcesProject {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<SourceDefinition>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl SourcesProject {
    /// Reads a project file. Relative table locations resolve against the
    /// file's directory.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FreshnessError::Configuration(format!(
                "Failed to read project file {}: {e}",
                path.display()
            ))
        })?;
        let mut project = Self::from_json_str(&text)?;
        project.base_dir = path.parent().map(Path::to_path_buf);
        debug!(sources = project.sources.len(), "Loaded sources project");
        Ok(project)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let project: Self = serde_json::from_str(text)
            .map_err(|e| FreshnessError::Configuration(format!("Invalid project file: {e}")))?;
        if project.name.trim().is_empty() {
            return Err(FreshnessError::Configuration(
                "project name must not be empty".to_string(),
            ));
        }
        Ok(project)
    }

    /// `source.<project>.<source>.<table>`
    pub fn unique_id(&self, source: &str, table: &str) -> String {
        format!("source.{}.{}.{}", self.name, source, table)
    }

    /// Resolves every selected table into a node.
    ///
    /// Configuration problems are collected per node; they never stop the
    /// remaining tables from being planned.
    pub fn plan(&self, selector: &NodeSelector) -> FreshnessPlan {
        let mut plan = FreshnessPlan::default();
        let mut seen = HashSet::new();

        for source in &self.sources {
            let source_default = source.freshness.as_ref().map(CriteriaConfig::parse);

            for table in source.tables.iter().filter(|t| selector.matches(&source.name, &t.name)) {
                let unique_id = self.unique_id(&source.name, &table.name);
                if !seen.insert(unique_id.clone()) {
                    plan.errors.push(NodeConfigError {
                        error: FreshnessError::Configuration(format!(
                            "table '{}' is declared more than once in source '{}'",
                            table.name, source.name
                        )),
                        unique_id,
                    });
                    continue;
                }

                match self.build_node(&unique_id, source, table, source_default.as_ref()) {
                    Ok(Some(node)) => plan.nodes.push(node),
                    Ok(None) => {
                        debug!(node.unique_id = %unique_id, "Freshness disabled");
                        plan.disabled.push(unique_id);
                    }
                    Err(error) => plan.errors.push(NodeConfigError { unique_id, error }),
                }
            }
        }

        info!(
            selected = plan.nodes.len(),
            disabled = plan.disabled.len(),
            errors = plan.errors.len(),
            "Planned freshness checks"
        );
        plan
    }

    fn build_node(
        &self,
        unique_id: &str,
        source: &SourceDefinition,
        table: &TableDefinition,
        source_default: Option<&std::result::Result<FreshnessCriteria, ThresholdError>>,
    ) -> Result<Option<FreshnessNode>> {
        let invalid = |message: String| FreshnessError::invalid_criteria(unique_id, message);

        let table_freshness = match &table.freshness {
            Setting::Unset => None,
            Setting::Null => Some(TableFreshness::Disabled),
            Setting::Value(config) => Some(TableFreshness::Override(
                config.parse().map_err(|e| invalid(format!("table freshness: {e}")))?,
            )),
        };
        // An explicit table disable never looks at the source default.
        let source_default = match (&table_freshness, source_default) {
            (Some(TableFreshness::Disabled), _) | (_, None) => None,
            (_, Some(Ok(criteria))) => Some(criteria),
            (_, Some(Err(e))) => return Err(invalid(format!("source freshness: {e}"))),
        };

        let criteria = match resolve(source_default, table_freshness.as_ref()) {
            ResolvedFreshness::Enabled(criteria) => criteria,
            ResolvedFreshness::Disabled => return Ok(None),
        };

        let loaded_at_field = table
            .loaded_at_field
            .as_deref()
            .or(source.loaded_at_field.as_deref())
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| invalid("no loaded_at_field is configured".to_string()))?;

        Ok(Some(
            FreshnessNode::new(unique_id, &source.name, &table.name, criteria)
                .with_relation(table.relation())
                .with_loaded_at_field(loaded_at_field),
        ))
    }

    /// Registers every table with a location in `ctx`, under its relation
    /// name. Returns the number of tables registered.
    ///
    /// A table that fails to register is logged and skipped; its freshness
    /// query later fails with a runtime error.
    #[instrument(skip(self, ctx), fields(project = %self.name))]
    pub async fn register_tables(&self, ctx: &SessionContext) -> usize {
        let mut registered = 0;
        for source in &self.sources {
            for table in &source.tables {
                let Some(location) = &table.location else {
                    continue;
                };
                match self.register_table(ctx, table.relation(), location).await {
                    Ok(()) => registered += 1,
                    Err(e) => warn!(
                        table = %table.relation(),
                        path = %location.path.display(),
                        error = %e,
                        "Failed to register table"
                    ),
                }
            }
        }
        info!(registered, "Registered project tables");
        registered
    }

    async fn register_table(
        &self,
        ctx: &SessionContext,
        name: &str,
        location: &TableLocation,
    ) -> Result<()> {
        let path = match &self.base_dir {
            Some(base) if location.path.is_relative() => base.join(&location.path),
            _ => location.path.clone(),
        };
        let path = path.to_string_lossy().into_owned();
        let extension = Path::new(&path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        match location.format {
            TableFormat::Csv => {
                let options = CsvReadOptions::new().file_extension(&extension);
                ctx.register_csv(table_reference(name), &path, options)
                    .await
                    .with_context(|| format!("Failed to register CSV table '{name}'"))?;
            }
            TableFormat::Parquet => {
                let options = ParquetReadOptions {
                    file_extension: &extension,
                    ..Default::default()
                };
                ctx.register_parquet(table_reference(name), &path, options)
                    .await
                    .with_context(|| format!("Failed to register Parquet table '{name}'"))?;
            }
        }
        debug!(table = %name, path = %path, "Registered table");
        Ok(())
    }
}

/// The relation as written, split on dots, without case folding. Freshness
/// queries quote the relation, so both sides agree on its spelling.
fn table_reference(relation: &str) -> TableReference {
    let parts: Vec<&str> = relation.split('.').collect();
    match parts.as_slice() {
        [catalog, schema, table] => TableReference::full(*catalog, *schema, *table),
        [schema, table] => TableReference::partial(*schema, *table),
        _ => TableReference::bare(relation),
    }
}
