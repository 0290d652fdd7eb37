//! The unit of freshness evaluation.

use crate::criteria::FreshnessCriteria;

/// One selected source table with its resolved criteria.
///
/// Nodes are built once, before scheduling, and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessNode {
    unique_id: String,
    source_name: String,
    table_name: String,
    relation: String,
    loaded_at_field: String,
    criteria: FreshnessCriteria,
}

impl FreshnessNode {
    /// Creates a node for `source_name.table_name`.
    ///
    /// The relation defaults to the table name and the loaded-at field to
    /// `loaded_at`.
    pub fn new(
        unique_id: impl Into<String>,
        source_name: impl Into<String>,
        table_name: impl Into<String>,
        criteria: FreshnessCriteria,
    ) -> Self {
        let table_name = table_name.into();
        Self {
            unique_id: unique_id.into(),
            source_name: source_name.into(),
            relation: table_name.clone(),
            table_name,
            loaded_at_field: "loaded_at".to_string(),
            criteria,
        }
    }

    /// Sets the relation the freshness query reads from.
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = relation.into();
        self
    }

    /// Sets the column or expression holding the load timestamp.
    pub fn with_loaded_at_field(mut self, field: impl Into<String>) -> Self {
        self.loaded_at_field = field.into();
        self
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn loaded_at_field(&self) -> &str {
        &self.loaded_at_field
    }

    pub fn criteria(&self) -> &FreshnessCriteria {
        &self.criteria
    }

    /// `source.table`, the name used in console output.
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.source_name, self.table_name)
    }
}
