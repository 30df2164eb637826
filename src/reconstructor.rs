//! The reconstruction pipeline façade.
//!
//! A [`Reconstructor`] holds a schema (and an [`Instantiator`]) once and
//! runs the two-stage pipeline over any number of flat inputs: schema index
//! validation, then grouping/instantiation, then linking. All per-run state
//! (instances, relation-key tables, lookups) is allocated inside `run`, so
//! one reconstructor can serve concurrent runs behind an `Arc`.

use std::fmt;

use tracing::debug;

use crate::grouping::{group_and_instantiate, InstantiationError, RunOptions};
use crate::index::{SchemaError, SchemaIndex};
use crate::instance::ObjectGraph;
use crate::instantiate::{Instantiator, Passthrough};
use crate::linking::{link, DanglingReference, LinkError};
use crate::row::Table;
use crate::schema::Schema;

/// Any failure surfaced by a run.
#[derive(Debug)]
pub enum ReconstructError {
    Schema(SchemaError),
    Instantiation(InstantiationError),
    Link(LinkError),
}

impl fmt::Display for ReconstructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconstructError::Schema(e) => write!(f, "Schema error: {}", e),
            ReconstructError::Instantiation(e) => write!(f, "Instantiation error: {}", e),
            ReconstructError::Link(e) => write!(f, "Link error: {}", e),
        }
    }
}

impl std::error::Error for ReconstructError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconstructError::Schema(e) => Some(e),
            ReconstructError::Instantiation(e) => Some(e),
            ReconstructError::Link(e) => Some(e),
        }
    }
}

impl From<SchemaError> for ReconstructError {
    fn from(e: SchemaError) -> Self {
        ReconstructError::Schema(e)
    }
}

impl From<InstantiationError> for ReconstructError {
    fn from(e: InstantiationError) -> Self {
        ReconstructError::Instantiation(e)
    }
}

impl From<LinkError> for ReconstructError {
    fn from(e: LinkError) -> Self {
        ReconstructError::Link(e)
    }
}

/// Non-fatal observations collected during a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Groups skipped under [`crate::ErrorPolicy::SkipAndCollect`].
    pub skipped: Vec<InstantiationError>,
    /// Foreign keys with no matching instance.
    pub dangling: Vec<DanglingReference>,
}

/// A successful run: the linked graph plus the run report.
#[derive(Debug)]
pub struct Reconstruction {
    pub graph: ObjectGraph,
    pub report: RunReport,
}

/// Reconstructs nested entity graphs from flat tabular inputs.
///
/// # Example
///
/// ```
/// use renest::{Cardinality, EntityDef, Reconstructor, RelationshipDef, Row, Schema, Table};
///
/// let schema = Schema::new(vec![
///     EntityDef::new("user", ["uid"]).with_field("name").with_relationship(
///         RelationshipDef::to_many("post", "pid", "posts")
///             .with_reciprocal("user", Cardinality::One),
///     ),
///     EntityDef::new("post", ["pid"]),
/// ]);
///
/// let table = Table::new(["uid", "name", "pid"])
///     .with_row(Row::new().with("uid", 1i64).with("name", "A").with("pid", 101i64))
///     .with_row(Row::new().with("uid", 1i64).with("name", "A").with("pid", 102i64));
///
/// let result = Reconstructor::new(schema).run(&table).unwrap();
/// let user = &result.graph.entities("user")[0];
/// assert_eq!(result.graph.to_many(user, "posts").len(), 2);
/// ```
pub struct Reconstructor {
    schema: Schema,
    instantiator: Box<dyn Instantiator>,
    options: RunOptions,
}

impl Reconstructor {
    /// Create a reconstructor over a schema, with passthrough instantiation
    /// and default options.
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            instantiator: Box::new(Passthrough),
            options: RunOptions::default(),
        }
    }

    /// Replace the instantiation capability.
    pub fn with_instantiator(mut self, instantiator: Box<dyn Instantiator>) -> Self {
        self.instantiator = instantiator;
        self
    }

    /// Replace the run options.
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// The schema this reconstructor was built over.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Run the full pipeline over one flat input.
    ///
    /// # Errors
    /// * [`ReconstructError::Schema`] - schema incomplete for the input's
    ///   columns; raised before any row is processed
    /// * [`ReconstructError::Instantiation`] - a group failed validation
    ///   under [`crate::ErrorPolicy::Abort`]
    /// * [`ReconstructError::Link`] - duplicate primary key or to-one
    ///   cardinality violation
    ///
    /// A failed run returns no graph; partially linked instances are
    /// discarded.
    pub fn run(&self, table: &Table) -> Result<Reconstruction, ReconstructError> {
        let index = SchemaIndex::build(&self.schema, table.columns())?;

        let grouped =
            group_and_instantiate(&index, table, self.instantiator.as_ref(), &self.options)?;
        let skipped = grouped.skipped;

        let (instances, dangling) = link(&index, grouped.entities)?;
        let graph = ObjectGraph::new(&index, instances);

        debug!(
            rows = table.len(),
            instances = graph.len(),
            skipped = skipped.len(),
            dangling = dangling.len(),
            "run complete"
        );

        Ok(Reconstruction {
            graph,
            report: RunReport { skipped, dangling },
        })
    }
}
