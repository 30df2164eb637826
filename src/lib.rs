//! # Renest: Nested Entity-Graph Reconstruction
//!
//! Renest rebuilds normalized, nested object graphs from a single flat
//! tabular result, typically the output of a multi-table join. Given rows
//! that mix columns from several logical entity types and a schema declaring
//! each type's primary key and relationships, it deduplicates rows into
//! distinct instances and wires to-one/to-many relationship slots (including
//! reciprocal back-references) between them, in time linear in the input.
//!
//! ## Features
//!
//! - **Two-stage pipeline**: grouping/instantiation by primary key, then
//!   index-based linking, with no quadratic scanning
//! - **Composite keys**: multi-column primary and foreign keys with strict
//!   structural equality across mixed scalar types
//! - **Typed relation slots**: relationship attributes resolve to fixed
//!   slots at schema-index time, not by runtime name lookup
//! - **Join-aware semantics**: null-key rows excluded, fan-out collapsed,
//!   dangling foreign keys tolerated and reported
//! - **Pluggable instantiation**: validation/coercion of grouped records
//!   delegated to an [`Instantiator`] implementation
//!
//! ## Example: YAML schema
//!
//! ```yaml
//! entities:
//!   - name: user
//!     primary_key: [uid]
//!     fields: [name]
//!     relationships:
//!       - target: post
//!         cardinality: many
//!         key_columns: [pid]
//!         attribute: posts
//!         reciprocal:
//!           attribute: user
//!           cardinality: one
//!   - name: post
//!     primary_key: [pid]
//! ```

// Core modules
pub mod value;
pub mod row;
pub mod schema;
pub mod index;
pub mod instance;
pub mod instantiate;

// Pipeline stages
pub mod grouping;
pub mod linking;
pub mod reconstructor;

// Re-export key types
pub use value::{FieldMap, PrimaryKey, Value};
pub use row::{Row, Table};
pub use schema::{Cardinality, EntityDef, Reciprocal, RelationshipDef, Schema};
pub use index::{EntityIndex, SchemaError, SchemaIndex, SlotDef};
pub use instance::{Instance, InstanceRef, ObjectGraph, RelationSlot};
pub use instantiate::{Instantiator, Passthrough};

// Re-export pipeline types
pub use grouping::{ErrorPolicy, InstantiationError, RunOptions};
pub use linking::{DanglingReference, LinkError};
pub use reconstructor::{ReconstructError, Reconstruction, Reconstructor, RunReport};
