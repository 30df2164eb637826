//! Grouping and instantiation: flat rows to deduplicated instances.
//!
//! For each entity type independently, input rows are partitioned by primary
//! key. Join fan-out only varies relationship-side columns, so each group
//! yields one scalar record (first row's values) plus, per declared
//! relationship, the set of distinct non-null foreign-key tuples observed
//! across the group. Groups are instantiated in bulk through the external
//! [`Instantiator`]; the foreign-key sets are handed to the linking stage as
//! the relation-key table.
//!
//! Rows whose primary key has any null component carry no entity of that
//! type (outer join with no match) and are excluded before a key is built.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use crate::index::{EntityIndex, SchemaIndex};
use crate::instance::Instance;
use crate::instantiate::Instantiator;
use crate::row::{Row, Table};
use crate::value::{FieldMap, PrimaryKey};

/// How the run reacts when a group fails instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Abort the run on the first failed group (default).
    #[default]
    Abort,
    /// Skip failed groups and collect their errors in the run report.
    SkipAndCollect,
}

/// Per-run knobs for the grouping stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub error_policy: ErrorPolicy,
    /// Verify that non-key scalar fields are constant within each group.
    /// Off by default: the input contract says fan-out only varies
    /// relationship columns, and checking costs a pass per row.
    pub check_field_consistency: bool,
}

/// A group's scalar values failed external validation or violated the
/// per-group constancy contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstantiationError {
    Construction {
        entity: String,
        key: PrimaryKey,
        message: String,
    },
    InconsistentField {
        entity: String,
        key: PrimaryKey,
        field: String,
    },
}

impl fmt::Display for InstantiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstantiationError::Construction {
                entity,
                key,
                message,
            } => {
                write!(
                    f,
                    "Failed to instantiate '{}' {}: {}",
                    entity, key, message
                )
            }
            InstantiationError::InconsistentField { entity, key, field } => {
                write!(
                    f,
                    "Inconsistent value for field '{}' within group '{}' {}",
                    field, entity, key
                )
            }
        }
    }
}

impl std::error::Error for InstantiationError {}

/// Foreign-key sets per instance, parallel to the instance list: one
/// [`IndexSet`] per declared relationship, tuples in first-observed order.
///
/// Hand-off artifact between grouping and linking; discarded after linking.
#[derive(Debug, Clone, Default)]
pub struct RelationKeyTable {
    pub rows: Vec<Vec<IndexSet<PrimaryKey>>>,
}

/// Grouping output for one entity type.
#[derive(Debug, Clone)]
pub struct EntityGroups {
    pub instances: Vec<Instance>,
    pub relation_keys: RelationKeyTable,
}

/// Output of the grouping stage, parallel to the schema index's entities.
#[derive(Debug, Clone)]
pub struct GroupingOutput {
    pub entities: Vec<EntityGroups>,
    /// Groups skipped under [`ErrorPolicy::SkipAndCollect`].
    pub skipped: Vec<InstantiationError>,
}

struct GroupAcc {
    fields: FieldMap,
    foreign_keys: Vec<IndexSet<PrimaryKey>>,
    inconsistent: Option<String>,
}

/// Partition rows, aggregate groups, and instantiate one instance per
/// distinct primary key for every entity type.
///
/// Instance lists come out in first-occurrence order of each primary key,
/// so identical inputs produce identically ordered outputs.
///
/// # Errors
/// Under [`ErrorPolicy::Abort`], the first group that fails validation (or
/// the consistency check, when enabled) aborts the run.
pub fn group_and_instantiate(
    index: &SchemaIndex,
    table: &Table,
    instantiator: &dyn Instantiator,
    options: &RunOptions,
) -> Result<GroupingOutput, InstantiationError> {
    let mut entities = Vec::with_capacity(index.entities().len());
    let mut skipped = Vec::new();

    for (position, entity) in index.entities().iter().enumerate() {
        let groups = partition(entity, table, options.check_field_consistency);
        let entity_groups = instantiate_groups(
            position,
            entity,
            groups,
            instantiator,
            options,
            &mut skipped,
        )?;
        debug!(
            entity = entity.name.as_str(),
            instances = entity_groups.instances.len(),
            "grouped"
        );
        entities.push(entity_groups);
    }

    Ok(GroupingOutput { entities, skipped })
}

/// Partition rows by primary key and aggregate scalar and foreign-key
/// columns per group.
fn partition(
    entity: &EntityIndex,
    table: &Table,
    check_consistency: bool,
) -> IndexMap<PrimaryKey, GroupAcc> {
    let mut groups: IndexMap<PrimaryKey, GroupAcc> = IndexMap::new();

    for row in table.rows() {
        let Some(key) = key_tuple(row, &entity.primary_key) else {
            continue;
        };

        let acc = groups.entry(key).or_insert_with(|| GroupAcc {
            fields: scalar_record(entity, row),
            foreign_keys: vec![IndexSet::new(); entity.relations.len()],
            inconsistent: None,
        });

        if check_consistency && acc.inconsistent.is_none() {
            for field in &entity.scalar_fields {
                if acc.fields.get(field.as_str()) != Some(row.get(field)) {
                    acc.inconsistent = Some(field.clone());
                    break;
                }
            }
        }

        for (r, relation) in entity.relations.iter().enumerate() {
            if let Some(foreign_key) = key_tuple(row, &relation.key_columns) {
                acc.foreign_keys[r].insert(foreign_key);
            }
        }
    }

    groups
}

/// Assemble a key tuple from a row; `None` if any component is null.
fn key_tuple(row: &Row, columns: &[String]) -> Option<PrimaryKey> {
    let mut components = Vec::with_capacity(columns.len());
    for column in columns {
        let value = row.get(column);
        if value.is_null() {
            return None;
        }
        components.push(value.clone());
    }
    Some(PrimaryKey::new(components))
}

/// Scalar record for a group: primary-key columns plus scalar fields, from
/// the group's first row.
fn scalar_record(entity: &EntityIndex, row: &Row) -> FieldMap {
    let mut fields = FieldMap::new();
    for column in &entity.primary_key {
        fields.insert(column.clone(), row.get(column).clone());
    }
    for column in &entity.scalar_fields {
        fields.insert(column.clone(), row.get(column).clone());
    }
    fields
}

/// Bulk-instantiate an entity's groups, applying the error policy.
fn instantiate_groups(
    position: usize,
    entity: &EntityIndex,
    groups: IndexMap<PrimaryKey, GroupAcc>,
    instantiator: &dyn Instantiator,
    options: &RunOptions,
    skipped: &mut Vec<InstantiationError>,
) -> Result<EntityGroups, InstantiationError> {
    let mut keys = Vec::with_capacity(groups.len());
    let mut records = Vec::with_capacity(groups.len());
    let mut foreign_keys = Vec::with_capacity(groups.len());

    for (key, acc) in groups {
        if let Some(field) = acc.inconsistent {
            let error = InstantiationError::InconsistentField {
                entity: entity.name.clone(),
                key,
                field,
            };
            match options.error_policy {
                ErrorPolicy::Abort => return Err(error),
                ErrorPolicy::SkipAndCollect => {
                    warn!(%error, "skipping group");
                    skipped.push(error);
                    continue;
                }
            }
        }
        keys.push(key);
        records.push(acc.fields);
        foreign_keys.push(acc.foreign_keys);
    }

    let results = instantiator.instantiate_batch(&entity.name, records);

    let mut instances = Vec::with_capacity(keys.len());
    let mut relation_keys = RelationKeyTable::default();
    for ((key, result), group_foreign_keys) in
        keys.into_iter().zip(results).zip(foreign_keys)
    {
        match result {
            Ok(fields) => {
                instances.push(Instance::new(position, key, fields, &entity.slots));
                relation_keys.rows.push(group_foreign_keys);
            }
            Err(message) => {
                let error = InstantiationError::Construction {
                    entity: entity.name.clone(),
                    key,
                    message,
                };
                match options.error_policy {
                    ErrorPolicy::Abort => return Err(error),
                    ErrorPolicy::SkipAndCollect => {
                        warn!(%error, "skipping group");
                        skipped.push(error);
                    }
                }
            }
        }
    }

    Ok(EntityGroups {
        instances,
        relation_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instantiate::Passthrough;
    use crate::schema::{Cardinality, EntityDef, RelationshipDef, Schema};
    use crate::value::Value;

    fn user_post_schema() -> Schema {
        Schema::new(vec![
            EntityDef::new("user", ["uid"]).with_field("name").with_relationship(
                RelationshipDef::to_many("post", "pid", "posts")
                    .with_reciprocal("user", Cardinality::One),
            ),
            EntityDef::new("post", ["pid"]),
        ])
    }

    fn user_post_table() -> Table {
        Table::new(["uid", "name", "pid"])
            .with_row(Row::new().with("uid", 1i64).with("name", "A").with("pid", 101i64))
            .with_row(Row::new().with("uid", 1i64).with("name", "A").with("pid", 102i64))
            .with_row(Row::new().with("uid", 2i64).with("name", "B").with("pid", Value::Null))
    }

    fn build(schema: &Schema, table: &Table) -> SchemaIndex {
        SchemaIndex::build(schema, table.columns()).unwrap()
    }

    #[test]
    fn test_deduplication_and_order() {
        let schema = user_post_schema();
        let table = user_post_table();
        let index = build(&schema, &table);

        let out =
            group_and_instantiate(&index, &table, &Passthrough, &RunOptions::default()).unwrap();

        let users = &out.entities[0].instances;
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].field("name"), &Value::from("A"));
        assert_eq!(users[1].field("name"), &Value::from("B"));

        // Null pid row produces no post, and user 2's FK set is empty.
        let posts = &out.entities[1].instances;
        assert_eq!(posts.len(), 2);
        assert_eq!(out.entities[0].relation_keys.rows[0][0].len(), 2);
        assert!(out.entities[0].relation_keys.rows[1][0].is_empty());
    }

    #[test]
    fn test_idempotence() {
        let schema = user_post_schema();
        let table = user_post_table();
        let index = build(&schema, &table);
        let options = RunOptions::default();

        let a = group_and_instantiate(&index, &table, &Passthrough, &options).unwrap();
        let b = group_and_instantiate(&index, &table, &Passthrough, &options).unwrap();

        for (ea, eb) in a.entities.iter().zip(&b.entities) {
            let keys_a: Vec<_> = ea.instances.iter().map(|i| i.key().clone()).collect();
            let keys_b: Vec<_> = eb.instances.iter().map(|i| i.key().clone()).collect();
            assert_eq!(keys_a, keys_b);
        }
    }

    #[test]
    fn test_composite_key_grouping() {
        let schema = Schema::new(vec![
            EntityDef::new("line", ["oid", "line_no"]).with_field("sku")
        ]);
        let table = Table::new(["oid", "line_no", "sku"])
            .with_row(Row::new().with("oid", 1i64).with("line_no", 1i64).with("sku", "a"))
            .with_row(Row::new().with("oid", 1i64).with("line_no", 1i64).with("sku", "a"))
            .with_row(Row::new().with("oid", 1i64).with("line_no", 2i64).with("sku", "b"));
        let index = build(&schema, &table);

        let out =
            group_and_instantiate(&index, &table, &Passthrough, &RunOptions::default()).unwrap();
        assert_eq!(out.entities[0].instances.len(), 2);
    }

    #[test]
    fn test_null_key_component_excludes_row() {
        let schema = Schema::new(vec![EntityDef::new("line", ["oid", "line_no"])]);
        let table = Table::new(["oid", "line_no"])
            .with_row(Row::new().with("oid", 1i64).with("line_no", Value::Null))
            .with_row(Row::new().with("oid", 1i64).with("line_no", 2i64));
        let index = build(&schema, &table);

        let out =
            group_and_instantiate(&index, &table, &Passthrough, &RunOptions::default()).unwrap();
        assert_eq!(out.entities[0].instances.len(), 1);
    }

    struct RejectUser2;

    impl Instantiator for RejectUser2 {
        fn instantiate(&self, entity: &str, record: FieldMap) -> Result<FieldMap, String> {
            if entity == "user" && record.get("uid") == Some(&Value::Int(2)) {
                return Err("uid 2 rejected".to_string());
            }
            Ok(record)
        }
    }

    #[test]
    fn test_instantiation_error_aborts_by_default() {
        let schema = user_post_schema();
        let table = user_post_table();
        let index = build(&schema, &table);

        let err = group_and_instantiate(&index, &table, &RejectUser2, &RunOptions::default())
            .unwrap_err();
        match err {
            InstantiationError::Construction { entity, key, message } => {
                assert_eq!(entity, "user");
                assert_eq!(key, PrimaryKey::new(vec![Value::Int(2)]));
                assert_eq!(message, "uid 2 rejected");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_skip_and_collect_policy() {
        let schema = user_post_schema();
        let table = user_post_table();
        let index = build(&schema, &table);
        let options = RunOptions {
            error_policy: ErrorPolicy::SkipAndCollect,
            ..RunOptions::default()
        };

        let out = group_and_instantiate(&index, &table, &RejectUser2, &options).unwrap();
        assert_eq!(out.entities[0].instances.len(), 1);
        assert_eq!(out.skipped.len(), 1);
        // Relation-key rows stay parallel to the surviving instances.
        assert_eq!(out.entities[0].relation_keys.rows.len(), 1);
    }

    #[test]
    fn test_consistency_check() {
        let schema = Schema::new(vec![EntityDef::new("user", ["uid"]).with_field("name")]);
        let table = Table::new(["uid", "name"])
            .with_row(Row::new().with("uid", 1i64).with("name", "A"))
            .with_row(Row::new().with("uid", 1i64).with("name", "Z"));
        let index = build(&schema, &table);

        // Permissive by default: first value wins.
        let out =
            group_and_instantiate(&index, &table, &Passthrough, &RunOptions::default()).unwrap();
        assert_eq!(out.entities[0].instances[0].field("name"), &Value::from("A"));

        // Opt-in check fails the group.
        let options = RunOptions {
            check_field_consistency: true,
            ..RunOptions::default()
        };
        let err = group_and_instantiate(&index, &table, &Passthrough, &options).unwrap_err();
        assert!(matches!(
            err,
            InstantiationError::InconsistentField { ref field, .. } if field == "name"
        ));
    }
}
