//! Linking: resolve foreign keys into live instance references.
//!
//! A fresh primary-key lookup is built per entity type, then every declared
//! relationship walks the relation-key table produced by grouping and
//! assigns instance references into the owning slot and, when declared,
//! the reciprocal slot on the related side. One pass, no retries; time is
//! linear in instances plus observed foreign keys.
//!
//! Dangling foreign keys (no matching instance, the normal residue of a
//! partial or filtered join) are skipped and reported, never fatal. A
//! to-one reciprocal of a to-many relationship is last-writer-wins when
//! several owners reference the same target; a many reciprocal receives
//! each distinct owner exactly once.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::grouping::EntityGroups;
use crate::index::SchemaIndex;
use crate::instance::{Instance, InstanceRef, RelationSlot};
use crate::schema::Cardinality;
use crate::value::PrimaryKey;

/// Schema/data contract violation detected during linking. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Two instances of one entity type carry equal primary keys. Guarded
    /// invariant: grouping cannot produce this, but the lookup build checks.
    DuplicatePrimaryKey { entity: String, key: PrimaryKey },
    /// A to-one relationship resolved to more than one instance.
    ToOneCardinalityViolation {
        entity: String,
        key: PrimaryKey,
        attribute: String,
        resolved: usize,
    },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::DuplicatePrimaryKey { entity, key } => {
                write!(f, "Duplicate primary key {} for entity '{}'", key, entity)
            }
            LinkError::ToOneCardinalityViolation {
                entity,
                key,
                attribute,
                resolved,
            } => {
                write!(
                    f,
                    "To-one relationship '{}.{}' on {} resolved {} instances",
                    entity, attribute, key, resolved
                )
            }
        }
    }
}

impl std::error::Error for LinkError {}

/// A foreign-key value with no matching instance; skipped during linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    /// Owning entity and instance key.
    pub entity: String,
    pub key: PrimaryKey,
    /// Relationship attribute the value was observed for.
    pub attribute: String,
    /// Target entity and the key that did not resolve.
    pub target: String,
    pub missing: PrimaryKey,
}

/// Wire every declared relationship across the grouped instances.
///
/// Consumes the grouping output and returns the linked instance lists
/// (parallel to the schema index's entities) plus the dangling references
/// encountered.
///
/// # Errors
/// Returns a [`LinkError`] on a duplicate primary key or a to-one
/// relationship resolving to multiple instances; the partially linked
/// instances are dropped with the error.
pub fn link(
    index: &SchemaIndex,
    grouped: Vec<EntityGroups>,
) -> Result<(Vec<Vec<Instance>>, Vec<DanglingReference>), LinkError> {
    let mut instances: Vec<Vec<Instance>> = Vec::with_capacity(grouped.len());
    let mut relation_keys = Vec::with_capacity(grouped.len());
    for groups in grouped {
        instances.push(groups.instances);
        relation_keys.push(groups.relation_keys);
    }

    let lookups = build_lookups(index, &instances)?;
    let mut dangling = Vec::new();

    for (owner_entity, entity) in index.entities().iter().enumerate() {
        for owner_index in 0..instances[owner_entity].len() {
            let owner_ref = InstanceRef {
                entity: owner_entity,
                index: owner_index,
            };

            for (r, relation) in entity.relations.iter().enumerate() {
                let target = &index.entities()[relation.target];

                // Resolve this owner's observed FK tuples, in
                // first-observed order.
                let mut resolved: Vec<InstanceRef> = Vec::new();
                for foreign_key in &relation_keys[owner_entity].rows[owner_index][r] {
                    match lookups[relation.target].get(foreign_key) {
                        Some(&target_index) => resolved.push(InstanceRef {
                            entity: relation.target,
                            index: target_index,
                        }),
                        None => {
                            let owner = &instances[owner_entity][owner_index];
                            debug!(
                                entity = entity.name.as_str(),
                                key = %owner.key(),
                                attribute = entity.slots[relation.slot].attribute.as_str(),
                                missing = %foreign_key,
                                "dangling foreign key"
                            );
                            dangling.push(DanglingReference {
                                entity: entity.name.clone(),
                                key: owner.key().clone(),
                                attribute: entity.slots[relation.slot].attribute.clone(),
                                target: target.name.clone(),
                                missing: foreign_key.clone(),
                            });
                        }
                    }
                }

                match relation.cardinality {
                    Cardinality::One => {
                        if resolved.len() > 1 {
                            let owner = &instances[owner_entity][owner_index];
                            return Err(LinkError::ToOneCardinalityViolation {
                                entity: entity.name.clone(),
                                key: owner.key().clone(),
                                attribute: entity.slots[relation.slot].attribute.clone(),
                                resolved: resolved.len(),
                            });
                        }
                        *instances[owner_entity][owner_index].slot_mut(relation.slot) =
                            RelationSlot::One(resolved.first().copied());
                    }
                    Cardinality::Many => {
                        *instances[owner_entity][owner_index].slot_mut(relation.slot) =
                            RelationSlot::Many(resolved.clone());
                    }
                }

                if let Some(reciprocal_slot) = relation.reciprocal_slot {
                    for target_ref in resolved {
                        let slot = instances[target_ref.entity][target_ref.index]
                            .slot_mut(reciprocal_slot);
                        match slot {
                            // Last writer wins when several owners share
                            // one target.
                            RelationSlot::One(back) => *back = Some(owner_ref),
                            // Each distinct owner exactly once.
                            RelationSlot::Many(backs) => {
                                if !backs.contains(&owner_ref) {
                                    backs.push(owner_ref);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    Ok((instances, dangling))
}

/// Build a primary-key to instance-position lookup per entity type.
fn build_lookups(
    index: &SchemaIndex,
    instances: &[Vec<Instance>],
) -> Result<Vec<HashMap<PrimaryKey, usize>>, LinkError> {
    let mut lookups = Vec::with_capacity(instances.len());
    for (e, entity_instances) in instances.iter().enumerate() {
        let mut lookup = HashMap::with_capacity(entity_instances.len());
        for (i, instance) in entity_instances.iter().enumerate() {
            if lookup.insert(instance.key().clone(), i).is_some() {
                return Err(LinkError::DuplicatePrimaryKey {
                    entity: index.entities()[e].name.clone(),
                    key: instance.key().clone(),
                });
            }
        }
        lookups.push(lookup);
    }
    Ok(lookups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::{group_and_instantiate, RunOptions};
    use crate::instantiate::Passthrough;
    use crate::row::{Row, Table};
    use crate::schema::{EntityDef, RelationshipDef, Schema};
    use crate::value::Value;

    fn linked(schema: &Schema, table: &Table) -> (SchemaIndex, Vec<Vec<Instance>>, Vec<DanglingReference>) {
        let index = SchemaIndex::build(schema, table.columns()).unwrap();
        let out =
            group_and_instantiate(&index, table, &Passthrough, &RunOptions::default()).unwrap();
        let (instances, dangling) = link(&index, out.entities).unwrap();
        (index, instances, dangling)
    }

    fn user_post_schema() -> Schema {
        Schema::new(vec![
            EntityDef::new("user", ["uid"]).with_field("name").with_relationship(
                RelationshipDef::to_many("post", "pid", "posts")
                    .with_reciprocal("user", crate::schema::Cardinality::One),
            ),
            EntityDef::new("post", ["pid"]),
        ])
    }

    #[test]
    fn test_fan_out_and_reciprocal() {
        let table = Table::new(["uid", "name", "pid"])
            .with_row(Row::new().with("uid", 1i64).with("name", "A").with("pid", 101i64))
            .with_row(Row::new().with("uid", 1i64).with("name", "A").with("pid", 102i64))
            .with_row(Row::new().with("uid", 2i64).with("name", "B").with("pid", Value::Null));
        let (_, instances, dangling) = linked(&user_post_schema(), &table);

        assert!(dangling.is_empty());

        // user 1 -> posts [101, 102] in first-observed order
        match instances[0][0].slot(0) {
            RelationSlot::Many(refs) => {
                assert_eq!(refs.len(), 2);
                assert_eq!(refs[0].index, 0);
                assert_eq!(refs[1].index, 1);
            }
            other => panic!("unexpected slot: {:?}", other),
        }
        // user 2 -> no posts
        assert_eq!(instances[0][1].slot(0), &RelationSlot::Many(Vec::new()));
        // each post points back at user 1
        let user1 = InstanceRef { entity: 0, index: 0 };
        assert_eq!(instances[1][0].slot(0), &RelationSlot::One(Some(user1)));
        assert_eq!(instances[1][1].slot(0), &RelationSlot::One(Some(user1)));
    }

    #[test]
    fn test_repeated_pairing_not_duplicated() {
        // The same user/post pairing repeated across rows must yield one
        // back-reference, not two.
        let schema = Schema::new(vec![
            EntityDef::new("post", ["pid"]).with_relationship(
                RelationshipDef::to_one("user", "uid", "user")
                    .with_reciprocal("posts", crate::schema::Cardinality::Many),
            ),
            EntityDef::new("user", ["uid"]),
        ]);
        let table = Table::new(["pid", "uid"])
            .with_row(Row::new().with("pid", 101i64).with("uid", 1i64))
            .with_row(Row::new().with("pid", 101i64).with("uid", 1i64))
            .with_row(Row::new().with("pid", 102i64).with("uid", 1i64));
        let (_, instances, _) = linked(&schema, &table);

        match instances[1][0].slot(0) {
            RelationSlot::Many(backs) => assert_eq!(backs.len(), 2),
            other => panic!("unexpected slot: {:?}", other),
        }
    }

    #[test]
    fn test_one_reciprocal_last_writer_wins() {
        // Two users both claim post 101 through their to-many slot; the
        // post's to-one back-reference keeps whichever owner linked last,
        // here user 2 by schema-declaration order.
        let table = Table::new(["uid", "name", "pid"])
            .with_row(Row::new().with("uid", 1i64).with("name", "A").with("pid", 101i64))
            .with_row(Row::new().with("uid", 2i64).with("name", "B").with("pid", 101i64));
        let (_, instances, dangling) = linked(&user_post_schema(), &table);

        assert!(dangling.is_empty());
        // Both owners hold the post.
        assert_eq!(
            instances[0][0].slot(0),
            &RelationSlot::Many(vec![InstanceRef { entity: 1, index: 0 }])
        );
        assert_eq!(
            instances[0][1].slot(0),
            &RelationSlot::Many(vec![InstanceRef { entity: 1, index: 0 }])
        );
        // The post points back at the second owner only.
        let user2 = InstanceRef { entity: 0, index: 1 };
        assert_eq!(instances[1][0].slot(0), &RelationSlot::One(Some(user2)));
    }

    #[test]
    fn test_dangling_foreign_key_tolerated() {
        let schema = Schema::new(vec![
            EntityDef::new("user", ["uid"]).with_field("name").with_relationship(
                RelationshipDef::to_many("post", "pid", "posts"),
            ),
            EntityDef::new("post", ["other_pid"]),
        ]);
        // pid 999 never materializes as a post: other_pid is null on every
        // row, so no post instance forms.
        let table = Table::new(["uid", "name", "pid", "other_pid"])
            .with_row(Row::new().with("uid", 1i64).with("name", "A").with("pid", 999i64));
        let (_, instances, dangling) = linked(&schema, &table);

        assert_eq!(instances[0][0].slot(0), &RelationSlot::Many(Vec::new()));
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].attribute, "posts");
        assert_eq!(dangling[0].missing, PrimaryKey::new(vec![Value::Int(999)]));
    }

    #[test]
    fn test_to_one_violation() {
        let schema = Schema::new(vec![
            EntityDef::new("post", ["pid"])
                .with_relationship(RelationshipDef::to_one("user", "uid", "user")),
            EntityDef::new("user", ["uid"]),
        ]);
        // One post appearing with two different uids: the to-one FK set has
        // two members, both resolving.
        let table = Table::new(["pid", "uid"])
            .with_row(Row::new().with("pid", 101i64).with("uid", 1i64))
            .with_row(Row::new().with("pid", 101i64).with("uid", 2i64));
        let index = SchemaIndex::build(&schema, table.columns()).unwrap();
        let out =
            group_and_instantiate(&index, &table, &Passthrough, &RunOptions::default()).unwrap();

        let err = link(&index, out.entities).unwrap_err();
        assert!(matches!(
            err,
            LinkError::ToOneCardinalityViolation { resolved: 2, .. }
        ));
    }

    #[test]
    fn test_duplicate_primary_key_guard() {
        let schema = Schema::new(vec![EntityDef::new("user", ["uid"])]);
        let table = Table::new(["uid"]).with_row(Row::new().with("uid", 1i64));
        let index = SchemaIndex::build(&schema, table.columns()).unwrap();
        let out =
            group_and_instantiate(&index, &table, &Passthrough, &RunOptions::default()).unwrap();

        // Force the invariant violation grouping cannot produce.
        let mut groups = out.entities;
        let duplicate = groups[0].instances[0].clone();
        groups[0].instances.push(duplicate);
        groups[0].relation_keys.rows.push(Vec::new());

        let err = link(&index, groups).unwrap_err();
        assert!(matches!(err, LinkError::DuplicatePrimaryKey { .. }));
    }
}
