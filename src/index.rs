//! Schema index: static, validated view of a schema against one input shape.
//!
//! Built once per (schema, column list) pair, before any row is touched. The
//! index confirms that every entity's primary-key columns and every
//! relationship's foreign-key columns are present in the input, checks
//! foreign-key arity against the target key, and resolves every relationship
//! attribute (including reciprocal attributes) to a fixed, numbered
//! relation slot on its entity. Later stages address slots by index, never
//! by attribute-name lookup.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::schema::{Cardinality, Schema};

/// Malformed or incomplete schema relative to the input's columns.
///
/// Raised eagerly during index construction; fatal, aborts before any row
/// processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    MissingPrimaryKeyColumn {
        entity: String,
        column: String,
    },
    MissingRelationshipKeyColumn {
        entity: String,
        attribute: String,
        column: String,
    },
    ForeignKeyArityMismatch {
        entity: String,
        attribute: String,
        expected: usize,
        actual: usize,
    },
    UnknownTargetEntity {
        entity: String,
        attribute: String,
        target: String,
    },
    DuplicateRelationAttribute {
        entity: String,
        attribute: String,
    },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::MissingPrimaryKeyColumn { entity, column } => {
                write!(
                    f,
                    "Missing primary key column '{}' for entity '{}'",
                    column, entity
                )
            }
            SchemaError::MissingRelationshipKeyColumn {
                entity,
                attribute,
                column,
            } => {
                write!(
                    f,
                    "Missing relationship key column '{}' for '{}.{}'",
                    column, entity, attribute
                )
            }
            SchemaError::ForeignKeyArityMismatch {
                entity,
                attribute,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Foreign key arity mismatch on '{}.{}': target key has {} column(s), {} declared",
                    entity, attribute, expected, actual
                )
            }
            SchemaError::UnknownTargetEntity {
                entity,
                attribute,
                target,
            } => {
                write!(
                    f,
                    "Relationship '{}.{}' targets undeclared entity '{}'",
                    entity, attribute, target
                )
            }
            SchemaError::DuplicateRelationAttribute { entity, attribute } => {
                write!(
                    f,
                    "Duplicate relationship attribute '{}' on entity '{}'",
                    attribute, entity
                )
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// One relation slot on an entity: attribute name plus cardinality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDef {
    pub attribute: String,
    pub cardinality: Cardinality,
}

/// Link plan for one declared relationship, fully resolved to indices.
#[derive(Debug, Clone)]
pub struct RelationPlan {
    /// Index of the target entity within the schema index.
    pub target: usize,
    pub cardinality: Cardinality,
    /// Local foreign-key columns, in target-key component order.
    pub key_columns: Vec<String>,
    /// Slot on the owning entity receiving the resolved instance(s).
    pub slot: usize,
    /// Slot on the target entity receiving the back-reference, if declared.
    pub reciprocal_slot: Option<usize>,
}

/// Validated, index-resolved view of one entity type.
#[derive(Debug, Clone)]
pub struct EntityIndex {
    pub name: String,
    /// Primary-key columns, in declared order. All present in the input.
    pub primary_key: Vec<String>,
    /// Declared scalar fields actually present in the input.
    pub scalar_fields: Vec<String>,
    /// Link plans for this entity's declared relationships.
    pub relations: Vec<RelationPlan>,
    /// All relation slots on this entity (own attributes plus reciprocals
    /// targeted here), addressed by index.
    pub slots: Vec<SlotDef>,
    slot_lookup: HashMap<String, usize>,
}

impl EntityIndex {
    /// Resolve a relation attribute name to its slot index.
    pub fn slot_index(&self, attribute: &str) -> Option<usize> {
        self.slot_lookup.get(attribute).copied()
    }
}

/// Static indices shared by the grouping and linking stages.
#[derive(Debug, Clone)]
pub struct SchemaIndex {
    entities: Vec<EntityIndex>,
    by_name: HashMap<String, usize>,
}

impl SchemaIndex {
    /// Validate a schema against an input's column list and resolve all
    /// relation slots.
    ///
    /// # Errors
    /// Returns a [`SchemaError`] if any primary-key or foreign-key column is
    /// absent from the input, a relationship targets an undeclared entity,
    /// foreign-key arity does not match the target key, or two relation
    /// attributes collide on one entity.
    pub fn build(schema: &Schema, columns: &[String]) -> Result<Self, SchemaError> {
        let present: HashSet<&str> = columns.iter().map(String::as_str).collect();

        let by_name: HashMap<String, usize> = schema
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();

        // First pass: validate columns and allocate slots for each entity's
        // own relationship attributes.
        let mut entities: Vec<EntityIndex> = Vec::with_capacity(schema.entities.len());
        for def in &schema.entities {
            for column in &def.primary_key {
                if !present.contains(column.as_str()) {
                    return Err(SchemaError::MissingPrimaryKeyColumn {
                        entity: def.name.clone(),
                        column: column.clone(),
                    });
                }
            }

            let scalar_fields: Vec<String> = def
                .fields
                .iter()
                .filter(|f| present.contains(f.as_str()))
                .cloned()
                .collect();

            let mut slots = Vec::new();
            let mut slot_lookup = HashMap::new();
            for rel in &def.relationships {
                let target_idx = *by_name.get(&rel.target).ok_or_else(|| {
                    SchemaError::UnknownTargetEntity {
                        entity: def.name.clone(),
                        attribute: rel.attribute.clone(),
                        target: rel.target.clone(),
                    }
                })?;

                let target_key_len = schema.entities[target_idx].primary_key.len();
                if rel.key_columns.len() != target_key_len {
                    return Err(SchemaError::ForeignKeyArityMismatch {
                        entity: def.name.clone(),
                        attribute: rel.attribute.clone(),
                        expected: target_key_len,
                        actual: rel.key_columns.len(),
                    });
                }

                for column in &rel.key_columns {
                    if !present.contains(column.as_str()) {
                        return Err(SchemaError::MissingRelationshipKeyColumn {
                            entity: def.name.clone(),
                            attribute: rel.attribute.clone(),
                            column: column.clone(),
                        });
                    }
                }

                if slot_lookup
                    .insert(rel.attribute.clone(), slots.len())
                    .is_some()
                {
                    return Err(SchemaError::DuplicateRelationAttribute {
                        entity: def.name.clone(),
                        attribute: rel.attribute.clone(),
                    });
                }
                slots.push(SlotDef {
                    attribute: rel.attribute.clone(),
                    cardinality: rel.cardinality,
                });
            }

            entities.push(EntityIndex {
                name: def.name.clone(),
                primary_key: def.primary_key.clone(),
                scalar_fields,
                relations: Vec::new(),
                slots,
                slot_lookup,
            });
        }

        // Second pass: allocate reciprocal slots on target entities and
        // finalize link plans.
        for (owner_idx, def) in schema.entities.iter().enumerate() {
            let mut relations = Vec::with_capacity(def.relationships.len());
            for rel in &def.relationships {
                let target_idx = by_name[&rel.target];
                let slot = entities[owner_idx].slot_lookup[&rel.attribute];

                let reciprocal_slot = match &rel.reciprocal {
                    Some(reciprocal) => {
                        let target = &mut entities[target_idx];
                        let idx = target.slots.len();
                        if target
                            .slot_lookup
                            .insert(reciprocal.attribute.clone(), idx)
                            .is_some()
                        {
                            return Err(SchemaError::DuplicateRelationAttribute {
                                entity: target.name.clone(),
                                attribute: reciprocal.attribute.clone(),
                            });
                        }
                        target.slots.push(SlotDef {
                            attribute: reciprocal.attribute.clone(),
                            cardinality: reciprocal.cardinality,
                        });
                        Some(idx)
                    }
                    None => None,
                };

                relations.push(RelationPlan {
                    target: target_idx,
                    cardinality: rel.cardinality,
                    key_columns: rel.key_columns.clone(),
                    slot,
                    reciprocal_slot,
                });
            }
            entities[owner_idx].relations = relations;
        }

        Ok(Self { entities, by_name })
    }

    /// Entity indices, in schema declaration order.
    pub fn entities(&self) -> &[EntityIndex] {
        &self.entities
    }

    /// Look up an entity index by name.
    pub fn entity(&self, name: &str) -> Option<&EntityIndex> {
        self.by_name.get(name).map(|&i| &self.entities[i])
    }

    /// Position of an entity within the index.
    pub fn entity_position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }
}
