//! Caller-facing schema descriptors.
//!
//! A [`Schema`] declares the entity types mixed into one flat input: each
//! entity's primary-key columns, scalar field columns, and relationships to
//! other entities. Descriptors are plain data; they are validated against a
//! concrete input's column list by the schema index, not here.
//!
//! Schemas can be built programmatically or loaded from YAML:
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

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Cardinality of a relationship slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// The slot holds at most one related instance.
    One,
    /// The slot holds an ordered list of related instances.
    Many,
}

/// The reciprocal attribute set on the related entity when a relationship
/// is linked.
///
/// Cardinality is declared, not inferred: the target entity gets a typed
/// slot for the back-reference at schema-index construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reciprocal {
    pub attribute: String,
    pub cardinality: Cardinality,
}

/// A declared relationship from one entity type to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipDef {
    /// Name of the related entity type.
    pub target: String,
    /// Whether the owning attribute holds one instance or a list.
    pub cardinality: Cardinality,
    /// Local foreign-key column(s) in the flat input referencing the target
    /// entity's primary key. Arity must match the target's key arity.
    pub key_columns: Vec<String>,
    /// Attribute name the resolved instance(s) are assigned to on the
    /// owning entity.
    pub attribute: String,
    /// Optional back-reference set on the target side.
    #[serde(default)]
    pub reciprocal: Option<Reciprocal>,
}

impl RelationshipDef {
    /// Declare a to-one relationship over a single foreign-key column.
    pub fn to_one(
        target: impl Into<String>,
        key_column: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            cardinality: Cardinality::One,
            key_columns: vec![key_column.into()],
            attribute: attribute.into(),
            reciprocal: None,
        }
    }

    /// Declare a to-many relationship over a single foreign-key column.
    pub fn to_many(
        target: impl Into<String>,
        key_column: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            cardinality: Cardinality::Many,
            key_columns: vec![key_column.into()],
            attribute: attribute.into(),
            reciprocal: None,
        }
    }

    /// Replace the foreign-key columns (for composite keys).
    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Declare the reciprocal attribute on the target entity.
    pub fn with_reciprocal(mut self, attribute: impl Into<String>, cardinality: Cardinality) -> Self {
        self.reciprocal = Some(Reciprocal {
            attribute: attribute.into(),
            cardinality,
        });
        self
    }
}

/// One entity type mixed into the flat input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDef {
    /// Logical table name; keys the output instance collection.
    pub name: String,
    /// Primary-key column names, in declared order (composite keys allowed).
    pub primary_key: Vec<String>,
    /// Non-key scalar field columns.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Declared relationships owned by this entity.
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
}

impl EntityDef {
    pub fn new<I, S>(name: impl Into<String>, primary_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            primary_key: primary_key.into_iter().map(Into::into).collect(),
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipDef) -> Self {
        self.relationships.push(relationship);
        self
    }
}

/// The full set of entity descriptors for one input shape.
///
/// A schema is immutable once constructed and reusable across runs; all
/// per-run state lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub entities: Vec<EntityDef>,
}

impl Schema {
    pub fn new(entities: Vec<EntityDef>) -> Self {
        Self { entities }
    }

    /// Look up an entity descriptor by name.
    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Declared entity names, in declaration order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.name.as_str())
    }

    /// Parse a schema from a YAML string.
    ///
    /// # Errors
    /// Returns an error if the YAML does not match the descriptor shape.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse schema YAML: {}", e))
    }

    /// Load a schema from a YAML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read schema file {}: {}", path.display(), e))?;
        Self::from_yaml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let schema = Schema::new(vec![
            EntityDef::new("user", ["uid"]).with_field("name").with_relationship(
                RelationshipDef::to_many("post", "pid", "posts")
                    .with_reciprocal("user", Cardinality::One),
            ),
            EntityDef::new("post", ["pid"]),
        ]);

        let user = schema.entity("user").unwrap();
        assert_eq!(user.primary_key, vec!["uid"]);
        assert_eq!(user.fields, vec!["name"]);
        assert_eq!(user.relationships.len(), 1);

        let rel = &user.relationships[0];
        assert_eq!(rel.target, "post");
        assert_eq!(rel.cardinality, Cardinality::Many);
        assert_eq!(rel.reciprocal.as_ref().unwrap().attribute, "user");
        assert!(schema.entity("comment").is_none());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
entities:
  - name: user
    primary_key: [uid]
    fields: [name]
    relationships:
      - target: post
        cardinality: many
        key_columns: [pid]
        attribute: posts
        reciprocal:
          attribute: user
          cardinality: one
  - name: post
    primary_key: [pid]
"#;
        let schema = Schema::from_yaml_str(yaml).unwrap();

        assert_eq!(schema.entities.len(), 2);
        let user = schema.entity("user").unwrap();
        assert_eq!(user.relationships[0].attribute, "posts");
        assert_eq!(
            user.relationships[0].reciprocal.as_ref().unwrap().cardinality,
            Cardinality::One
        );
        let post = schema.entity("post").unwrap();
        assert!(post.fields.is_empty());
        assert!(post.relationships.is_empty());
    }

    #[test]
    fn test_from_yaml_invalid() {
        let err = Schema::from_yaml_str("entities: 42").unwrap_err();
        assert!(err.contains("Failed to parse schema YAML"));
    }
}
