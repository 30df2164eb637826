//! External instantiation capability.
//!
//! Turning a grouped record of scalar values into a typed instance is the
//! caller's concern: validation rules, coercions, and defaulting live behind
//! the [`Instantiator`] trait. The grouping stage hands each entity type's
//! deduplicated records to the instantiator in one batch.

use crate::value::FieldMap;

/// Constructs typed records from grouped scalar values.
///
/// Implementations validate and/or coerce the field map for one entity type
/// and return the field map to store on the instance. An `Err` fails that
/// group only; how the run reacts is governed by the error policy.
pub trait Instantiator: Send + Sync {
    /// Validate and construct a single record.
    ///
    /// # Arguments
    /// * `entity` - Entity-type name the record belongs to
    /// * `record` - Field name to scalar value, primary-key columns included
    ///
    /// # Returns
    /// The (possibly coerced) field map to store, or a validation message.
    fn instantiate(&self, entity: &str, record: FieldMap) -> Result<FieldMap, String>;

    /// Validate and construct a batch of records of one entity type.
    ///
    /// The default implementation applies [`Instantiator::instantiate`] per
    /// record; implementations with batched validation can override it.
    fn instantiate_batch(
        &self,
        entity: &str,
        records: Vec<FieldMap>,
    ) -> Vec<Result<FieldMap, String>> {
        records
            .into_iter()
            .map(|record| self.instantiate(entity, record))
            .collect()
    }
}

/// Instantiator that accepts every record unchanged.
///
/// The default for a [`crate::Reconstructor`]: grouping semantics alone,
/// no validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Instantiator for Passthrough {
    fn instantiate(&self, _entity: &str, record: FieldMap) -> Result<FieldMap, String> {
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use indexmap::IndexMap;

    struct RejectNullName;

    impl Instantiator for RejectNullName {
        fn instantiate(&self, _entity: &str, record: FieldMap) -> Result<FieldMap, String> {
            if record.get("name").map_or(true, Value::is_null) {
                return Err("name must not be null".to_string());
            }
            Ok(record)
        }
    }

    fn record(name: Value) -> FieldMap {
        let mut map = IndexMap::new();
        map.insert("uid".to_string(), Value::Int(1));
        map.insert("name".to_string(), name);
        map
    }

    #[test]
    fn test_passthrough_accepts() {
        let record = record(Value::Null);
        let out = Passthrough.instantiate("user", record.clone()).unwrap();
        assert_eq!(out, record);
    }

    #[test]
    fn test_batch_default_applies_per_record() {
        let results = RejectNullName.instantiate_batch(
            "user",
            vec![record(Value::from("A")), record(Value::Null)],
        );

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err(), "name must not be null");
    }
}
