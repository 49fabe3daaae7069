use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::{EntityType, SyncableRecord};
use crate::error::{SyncError, SyncResult};

/// A relation field and the entity type it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
	pub field: String,
	pub target: EntityType,
}

/// One syncable entity type and its outbound relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
	pub entity: EntityType,
	#[serde(default)]
	pub relations: Vec<RelationSpec>,
}

impl EntityDescriptor {
	pub fn new(entity: impl Into<EntityType>) -> Self {
		Self {
			entity: entity.into(),
			relations: Vec::new(),
		}
	}

	pub fn relation(mut self, field: impl Into<String>, target: impl Into<EntityType>) -> Self {
		self.relations.push(RelationSpec {
			field: field.into(),
			target: target.into(),
		});
		self
	}

	pub fn relation_spec(&self, field: &str) -> Option<&RelationSpec> {
		self.relations.iter().find(|r| r.field == field)
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
	#[error("entity type `{0}` is registered twice")]
	Duplicate(EntityType),
	#[error("`{entity}.{field}` points at unknown entity type `{target}`")]
	UnknownTarget {
		entity: EntityType,
		field: String,
		target: EntityType,
	},
	#[error("`{entity}.{field}` points at `{target}`, which is registered after it")]
	OutOfOrder {
		entity: EntityType,
		field: String,
		target: EntityType,
	},
}

/// Entity types in dependency order: a type always comes after every type it
/// relates to, so batch jobs that walk the registry front to back never push
/// or pull a record before its relation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRegistry {
	entries: Vec<EntityDescriptor>,
	index: HashMap<EntityType, usize>,
}

impl EntityRegistry {
	pub fn new(entries: Vec<EntityDescriptor>) -> Result<Self, RegistryError> {
		let mut index = HashMap::with_capacity(entries.len());
		for (pos, d) in entries.iter().enumerate() {
			if index.insert(d.entity.clone(), pos).is_some() {
				return Err(RegistryError::Duplicate(d.entity.clone()));
			}
		}

		for (pos, d) in entries.iter().enumerate() {
			for rel in &d.relations {
				match index.get(&rel.target) {
					None => {
						return Err(RegistryError::UnknownTarget {
							entity: d.entity.clone(),
							field: rel.field.clone(),
							target: rel.target.clone(),
						});
					}
					// Self references are allowed; ordering within a type is by id.
					Some(&target_pos) if target_pos > pos => {
						return Err(RegistryError::OutOfOrder {
							entity: d.entity.clone(),
							field: rel.field.clone(),
							target: rel.target.clone(),
						});
					}
					Some(_) => {}
				}
			}
		}

		Ok(Self { entries, index })
	}

	/// The MassHealth schema in the order the original sync commands used.
	pub fn masshealth() -> Self {
		let entries = vec![
			EntityDescriptor::new("CustomUser"),
			EntityDescriptor::new("UserMetadata").relation("user", "CustomUser"),
			EntityDescriptor::new("MuscleGroup"),
			EntityDescriptor::new("FriendRequest")
				.relation("from_user", "CustomUser")
				.relation("to_user", "CustomUser"),
			EntityDescriptor::new("Routine").relation("user", "CustomUser"),
			EntityDescriptor::new("Workout").relation("muscle_group", "MuscleGroup"),
			EntityDescriptor::new("RoutineWorkout")
				.relation("routine", "Routine")
				.relation("workout", "Workout"),
			EntityDescriptor::new("Challenge").relation("user", "CustomUser"),
			EntityDescriptor::new("FitnessGoal"),
			EntityDescriptor::new("ConditionOrInjury"),
			EntityDescriptor::new("UserCondition")
				.relation("user", "CustomUser")
				.relation("condition", "ConditionOrInjury"),
			EntityDescriptor::new("UserFitnessGoal")
				.relation("user", "CustomUser")
				.relation("goal", "FitnessGoal"),
		];
		// The list above is ordered by hand; a mistake is a programming error.
		Self::new(entries).unwrap_or_else(|e| panic!("built-in registry is invalid: {}", e))
	}

	pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
		self.entries.iter()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn get(&self, name: &str) -> Option<&EntityDescriptor> {
		self.index.get(name).map(|&pos| &self.entries[pos])
	}

	pub fn position(&self, name: &str) -> Option<usize> {
		self.index.get(name).copied()
	}

	pub fn descriptor(&self, entity: &EntityType) -> SyncResult<&EntityDescriptor> {
		self.get(entity.as_str())
			.ok_or_else(|| SyncError::UnknownEntityType(entity.to_string()))
	}

	/// Checks that a record only uses declared relation fields and does not
	/// set a relation as a scalar field.
	pub fn validate(&self, record: &SyncableRecord) -> SyncResult<&EntityDescriptor> {
		let descriptor = self.descriptor(&record.entity)?;
		for field in record.relations.keys() {
			if descriptor.relation_spec(field).is_none() {
				return Err(SyncError::Validation(format!(
					"{} has no relation field `{}`",
					record.entity, field
				)));
			}
		}
		if let Some(clash) = record
			.fields
			.keys()
			.find(|k| descriptor.relation_spec(k).is_some())
		{
			return Err(SyncError::Validation(format!(
				"{}.{} is a relation and cannot be set as a scalar field",
				record.entity, clash
			)));
		}
		Ok(descriptor)
	}
}

impl Default for EntityRegistry {
	fn default() -> Self {
		Self::masshealth()
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::model::RecordId;

	#[test]
	fn masshealth_registry_is_dependency_ordered() {
		let reg = EntityRegistry::masshealth();
		assert_eq!(reg.len(), 12);
		for d in reg.iter() {
			let pos = reg.position(d.entity.as_str()).unwrap();
			for rel in &d.relations {
				assert!(reg.position(rel.target.as_str()).unwrap() <= pos);
			}
		}
		assert!(reg.position("MuscleGroup") < reg.position("Workout"));
		assert!(reg.position("Workout") < reg.position("RoutineWorkout"));
	}

	#[test]
	fn rejects_dependency_registered_later() {
		let err = EntityRegistry::new(vec![
			EntityDescriptor::new("Workout").relation("muscle_group", "MuscleGroup"),
			EntityDescriptor::new("MuscleGroup"),
		])
		.unwrap_err();
		assert!(matches!(err, RegistryError::OutOfOrder { .. }));
	}

	#[test]
	fn rejects_unknown_target_and_duplicates() {
		let err = EntityRegistry::new(vec![
			EntityDescriptor::new("Routine").relation("user", "CustomUser"),
		])
		.unwrap_err();
		assert!(matches!(err, RegistryError::UnknownTarget { .. }));

		let err = EntityRegistry::new(vec![
			EntityDescriptor::new("FitnessGoal"),
			EntityDescriptor::new("FitnessGoal"),
		])
		.unwrap_err();
		assert_eq!(err, RegistryError::Duplicate(EntityType::new("FitnessGoal")));
	}

	#[test]
	fn validate_rejects_undeclared_relation() {
		let reg = EntityRegistry::masshealth();
		let ok = SyncableRecord::new("Workout").relation("muscle_group", Some(RecordId::new()));
		assert!(reg.validate(&ok).is_ok());

		let bad = SyncableRecord::new("Workout").relation("routine", Some(RecordId::new()));
		assert!(matches!(reg.validate(&bad), Err(SyncError::Validation(_))));

		let unknown = SyncableRecord::new("HealthRecord");
		assert!(matches!(
			reg.validate(&unknown),
			Err(SyncError::UnknownEntityType(_))
		));
	}
}
