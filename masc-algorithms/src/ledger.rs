use log::{debug, warn};
use masc_core::cloud::{CloudId, CloudStore, FieldId};
use serde::{Deserialize, Serialize};

/// What happens to a tracked scalar field when the [`FieldLedger`] is released. The variants are ordered from the
/// weakest to the strongest claim on the field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldBehavior {
    /// Always removed, even if intermediate fields are kept
    AlwaysRemove,
    /// Removed unless intermediate fields are kept
    CanRemove,
    /// Never removed
    AlwaysKeep,
}

/// A scalar field that was created during the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRecord {
    pub cloud: CloudId,
    pub field: FieldId,
    pub behavior: FieldBehavior,
}

/// Outcome of [`FieldLedger::prepare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedField {
    pub id: FieldId,
    /// `true` if the field was created by this call, `false` if a field with the requested name existed already
    pub created: bool,
}

/// Bookkeeping of the scalar fields created during one run, so that intermediate fields can be cleaned up once the
/// run is done. Fields that existed before the run are never tracked and thus never removed
#[derive(Debug, Default)]
pub struct FieldLedger {
    records: Vec<FieldRecord>,
}

impl FieldLedger {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the field named `name` on `cloud`, creating it (filled with NaN) if it does not exist. A created field
    /// is tracked with the given `behavior`. If the field exists and is tracked with a weaker behavior, the behavior
    /// is raised to `behavior`
    pub fn prepare(
        &mut self,
        store: &mut CloudStore,
        cloud: CloudId,
        name: &str,
        behavior: FieldBehavior,
    ) -> PreparedField {
        let target = store.cloud_mut(cloud);
        if let Some(id) = target.field_id(name) {
            if let Some(record) = self.record_mut(cloud, id) {
                record.behavior = record.behavior.max(behavior);
            }
            return PreparedField { id, created: false };
        }

        // The name is free, so adding can't fail
        let id = match target.add_field(name) {
            Some(id) => id,
            None => unreachable!("field {} appeared concurrently", name),
        };
        debug!("Created scalar field '{}' on {}", name, target.name());
        self.records.push(FieldRecord {
            cloud,
            field: id,
            behavior,
        });
        PreparedField { id, created: true }
    }

    fn record_mut(&mut self, cloud: CloudId, field: FieldId) -> Option<&mut FieldRecord> {
        self.records
            .iter_mut()
            .find(|record| record.cloud == cloud && record.field == field)
    }

    /// Sets the behavior of a tracked field. Returns `false` if the field is not tracked
    pub fn upgrade(&mut self, cloud: CloudId, field: FieldId, behavior: FieldBehavior) -> bool {
        match self.record_mut(cloud, field) {
            Some(record) => {
                record.behavior = behavior;
                true
            }
            None => false,
        }
    }

    /// Returns the behavior of the given field, or `None` if it is not tracked
    pub fn behavior(&self, cloud: CloudId, field: FieldId) -> Option<FieldBehavior> {
        self.records
            .iter()
            .find(|record| record.cloud == cloud && record.field == field)
            .map(|record| record.behavior)
    }

    pub fn is_tracked(&self, cloud: CloudId, field: FieldId) -> bool {
        self.behavior(cloud, field).is_some()
    }

    pub fn records(&self) -> &[FieldRecord] {
        &self.records
    }

    /// Removes the tracked fields from their clouds: `AlwaysRemove` fields in any case, `CanRemove` fields unless
    /// `keep_all` is set. Afterwards the ledger is empty. Returns the number of removed fields
    pub fn release(&mut self, store: &mut CloudStore, keep_all: bool) -> usize {
        let mut removed = 0;
        for record in self.records.drain(..) {
            let remove = match record.behavior {
                FieldBehavior::AlwaysRemove => true,
                FieldBehavior::CanRemove => !keep_all,
                FieldBehavior::AlwaysKeep => false,
            };
            if !remove {
                continue;
            }
            let cloud = store.cloud_mut(record.cloud);
            match cloud.remove_field(record.field) {
                Some(field) => {
                    debug!("Removed scalar field '{}' from {}", field.name(), cloud.name());
                    removed += 1;
                }
                None => warn!(
                    "Scalar field {} of {} was already removed",
                    record.field,
                    cloud.name()
                ),
            }
        }
        removed
    }
}
