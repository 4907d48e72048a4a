//! In-memory `event` table.
//!
//! Applies the guarded upsert with the same semantics as
//! `INSERT ... ON CONFLICT (id) DO UPDATE SET ... WHERE event.version < $6`:
//! a missing key is inserted, an existing key is overwritten only when the
//! guard version is strictly greater than the stored one.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::model::EventRow;

/// The six parameters of the guarded upsert, already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedUpsert {
    /// Row inserted when the key is absent (`$1`, `$2`, `$3`).
    pub insert: EventRow,
    /// `SET name = $4`.
    pub update_name: String,
    /// `SET version = $5`.
    pub update_version: i64,
    /// `WHERE event.version < $6`.
    pub guard_version: i64,
}

impl GuardedUpsert {
    /// The harness binding: name and version repeated across both branches.
    #[must_use]
    pub fn from_row(row: &EventRow) -> Self {
        Self {
            insert: row.clone(),
            update_name: row.name.clone(),
            update_version: row.version,
            guard_version: row.version,
        }
    }
}

/// What a guarded upsert did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertEffect {
    Inserted,
    Updated,
    /// Conflict with a row whose version is not lower than the guard.
    Unchanged,
}

impl UpsertEffect {
    /// Row count a database reports for the statement.
    #[must_use]
    pub const fn rows_affected(self) -> u64 {
        match self {
            Self::Inserted | Self::Updated => 1,
            Self::Unchanged => 0,
        }
    }
}

/// Rows keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventTable {
    rows: BTreeMap<Uuid, EventRow>,
}

impl EventTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a guarded upsert.
    pub fn apply(&mut self, upsert: &GuardedUpsert) -> UpsertEffect {
        match self.rows.get_mut(&upsert.insert.id) {
            None => {
                self.rows
                    .insert(upsert.insert.id, upsert.insert.clone());
                UpsertEffect::Inserted
            }
            Some(existing) if existing.version < upsert.guard_version => {
                existing.name.clone_from(&upsert.update_name);
                existing.version = upsert.update_version;
                UpsertEffect::Updated
            }
            Some(existing) => {
                tracing::trace!(
                    id = %existing.id,
                    stored = existing.version,
                    incoming = upsert.guard_version,
                    "stale upsert left row unchanged"
                );
                UpsertEffect::Unchanged
            }
        }
    }

    /// Upsert `row` unless a row with an equal or higher version exists.
    pub fn upsert_if_newer(&mut self, row: &EventRow) -> UpsertEffect {
        self.apply(&GuardedUpsert::from_row(row))
    }

    /// Preview the effect of `upsert` without modifying the table.
    #[must_use]
    pub fn effect_of(&self, upsert: &GuardedUpsert) -> UpsertEffect {
        match self.rows.get(&upsert.insert.id) {
            None => UpsertEffect::Inserted,
            Some(existing) if existing.version < upsert.guard_version => UpsertEffect::Updated,
            Some(_) => UpsertEffect::Unchanged,
        }
    }

    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<&EventRow> {
        self.rows.get(id)
    }

    /// All rows in id order.
    pub fn rows(&self) -> impl Iterator<Item = &EventRow> {
        self.rows.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NAME: &str = "First event";

    #[test]
    fn test_sequential_ascent_drops_stale_write() {
        let id = Uuid::new_v4();
        let mut table = EventTable::new();

        assert_eq!(
            table.upsert_if_newer(&EventRow::new(id, NAME, 1)),
            UpsertEffect::Inserted
        );
        assert_eq!(
            table.upsert_if_newer(&EventRow::new(id, NAME, 2)),
            UpsertEffect::Updated
        );
        assert_eq!(
            table.upsert_if_newer(&EventRow::new(id, NAME, 1)),
            UpsertEffect::Unchanged
        );
        assert_eq!(table.get(&id), Some(&EventRow::new(id, NAME, 2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_equal_version_does_not_overwrite() {
        let id = Uuid::new_v4();
        let mut table = EventTable::new();
        table.upsert_if_newer(&EventRow::new(id, "original", 4));

        let effect = table.upsert_if_newer(&EventRow::new(id, "replacement", 4));

        assert_eq!(effect, UpsertEffect::Unchanged);
        assert_eq!(effect.rows_affected(), 0);
        assert_eq!(table.get(&id).unwrap().name, "original");
    }

    #[test]
    fn test_newer_version_replaces_name() {
        let id = Uuid::new_v4();
        let mut table = EventTable::new();
        table.upsert_if_newer(&EventRow::new(id, "old", 1));
        table.upsert_if_newer(&EventRow::new(id, "new", 9));
        assert_eq!(table.get(&id), Some(&EventRow::new(id, "new", 9)));
    }

    #[test]
    fn test_guard_uses_sixth_parameter() {
        let id = Uuid::new_v4();
        let mut table = EventTable::new();
        table.upsert_if_newer(&EventRow::new(id, NAME, 10));

        // Update branch values are high but the guard is not.
        let upsert = GuardedUpsert {
            insert: EventRow::new(id, NAME, 50),
            update_name: "ignored".to_string(),
            update_version: 50,
            guard_version: 10,
        };
        assert_eq!(table.effect_of(&upsert), UpsertEffect::Unchanged);
        assert_eq!(table.apply(&upsert), UpsertEffect::Unchanged);
        assert_eq!(table.get(&id).unwrap().version, 10);
    }

    #[test]
    fn test_keys_are_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut table = EventTable::new();
        table.upsert_if_newer(&EventRow::new(a, NAME, 3));
        table.upsert_if_newer(&EventRow::new(b, NAME, 1));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&a).unwrap().version, 3);
        assert_eq!(table.get(&b).unwrap().version, 1);
    }

    proptest! {
        #[test]
        fn prop_any_order_converges_to_max(versions in prop::collection::vec(0_i64..1_000, 1..64)) {
            let id = Uuid::new_v4();
            let mut table = EventTable::new();
            for version in &versions {
                table.upsert_if_newer(&EventRow::new(id, NAME, *version));
            }
            let max = versions.iter().copied().max().unwrap();
            prop_assert_eq!(table.len(), 1);
            prop_assert_eq!(table.get(&id).map(|row| row.version), Some(max));
        }

        #[test]
        fn prop_version_never_decreases(versions in prop::collection::vec(any::<i64>(), 1..64)) {
            let id = Uuid::new_v4();
            let mut table = EventTable::new();
            let mut high_water = i64::MIN;
            for version in versions {
                table.upsert_if_newer(&EventRow::new(id, NAME, version));
                let stored = table.get(&id).unwrap().version;
                prop_assert!(stored >= high_water);
                high_water = stored;
            }
        }
    }
}
