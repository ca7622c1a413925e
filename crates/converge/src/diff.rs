//! Diff computation between the database and cloud views of one entity type

use serde::Serialize;
use std::collections::HashMap;
use std::ops::Add;

/// An entity present on both sides whose views disagree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changed<T> {
    pub db: T,
    pub cloud: T,
}

/// Partition of two entity lists by identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDiff<T> {
    /// Only in the database
    pub db_only: Vec<T>,
    /// Only in the cloud
    pub cloud_only: Vec<T>,
    /// On both sides, not equal
    pub changed: Vec<Changed<T>>,
}

impl<T> Default for EntityDiff<T> {
    fn default() -> Self {
        Self {
            db_only: Vec::new(),
            cloud_only: Vec::new(),
            changed: Vec::new(),
        }
    }
}

impl<T> EntityDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.db_only.is_empty() && self.cloud_only.is_empty() && self.changed.is_empty()
    }

    pub fn counts(&self) -> DiffCounts {
        DiffCounts {
            db_only: self.db_only.len(),
            cloud_only: self.cloud_only.len(),
            changed: self.changed.len(),
        }
    }
}

/// Sizes of the three diff partitions; the loop uses this triple to detect stalls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct DiffCounts {
    pub db_only: usize,
    pub cloud_only: usize,
    pub changed: usize,
}

impl DiffCounts {
    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }

    pub fn total(&self) -> usize {
        self.db_only + self.cloud_only + self.changed
    }
}

impl Add for DiffCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            db_only: self.db_only + rhs.db_only,
            cloud_only: self.cloud_only + rhs.cloud_only,
            changed: self.changed + rhs.changed,
        }
    }
}

/// Compute the diff between database and cloud entities
///
/// Entities are matched by `id_of`. When one side lists the same id more than
/// once, the last occurrence wins and the earlier ones are ignored. Output
/// order follows the input order of the side each entity came from.
pub fn find_diff<T, I, E>(db: Vec<T>, cloud: Vec<T>, id_of: I, equals: E) -> EntityDiff<T>
where
    I: Fn(&T) -> String,
    E: Fn(&T, &T) -> bool,
{
    let db_ids: Vec<String> = db.iter().map(&id_of).collect();
    let cloud_ids: Vec<String> = cloud.iter().map(&id_of).collect();

    let db_index = last_positions(&db_ids);
    let cloud_index = last_positions(&cloud_ids);

    let mut cloud_slots: Vec<Option<T>> = cloud.into_iter().map(Some).collect();
    let mut diff = EntityDiff::default();

    for (pos, (entity, id)) in db.into_iter().zip(&db_ids).enumerate() {
        if db_index.get(id.as_str()) != Some(&pos) {
            continue;
        }
        let counterpart = cloud_index
            .get(id.as_str())
            .and_then(|&at| cloud_slots.get_mut(at))
            .and_then(Option::take);

        match counterpart {
            None => diff.db_only.push(entity),
            Some(cloud_entity) => {
                if !equals(&entity, &cloud_entity) {
                    diff.changed.push(Changed {
                        db: entity,
                        cloud: cloud_entity,
                    });
                }
            }
        }
    }

    for (pos, (slot, id)) in cloud_slots.into_iter().zip(&cloud_ids).enumerate() {
        if let Some(entity) = slot
            && cloud_index.get(id.as_str()) == Some(&pos)
        {
            diff.cloud_only.push(entity);
        }
    }

    diff
}

/// Map each id to the position of its last occurrence
fn last_positions(ids: &[String]) -> HashMap<&str, usize> {
    ids.iter()
        .enumerate()
        .map(|(pos, id)| (id.as_str(), pos))
        .collect()
}
