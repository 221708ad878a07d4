//! In-memory deduplication.
//!
//! These mirror what the storage backends do in SQL and are used where no
//! warehouse is involved: dry runs and replace-mode snapshots.

use std::collections::HashMap;

use crate::{Result, record::CanonicalRecord, value::KeyTuple};

/// Keep one record per dedup key: the one with the greatest freshness,
/// NULL freshness ranking last. Ties go to the record that arrived later.
/// Output preserves the arrival order of the survivors.
pub fn latest_per_dedup_key(
  records: Vec<CanonicalRecord>,
) -> Result<Vec<CanonicalRecord>> {
  keep_per_key(records, CanonicalRecord::dedup_key, |incoming, kept| {
    // `Option` orders `None` first, which is exactly NULLS LAST under a
    // descending sort.
    incoming.freshness() >= kept.freshness()
  })
}

/// Keep the last record per natural key.
pub fn last_per_natural_key(
  records: Vec<CanonicalRecord>,
) -> Result<Vec<CanonicalRecord>> {
  keep_per_key(records, CanonicalRecord::natural_key, |_, _| true)
}

fn keep_per_key(
  records: Vec<CanonicalRecord>,
  key: impl Fn(&CanonicalRecord) -> Result<KeyTuple>,
  replaces: impl Fn(&CanonicalRecord, &CanonicalRecord) -> bool,
) -> Result<Vec<CanonicalRecord>> {
  let mut winners: HashMap<KeyTuple, usize> = HashMap::new();
  let mut slots: Vec<Option<CanonicalRecord>> = Vec::with_capacity(records.len());

  for record in records {
    let k = key(&record)?;
    match winners.get(&k).copied() {
      Some(i) => {
        let beats = slots[i].as_ref().is_none_or(|kept| replaces(&record, kept));
        if beats {
          slots[i] = None;
          winners.insert(k, slots.len());
          slots.push(Some(record));
        }
      }
      None => {
        winners.insert(k, slots.len());
        slots.push(Some(record));
      }
    }
  }

  Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::fixtures::*;

  #[test]
  fn fresher_record_wins_regardless_of_order() {
    let mut older = reservation("r1", "m1");
    older.reservation_updated_at = Some(at(10, 0));
    let mut newer = reservation("r1", "m1");
    newer.reservation_updated_at = Some(at(11, 0));
    newer.reservation_end_at = Some(at(20, 0));

    let out = latest_per_dedup_key(vec![newer.clone().into(), older.into()]).unwrap();
    assert_eq!(out, vec![CanonicalRecord::from(newer)]);
  }

  #[test]
  fn null_freshness_ranks_last() {
    let mut stale = reservation("r1", "m1");
    stale.reservation_updated_at = None;
    let dated = reservation("r1", "m1");

    let out = latest_per_dedup_key(vec![dated.clone().into(), stale.into()]).unwrap();
    assert_eq!(out, vec![CanonicalRecord::from(dated)]);
  }

  #[test]
  fn null_key_components_are_equal() {
    let mut a = reservation("r1", "m1");
    a.event_id = None;
    let mut b = reservation("r1", "m1");
    b.event_id = None;
    b.reservation_updated_at = Some(at(12, 0));
    let c = reservation("r1", "m1");

    let out = latest_per_dedup_key(vec![a.into(), b.clone().into(), c.clone().into()]).unwrap();
    assert_eq!(out, vec![CanonicalRecord::from(b), CanonicalRecord::from(c)]);
  }

  #[test]
  fn natural_key_keeps_last_occurrence() {
    let first = reservation("r1", "m1");
    let mut second = reservation("r1", "m1");
    second.event_id = Some("ev-2".into());
    let other = reservation("r2", "m1");

    let out =
      last_per_natural_key(vec![first.into(), other.clone().into(), second.clone().into()])
        .unwrap();
    assert_eq!(out, vec![CanonicalRecord::from(other), CanonicalRecord::from(second)]);
  }
}
