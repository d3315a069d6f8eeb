use std::cmp::Ordering;
use std::slice;

use serde::{Deserialize, Serialize};

use crate::error::TapeqError;
use crate::telemetry::{self, tags};
use crate::types::{QueryRecord, Result};

/// Number of record slots reserved by [`QueryCollection::new`].
pub const DEFAULT_INITIAL_CAPACITY: usize = 256;

/// Construction options for [`QueryCollection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Record slots reserved up front. Zero is treated as one.
    pub initial_capacity: usize,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

/// What [`QueryCollection::add`] did with an accepted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The record was appended at the end of the collection.
    Appended,
    /// The record replaced an older version of the same object.
    Replaced,
}

#[derive(Debug)]
struct MergeState {
    key: String,
    inserted_secs: i64,
    index: usize,
}

/// Ordered collection of pending restore/archive queries.
///
/// Records keep insertion order until [`sort_for_locality`] reorders them by
/// their position on the medium. In dedup mode the collection keeps only the
/// newest version of each object, which requires callers to feed object keys
/// in non-decreasing order (the order the storage manager returns query
/// results in).
///
/// # Example
/// ```
/// use tapeq_core::{InsertDate, ObjectName, OrderKey, QueryCollection, QueryRecord};
///
/// let mut queries = QueryCollection::new()?;
/// let name = ObjectName::new("/lustre", "/data", "/run1.root");
/// queries.add(
///     QueryRecord::new(name.clone(), InsertDate::new(2024, 1, 1, 0, 0, 0), OrderKey::new(1, 0, 0, 0, 9), ()),
///     true,
/// )?;
/// queries.add(
///     QueryRecord::new(name, InsertDate::new(2024, 2, 1, 0, 0, 0), OrderKey::new(1, 0, 0, 0, 3), ()),
///     true,
/// )?;
/// assert_eq!(queries.len(), 1);
/// assert_eq!(queries.get(0)?.order_key.lo, 3);
/// # Ok::<(), tapeq_core::TapeqError>(())
/// ```
///
/// [`sort_for_locality`]: QueryCollection::sort_for_locality
#[derive(Debug)]
pub struct QueryCollection<P> {
    records: Vec<QueryRecord<P>>,
    last: Option<MergeState>,
}

impl<P> QueryCollection<P> {
    /// Creates an empty collection with [`DEFAULT_INITIAL_CAPACITY`] slots.
    pub fn new() -> Result<Self> {
        Self::with_options(CollectionOptions::default())
    }

    pub fn with_options(options: CollectionOptions) -> Result<Self> {
        let mut records = Vec::new();
        records.try_reserve_exact(options.initial_capacity.max(1))?;
        Ok(Self {
            records,
            last: None,
        })
    }

    /// Adds a record, optionally merging it with the previous version of the
    /// same object.
    ///
    /// With `dedup` disabled the record is always appended. With `dedup`
    /// enabled the record's object key is compared with the last accepted key:
    /// a smaller key fails with [`TapeqError::OrderViolation`], an equal key
    /// replaces the stored record unless it is older
    /// ([`TapeqError::StaleVersion`]), a greater key is appended.
    ///
    /// A rejected record leaves the collection untouched.
    pub fn add(&mut self, record: QueryRecord<P>, dedup: bool) -> Result<AddOutcome> {
        if !dedup {
            self.push(record)?;
            telemetry::increment_counter(tags::METRIC_QUERY_ADD_APPENDED_COUNT, 1);
            return Ok(AddOutcome::Appended);
        }

        let key = record.object_key();
        let inserted_secs = record.inserted_secs();

        if let Some(last) = &self.last {
            match key.cmp(&last.key) {
                Ordering::Less => {
                    telemetry::increment_counter(tags::METRIC_QUERY_ADD_REJECTED_COUNT, 1);
                    tracing::warn!(
                        target: tags::TARGET_QUERY,
                        key = %key,
                        last_key = %last.key,
                        "query key sorts before last added key"
                    );
                    return Err(TapeqError::OrderViolation {
                        last: last.key.clone(),
                        key,
                    });
                }
                Ordering::Equal => {
                    if inserted_secs < last.inserted_secs {
                        telemetry::increment_counter(tags::METRIC_QUERY_ADD_REJECTED_COUNT, 1);
                        tracing::warn!(
                            target: tags::TARGET_QUERY,
                            key = %key,
                            stored = last.inserted_secs,
                            presented = inserted_secs,
                            "query is older than the stored version"
                        );
                        return Err(TapeqError::StaleVersion {
                            key,
                            stored: last.inserted_secs,
                            presented: inserted_secs,
                        });
                    }

                    tracing::info!(
                        target: tags::TARGET_QUERY,
                        key = %key,
                        inserted_at = ?record.inserted_at,
                        "replacing query with newer version"
                    );
                    let index = last.index;
                    self.records[index] = record;
                    self.last = Some(MergeState {
                        key,
                        inserted_secs,
                        index,
                    });
                    telemetry::increment_counter(tags::METRIC_QUERY_ADD_REPLACED_COUNT, 1);
                    return Ok(AddOutcome::Replaced);
                }
                Ordering::Greater => {}
            }
        }

        tracing::debug!(
            target: tags::TARGET_QUERY,
            key = %key,
            inserted_at = ?record.inserted_at,
            "adding new object query"
        );
        let index = self.push(record)?;
        self.last = Some(MergeState {
            key,
            inserted_secs,
            index,
        });
        telemetry::increment_counter(tags::METRIC_QUERY_ADD_APPENDED_COUNT, 1);
        Ok(AddOutcome::Appended)
    }

    /// Returns the record at `index`.
    pub fn get(&self, index: usize) -> Result<&QueryRecord<P>> {
        self.records
            .get(index)
            .ok_or(TapeqError::IndexOutOfRange {
                index,
                len: self.records.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records the collection can hold before it grows again.
    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    pub fn iter(&self) -> slice::Iter<'_, QueryRecord<P>> {
        self.records.iter()
    }

    pub fn records(&self) -> &[QueryRecord<P>] {
        &self.records
    }

    /// Sorts all records by ascending [`OrderKey`](crate::OrderKey) so that
    /// each tape is mounted once and read front to back.
    ///
    /// The sort is stable. It also forgets the last accepted key: records no
    /// longer sit in key order, so dedup merging starts over afterwards.
    pub fn sort_for_locality(&mut self) {
        self.records.sort_by_key(|record| record.order_key);
        self.last = None;
    }

    /// Consumes the collection and returns its records in current order.
    pub fn into_records(self) -> Vec<QueryRecord<P>> {
        self.records
    }

    /// Releases all storage held by the collection.
    pub fn destroy(self) {
        drop(self);
    }

    fn push(&mut self, record: QueryRecord<P>) -> Result<usize> {
        if self.records.len() == self.records.capacity() {
            let additional = self.records.capacity().max(1);
            if let Err(error) = self.records.try_reserve_exact(additional) {
                tracing::warn!(
                    target: tags::TARGET_QUERY,
                    capacity = self.records.capacity(),
                    %error,
                    "failed to grow query collection"
                );
                return Err(error.into());
            }
            telemetry::increment_counter(tags::METRIC_QUERY_GROW_COUNT, 1);
            tracing::debug!(
                target: tags::TARGET_QUERY,
                capacity = self.records.capacity(),
                "query collection grown"
            );
        }

        let index = self.records.len();
        self.records.push(record);
        Ok(index)
    }
}

impl<'a, P> IntoIterator for &'a QueryCollection<P> {
    type Item = &'a QueryRecord<P>;
    type IntoIter = slice::Iter<'a, QueryRecord<P>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl<P> IntoIterator for QueryCollection<P> {
    type Item = QueryRecord<P>;
    type IntoIter = std::vec::IntoIter<QueryRecord<P>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
