use serde::{Deserialize, Serialize};

use crate::error::TapeqError;

pub type Result<T> = std::result::Result<T, TapeqError>;

/// Storage-manager object name split into its three path components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ObjectName {
    /// Filesystem space name.
    pub fs: String,
    /// High-level (directory) part of the path.
    pub hl: String,
    /// Low-level (file) part of the path.
    pub ll: String,
}

impl ObjectName {
    pub fn new(fs: impl Into<String>, hl: impl Into<String>, ll: impl Into<String>) -> Self {
        Self {
            fs: fs.into(),
            hl: hl.into(),
            ll: ll.into(),
        }
    }

    /// Composite identity used for duplicate detection.
    pub fn key(&self) -> String {
        let mut key = String::with_capacity(self.fs.len() + self.hl.len() + self.ll.len());
        key.push_str(&self.fs);
        key.push_str(&self.hl);
        key.push_str(&self.ll);
        key
    }
}

/// Insertion date as reported by the storage manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InsertDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl InsertDate {
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    /// Weighted seconds value used to decide which of two versions is newer.
    ///
    /// Not a calendar conversion: every month weighs 31 days.
    pub fn pseudo_seconds(&self) -> i64 {
        i64::from(self.second)
            + i64::from(self.minute) * 60
            + i64::from(self.hour) * 3_600
            + i64::from(self.day) * 86_400
            + i64::from(self.month) * 2_678_400
            + i64::from(self.year) * 977_616_000
    }
}

/// Physical position of an object on its medium.
///
/// Field order defines the comparison priority, so the derived `Ord` is the
/// lexicographic order over `(top, hi_hi, hi_lo, hi, lo)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct OrderKey {
    pub top: u16,
    pub hi_hi: u32,
    pub hi_lo: u32,
    pub hi: u32,
    pub lo: u32,
}

impl OrderKey {
    pub fn new(top: u16, hi_hi: u32, hi_lo: u32, hi: u32, lo: u32) -> Self {
        Self {
            top,
            hi_hi,
            hi_lo,
            hi,
            lo,
        }
    }
}

/// One pending archive/restore request.
///
/// The payload is carried unchanged; the collection only looks at the
/// object name, the insertion date and the order key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRecord<P> {
    pub object_name: ObjectName,
    pub inserted_at: InsertDate,
    pub order_key: OrderKey,
    pub payload: P,
}

impl<P> QueryRecord<P> {
    pub fn new(
        object_name: ObjectName,
        inserted_at: InsertDate,
        order_key: OrderKey,
        payload: P,
    ) -> Self {
        Self {
            object_name,
            inserted_at,
            order_key,
            payload,
        }
    }

    pub fn object_key(&self) -> String {
        self.object_name.key()
    }

    pub fn inserted_secs(&self) -> i64 {
        self.inserted_at.pseudo_seconds()
    }
}
