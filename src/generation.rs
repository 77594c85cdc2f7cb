//! Generation tags namespacing cache partitions per deployment.
//!
//! A tag is the deployment's epoch label plus the current UTC date, so it
//! changes at least once a day and older partitions get swept on activation.

use std::fmt;

use chrono::{NaiveDate, Utc};

/// Source of the current calendar date.
pub trait Clock: Send + Sync {
  fn today(&self) -> NaiveDate;
}

/// Wall clock, UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn today(&self) -> NaiveDate {
    Utc::now().date_naive()
  }
}

/// A clock pinned to one date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
  fn today(&self) -> NaiveDate {
    self.0
  }
}

/// Opaque identifier of one cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationTag(String);

impl GenerationTag {
  /// Tag for `epoch` on the clock's current date.
  pub fn current(epoch: &str, clock: &dyn Clock) -> Self {
    Self::for_date(epoch, clock.today())
  }

  pub fn for_date(epoch: &str, date: NaiveDate) -> Self {
    Self(format!("{}-{}", epoch, date.format("%Y-%m-%d")))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for GenerationTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for GenerationTag {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}
