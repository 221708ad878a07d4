//! Extraction windows.
//!
//! Vendor APIs cap the date span of a single query, so an extraction from
//! a watermark up to now is split into consecutive fixed-step windows.

use chrono::{DateTime, TimeDelta, Utc};

use crate::{Error, Result};

/// A half-open-by-convention extraction interval. Adjacent windows share a
/// boundary instant; the vendor decides which side includes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
  pub start: DateTime<Utc>,
  pub end:   DateTime<Utc>,
}

/// Splits `[start, horizon]` into windows of `step`.
///
/// Window `i` starts at `start + i * step` and ends at the earlier of its
/// natural end and `horizon`. Generation stops once a window would start
/// after `horizon`. A start equal to `horizon` yields one zero-width
/// window; a start after it yields nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windower {
  start:   DateTime<Utc>,
  step:    TimeDelta,
  horizon: DateTime<Utc>,
}

impl Windower {
  pub fn new(
    start: DateTime<Utc>,
    step: TimeDelta,
    horizon: DateTime<Utc>,
  ) -> Result<Self> {
    if step <= TimeDelta::zero() {
      return Err(Error::NonPositiveStep(step));
    }
    Ok(Self { start, step, horizon })
  }

  /// The `i`-th window, or `None` once past the horizon.
  pub fn window(&self, i: i32) -> Option<Window> {
    let offset = self.step.checked_mul(i)?;
    let start = self.start.checked_add_signed(offset)?;
    if start > self.horizon {
      return None;
    }
    let natural_end = start
      .checked_add_signed(self.step)
      .unwrap_or(self.horizon);
    Some(Window { start, end: natural_end.min(self.horizon) })
  }

  /// Iterate all windows in order. The windower is `Copy`, so iteration
  /// can be restarted from any earlier index.
  pub fn iter(&self) -> Windows {
    Windows { windower: *self, next: Some(0) }
  }

  pub fn iter_from(&self, index: i32) -> Windows {
    Windows { windower: *self, next: Some(index.max(0)) }
  }
}

impl IntoIterator for &Windower {
  type Item = Window;
  type IntoIter = Windows;

  fn into_iter(self) -> Windows { self.iter() }
}

/// Lazy window sequence; see [`Windower`].
#[derive(Debug, Clone)]
pub struct Windows {
  windower: Windower,
  /// `None` once the index space is exhausted.
  next:     Option<i32>,
}

impl Iterator for Windows {
  type Item = Window;

  fn next(&mut self) -> Option<Window> {
    let index = self.next?;
    let window = self.windower.window(index)?;
    self.next = index.checked_add(1);
    Some(window)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
  }

  #[test]
  fn weekly_windows_clamp_to_horizon() {
    let w = Windower::new(day(1), TimeDelta::days(7), day(20)).unwrap();
    let got: Vec<_> = w.iter().collect();
    assert_eq!(got, vec![
      Window { start: day(1), end: day(8) },
      Window { start: day(8), end: day(15) },
      Window { start: day(15), end: day(20) },
    ]);
  }

  #[test]
  fn windows_tile_without_gaps() {
    let w = Windower::new(day(1), TimeDelta::hours(5), day(3)).unwrap();
    let got: Vec<_> = w.iter().collect();
    assert_eq!(got.first().map(|x| x.start), Some(day(1)));
    assert_eq!(got.last().map(|x| x.end), Some(day(3)));
    for pair in got.windows(2) {
      assert_eq!(pair[0].end, pair[1].start);
    }
  }

  #[test]
  fn start_after_horizon_is_empty() {
    let w = Windower::new(day(5), TimeDelta::days(1), day(4)).unwrap();
    assert_eq!(w.iter().count(), 0);
  }

  #[test]
  fn start_at_horizon_yields_zero_width_window() {
    let w = Windower::new(day(4), TimeDelta::days(1), day(4)).unwrap();
    let got: Vec<_> = w.iter().collect();
    assert_eq!(got, vec![Window { start: day(4), end: day(4) }]);
  }

  #[test]
  fn iteration_is_restartable() {
    let w = Windower::new(day(1), TimeDelta::days(7), day(20)).unwrap();
    let second: Vec<_> = w.iter_from(1).collect();
    assert_eq!(second.len(), 2);
    assert_eq!(second[0], w.window(1).unwrap());
    assert_eq!(w.iter().count(), 3);
  }

  #[test]
  fn tiny_steps_stop_at_the_last_index() {
    let w = Windower::new(day(1), TimeDelta::nanoseconds(1), day(2)).unwrap();
    let tail: Vec<_> = w.iter_from(i32::MAX).collect();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0], w.window(i32::MAX).unwrap());
  }

  #[test]
  fn non_positive_step_is_rejected() {
    assert!(matches!(
      Windower::new(day(1), TimeDelta::zero(), day(2)),
      Err(Error::NonPositiveStep(_))
    ));
  }
}
