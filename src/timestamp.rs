/*
 * Description: Timestamp capture, immune to wall-clock adjustment for duration arithmetic.
 *
 * Copyright (C) 2022 Danny McClanahan <dmcC2@hypnicjerk.ai>
 * SPDX-License-Identifier: GPL-3.0-or-later
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Timestamp capture.
//!
//! A [`Timestamp`] carries a monotonic [`Instant`] alongside the wall-clock offset captured at
//! the same moment, so that span durations (computed from the monotonic clock) are immune to
//! wall-clock adjustments (NTP stepping, manual clock changes) while the wire format still gets
//! an absolute microseconds-since-epoch value.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A point in time, captured as a monotonic instant plus the wall-clock reading taken alongside
/// it.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
  monotonic: Instant,
  wall_clock: SystemTime,
}

impl Timestamp {
  /// Capture the current instant.
  pub fn now() -> Self {
    Self {
      monotonic: Instant::now(),
      wall_clock: SystemTime::now(),
    }
  }

  /// Microseconds since the Unix epoch, for the wire format.
  ///
  /// Clamped to `0` in the practically-unreachable case that the system clock reads before the
  /// epoch.
  pub fn to_absolute_micros(self) -> u64 {
    self
      .wall_clock
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_micros() as u64)
      .unwrap_or(0)
  }

  /// Microseconds elapsed between `self` and a later `other`, computed from the monotonic clock.
  ///
  /// Clamped to at least `1`, per the "a span must have nonzero duration on the wire" invariant:
  /// zero-duration spans are common (synchronous in-process work this fast) but the wire format
  /// uses `0` to mean "unknown", so we never emit it as a real value.
  pub fn duration_micros(self, other: Self) -> u64 {
    other
      .monotonic
      .checked_duration_since(self.monotonic)
      .map(|d| (d.as_micros() as u64).max(1))
      .unwrap_or(1)
  }

  /// The monotonic component, for ordering two timestamps independent of wall-clock effects.
  pub fn monotonic(self) -> Instant { self.monotonic }
}

impl PartialEq for Timestamp {
  fn eq(&self, other: &Self) -> bool { self.monotonic == other.monotonic }
}
impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}
impl Ord for Timestamp {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.monotonic.cmp(&other.monotonic) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread::sleep;
  use std::time::Duration;

  #[test]
  fn duration_is_monotonic_and_nonzero() {
    let start = Timestamp::now();
    sleep(Duration::from_millis(2));
    let end = Timestamp::now();
    assert!(start.duration_micros(end) >= 1);
    assert!(start < end);
  }

  #[test]
  fn absolute_is_plausible_epoch_micros() {
    let now = Timestamp::now();
    // Some time after 2020-01-01.
    assert!(now.to_absolute_micros() > 1_577_836_800_000_000);
  }

  #[test]
  fn same_instant_has_minimum_duration_one() {
    let t = Timestamp::now();
    assert_eq!(t.duration_micros(t), 1);
  }
}
