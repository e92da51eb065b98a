// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Identifier generators.
//!
//! Native sequences are one per table and backed by the table source's unique-id counter.
//! Custom sequences are named generators defined in `SYSTEM.SEQUENCE_INFO` with their
//! parameters and persisted high-water mark in `SYSTEM.SEQUENCE`.

pub(crate) mod catalog;
mod container;
mod manager;
mod registry;

pub use container::SequenceTableContainer;
pub use manager::SequenceManager;
pub use registry::SequenceRegistry;

use crate::config::DEFAULT_SEQUENCE_CACHE;
use crate::tx_management::Error;
use tablebox_common::ObjectName;

#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
pub enum SequenceType {
    Native,
    Custom,
}

impl SequenceType {
    pub(crate) fn code(self) -> i64 {
        match self {
            SequenceType::Native => 1,
            SequenceType::Custom => 2,
        }
    }

    pub(crate) fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(SequenceType::Native),
            2 => Some(SequenceType::Custom),
            _ => None,
        }
    }
}

/// A sequence definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceInfo {
    pub name: ObjectName,
    pub seq_type: SequenceType,
    /// The value before the first `next_value`.
    pub start: i64,
    pub increment: i64,
    pub min_value: i64,
    pub max_value: i64,
    /// How many values each persisted reservation covers. `None` takes the database's
    /// `default_sequence_cache` when the sequence is created.
    pub cache: Option<i64>,
    pub cycle: bool,
}

impl SequenceInfo {
    /// A custom sequence counting up by one from zero, unbounded above.
    pub fn custom(name: ObjectName) -> Self {
        Self {
            name,
            seq_type: SequenceType::Custom,
            start: 0,
            increment: 1,
            min_value: 0,
            max_value: i64::MAX,
            cache: None,
            cycle: false,
        }
    }

    pub(crate) fn native(name: ObjectName) -> Self {
        Self {
            seq_type: SequenceType::Native,
            cache: Some(1),
            ..Self::custom(name)
        }
    }

    pub fn with_start(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    pub fn with_increment(mut self, increment: i64) -> Self {
        self.increment = increment;
        self
    }

    pub fn with_bounds(mut self, min_value: i64, max_value: i64) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    pub fn with_cache(mut self, cache: i64) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cycle(mut self, cycle: bool) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |reason: &str| Error::InvalidSequence {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.increment == 0 {
            return Err(invalid("increment must not be zero"));
        }
        if self.min_value > self.max_value {
            return Err(invalid("min value exceeds max value"));
        }
        if self.cache.is_some_and(|cache| cache < 1) {
            return Err(invalid("cache must be at least 1"));
        }
        Ok(())
    }

    pub fn cache_size(&self) -> i64 {
        self.cache.unwrap_or(DEFAULT_SEQUENCE_CACHE)
    }

    pub fn in_bounds(&self, value: i64) -> bool {
        (self.min_value..=self.max_value).contains(&value)
    }
}

/// Runtime state of a custom sequence.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SequenceState {
    /// Highest value reserved (persisted) so far.
    pub last_value: i64,
    /// Last value handed out.
    pub current_value: i64,
}

impl SequenceState {
    /// State after loading a persisted high-water mark. Anything up to it may already have been
    /// handed out.
    pub fn new(last_value: i64) -> Self {
        Self {
            last_value,
            current_value: last_value,
        }
    }

    /// Advance to the next value. Returns it, plus the new high-water mark when the cached
    /// reservation ran out and a new one has to be persisted. On error the state is unchanged.
    pub fn next(&mut self, info: &SequenceInfo) -> Result<(i64, Option<i64>), Error> {
        let stepped = self
            .current_value
            .checked_add(info.increment)
            .filter(|v| info.in_bounds(*v));
        let value = match stepped {
            Some(v) => v,
            None if info.cycle && info.increment > 0 => info.min_value,
            None if info.cycle => info.max_value,
            None => return Err(Error::SequenceOutOfBounds(info.name.clone())),
        };
        let reserved = if self.current_value == self.last_value {
            let last = value
                .saturating_add(info.increment.saturating_mul(info.cache_size() - 1))
                .clamp(info.min_value, info.max_value);
            self.last_value = last;
            Some(last)
        } else {
            None
        };
        self.current_value = value;
        Ok((value, reserved))
    }

    pub fn set(&mut self, value: i64) {
        self.last_value = value;
        self.current_value = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> ObjectName {
        ObjectName::qualified("APP", "seq")
    }

    #[test]
    fn test_cache_batches_reservations() {
        let info = SequenceInfo::custom(name()).with_cache(5);
        let mut state = SequenceState::new(0);
        let mut reservations = vec![];
        for expected in 1..=12 {
            let (value, reserved) = state.next(&info).unwrap();
            assert_eq!(value, expected);
            reservations.extend(reserved);
        }
        assert_eq!(reservations, vec![5, 10, 15]);
        assert_eq!(state.last_value, 15);
    }

    #[test]
    fn test_cycling_wraps_to_min() {
        let info = SequenceInfo::custom(name())
            .with_bounds(1, 3)
            .with_cache(1)
            .with_cycle(true);
        let mut state = SequenceState::new(3);
        let values: Vec<i64> = (0..7).map(|_| state.next(&info).unwrap().0).collect();
        assert_eq!(values, vec![1, 2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn test_bounds_without_cycle() {
        let info = SequenceInfo::custom(name()).with_bounds(1, 3).with_cache(5);
        let mut state = SequenceState::new(0);
        assert_eq!(state.next(&info).unwrap(), (1, Some(3)));
        assert_eq!(state.next(&info).unwrap(), (2, None));
        assert_eq!(state.next(&info).unwrap(), (3, None));
        let before = state;
        assert_eq!(
            state.next(&info),
            Err(Error::SequenceOutOfBounds(name()))
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_negative_increment() {
        let info = SequenceInfo::custom(name())
            .with_increment(-2)
            .with_bounds(-5, 10)
            .with_cache(2);
        let mut state = SequenceState::new(4);
        assert_eq!(state.next(&info).unwrap(), (2, Some(0)));
        assert_eq!(state.next(&info).unwrap(), (0, None));
        assert_eq!(state.next(&info).unwrap(), (-2, Some(-4)));
        assert_eq!(state.next(&info).unwrap(), (-4, None));
        assert!(state.next(&info).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(SequenceInfo::custom(name()).validate().is_ok());
        assert!(matches!(
            SequenceInfo::custom(name()).with_increment(0).validate(),
            Err(Error::InvalidSequence { .. })
        ));
        assert!(SequenceInfo::custom(name()).with_bounds(5, 1).validate().is_err());
        assert!(SequenceInfo::custom(name()).with_cache(0).validate().is_err());
    }
}
