//! Crontab pattern compiler.
//!
//! A pattern has five whitespace-separated fields: minute, hour, day of
//! month, month and day of week. Each field compiles to a bitmask over its
//! legal values. Field syntax:
//!
//! - `*`: every value
//! - `5`: a single value
//! - `1-5`: an inclusive range
//! - `1,3,10-12`: a list of values and ranges
//! - `<any of the above>/n`: keep only values divisible by `n`
//!
//! Day of week accepts 0-7 where both 0 and 7 mean Sunday.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::error::CronError;

/// Number of minute-of-day wheel slots.
pub const WHEEL_SLOTS: usize = 24 * 60;

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const FIELDS: [FieldSpec; 5] = [
    FieldSpec { name: "minute", min: 0, max: 59 },
    FieldSpec { name: "hour", min: 0, max: 23 },
    FieldSpec { name: "day", min: 1, max: 31 },
    FieldSpec { name: "month", min: 1, max: 12 },
    FieldSpec { name: "weekday", min: 0, max: 7 },
];

const SUNDAY_BITS: u64 = 1 | (1 << 7);

/// A compiled crontab pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronPattern {
    pub minute: u64,
    pub hour: u64,
    pub day: u64,
    pub month: u64,
    pub weekday: u64,
}

impl CronPattern {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let atoms: Vec<&str> = expr.split_whitespace().collect();
        if atoms.len() != FIELDS.len() {
            return Err(CronError::FieldCount {
                expr: expr.to_string(),
                found: atoms.len(),
            });
        }

        let mut masks = [0u64; 5];
        for ((mask, atom), spec) in masks.iter_mut().zip(&atoms).zip(&FIELDS) {
            *mask = parse_field(atom, spec)?;
        }
        if masks[4] & SUNDAY_BITS != 0 {
            masks[4] |= SUNDAY_BITS;
        }

        Ok(Self {
            minute: masks[0],
            hour: masks[1],
            day: masks[2],
            month: masks[3],
            weekday: masks[4],
        })
    }

    /// Whether every field matches the calendar moment `at`.
    pub fn matches(&self, at: &NaiveDateTime) -> bool {
        bit(self.minute, at.minute())
            && bit(self.hour, at.hour())
            && bit(self.day, at.day())
            && bit(self.month, at.month())
            && bit(self.weekday, at.weekday().num_days_from_sunday())
    }

    /// Minute-of-day slots (`hour * 60 + minute`) this pattern can fire in.
    pub fn wheel_slots(&self) -> Vec<usize> {
        let mut slots = Vec::new();
        for hour in 0..24u32 {
            if !bit(self.hour, hour) {
                continue;
            }
            for minute in 0..60u32 {
                if bit(self.minute, minute) {
                    slots.push(wheel_slot(hour, minute));
                }
            }
        }
        slots
    }
}

impl FromStr for CronPattern {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "minute={:#x} hour={:#x} day={:#x} month={:#x} weekday={:#x}",
            self.minute, self.hour, self.day, self.month, self.weekday
        )
    }
}

pub fn wheel_slot(hour: u32, minute: u32) -> usize {
    (hour * 60 + minute) as usize
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn parse_field(atom: &str, spec: &FieldSpec) -> Result<u64, CronError> {
    let (values, step) = match atom.split_once('/') {
        Some((values, step)) => {
            let step: u32 = step.parse().map_err(|_| CronError::InvalidStep {
                field: spec.name,
                step: step.to_string(),
            })?;
            if step == 0 {
                return Err(CronError::InvalidStep {
                    field: spec.name,
                    step: "0".into(),
                });
            }
            (values, step)
        }
        None => (atom, 1),
    };

    let mut mask = 0u64;
    for item in values.split(',') {
        let (start, end) = parse_item(item, spec)?;
        for value in start..=end {
            if value % step == 0 {
                mask |= 1 << value;
            }
        }
    }
    if mask == 0 {
        return Err(CronError::EmptyField { field: spec.name });
    }
    Ok(mask)
}

/// Inclusive bounds of one list item.
fn parse_item(item: &str, spec: &FieldSpec) -> Result<(u32, u32), CronError> {
    if item == "*" {
        return Ok((spec.min, spec.max));
    }
    match item.split_once('-') {
        Some((start, end)) => {
            let start = parse_value(start, spec)?;
            let end = parse_value(end, spec)?;
            if start > end {
                return Err(CronError::InvalidRange {
                    field: spec.name,
                    start,
                    end,
                });
            }
            Ok((start, end))
        }
        None => {
            let value = parse_value(item, spec)?;
            Ok((value, value))
        }
    }
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, CronError> {
    let value: u32 = raw.trim().parse().map_err(|_| CronError::InvalidNumber {
        field: spec.name,
        value: raw.to_string(),
    })?;
    if value < spec.min || value > spec.max {
        return Err(CronError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(value)
}
