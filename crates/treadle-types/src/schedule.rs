//! Cron expression validation.
//!
//! Accepts the standard five-field form (`minute hour day-of-month month
//! day-of-week`) and the `@hourly`-style descriptors. Expressions are only
//! validated here; firing is left to the scheduler that owns the schedule
//! resource.

use serde::{Deserialize, Serialize};

use crate::{Result, TypesError};

const DESCRIPTORS: &[&str] = &[
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

const MONTHS: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

const WEEKDAYS: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    name_base: u32,
}

const FIELDS: [Field; 5] = [
    Field {
        name: "minute",
        min: 0,
        max: 59,
        names: &[],
        name_base: 0,
    },
    Field {
        name: "hour",
        min: 0,
        max: 23,
        names: &[],
        name_base: 0,
    },
    Field {
        name: "day-of-month",
        min: 1,
        max: 31,
        names: &[],
        name_base: 0,
    },
    Field {
        name: "month",
        min: 1,
        max: 12,
        names: MONTHS,
        name_base: 1,
    },
    // 0 and 7 are both Sunday.
    Field {
        name: "day-of-week",
        min: 0,
        max: 7,
        names: WEEKDAYS,
        name_base: 0,
    },
];

/// A validated cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CronSchedule(String);

impl CronSchedule {
    /// Parse and validate an expression. Surrounding whitespace is trimmed and
    /// inner runs of whitespace are collapsed.
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: String| TypesError::InvalidSchedule {
            expr: expr.to_string(),
            reason,
        };

        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(invalid("expression is empty".into()));
        }

        if trimmed.starts_with('@') {
            let lower = trimmed.to_ascii_lowercase();
            if DESCRIPTORS.contains(&lower.as_str()) {
                return Ok(Self(lower));
            }
            return Err(invalid(format!("unknown descriptor '{trimmed}'")));
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        if parts.len() != FIELDS.len() {
            return Err(invalid(format!(
                "expected {} fields, found {}",
                FIELDS.len(),
                parts.len()
            )));
        }

        for (part, field) in parts.iter().zip(FIELDS.iter()) {
            check_field(part, field)
                .map_err(|reason| invalid(format!("{}: {reason}", field.name)))?;
        }

        Ok(Self(parts.join(" ")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn check_field(part: &str, field: &Field) -> std::result::Result<(), String> {
    for item in part.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };

        if let Some(step) = step {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("invalid step '{step}'"))?;
            if step == 0 {
                return Err("step cannot be zero".into());
            }
        }

        if range == "*" {
            continue;
        }

        match range.split_once('-') {
            Some((lo, hi)) => {
                let lo = value(lo, field)?;
                let hi = value(hi, field)?;
                if lo > hi {
                    return Err(format!("range {lo}-{hi} is reversed"));
                }
            }
            None => {
                value(range, field)?;
            }
        }
    }
    Ok(())
}

fn value(token: &str, field: &Field) -> std::result::Result<u32, String> {
    if token.is_empty() {
        return Err("empty value".into());
    }
    let upper = token.to_ascii_uppercase();
    if let Some(pos) = field.names.iter().position(|n| *n == upper) {
        return Ok(pos as u32 + field.name_base);
    }
    let n: u32 = token
        .parse()
        .map_err(|_| format!("invalid value '{token}'"))?;
    if n < field.min || n > field.max {
        return Err(format!(
            "value {n} outside {}-{}",
            field.min, field.max
        ));
    }
    Ok(n)
}
