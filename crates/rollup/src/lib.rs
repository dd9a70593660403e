//! Statistics rollups for school reporting data
//!
//! Folds per-school rows (enrollment, student attendance, teacher attendance)
//! into one summary for a parent entity in the school → circuit → district →
//! region hierarchy.
//!
//! Reporting data is sparse: any numeric field may be missing, `null`, or a
//! numeric string. All of those count as zero and never produce an error.
//! Every rate guards its denominator, so a summary never contains NaN or
//! Infinity.
//!
//! # Example
//!
//! ```
//! use ges_rollup::{aggregate_student_attendance, StudentAttendanceRow};
//!
//! let rows = vec![
//!     StudentAttendanceRow::new(100, 80),
//!     StudentAttendanceRow::new(50, 50),
//! ];
//!
//! let summary = aggregate_student_attendance(&rows);
//! assert_eq!(summary.total_enrolled, 150);
//! assert_eq!(summary.total_present, 130);
//! assert_eq!(summary.attendance_rate, 87);
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while decoding raw rows
#[derive(Error, Debug)]
pub enum Error {
    #[error("Expected a JSON array of rows, found {0}")]
    NotAnArray(&'static str),

    #[error("Row {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for rollup operations
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Rows
// ============================================================================

/// Enrollment counts reported by one school
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRow {
    #[serde(default, alias = "school_id", skip_serializing_if = "Option::is_none")]
    pub school_id: Option<i64>,
    #[serde(default, alias = "total_students", deserialize_with = "lenient_count")]
    pub total_students: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub boys: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub girls: Option<u64>,
}

impl EnrollmentRow {
    pub fn new(boys: u64, girls: u64) -> Self {
        Self {
            school_id: None,
            total_students: Some(boys.saturating_add(girls)),
            boys: Some(boys),
            girls: Some(girls),
        }
    }
}

/// Student attendance reported by one school
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceRow {
    #[serde(default, alias = "school_id", skip_serializing_if = "Option::is_none")]
    pub school_id: Option<i64>,
    #[serde(default, alias = "total_enrolled", deserialize_with = "lenient_count")]
    pub total_enrolled: Option<u64>,
    #[serde(default, alias = "total_present", deserialize_with = "lenient_count")]
    pub total_present: Option<u64>,
}

impl StudentAttendanceRow {
    pub fn new(total_enrolled: u64, total_present: u64) -> Self {
        Self {
            school_id: None,
            total_enrolled: Some(total_enrolled),
            total_present: Some(total_present),
        }
    }
}

/// Teacher attendance, punctuality and exercise marking reported by one school
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherAttendanceRow {
    #[serde(default, alias = "school_id", skip_serializing_if = "Option::is_none")]
    pub school_id: Option<i64>,
    #[serde(default, alias = "total_teachers", deserialize_with = "lenient_count")]
    pub total_teachers: Option<u64>,
    /// Teacher-days the school was expected to be staffed
    #[serde(default, alias = "days_expected", deserialize_with = "lenient_count")]
    pub days_expected: Option<u64>,
    #[serde(default, alias = "days_present", deserialize_with = "lenient_count")]
    pub days_present: Option<u64>,
    /// Present teacher-days on which the teacher arrived on time
    #[serde(default, alias = "days_punctual", deserialize_with = "lenient_count")]
    pub days_punctual: Option<u64>,
    #[serde(default, alias = "exercises_given", deserialize_with = "lenient_count")]
    pub exercises_given: Option<u64>,
    #[serde(default, alias = "exercises_marked", deserialize_with = "lenient_count")]
    pub exercises_marked: Option<u64>,
}

/// Decode a JSON array of row objects.
///
/// Numeric fields accept numbers, numeric strings and `null`; anything that
/// cannot be read as a non-negative count becomes zero.
pub fn rows_from_json<T: DeserializeOwned>(value: Value) -> Result<Vec<T>> {
    let items = match value {
        Value::Array(items) => items,
        other => return Err(Error::NotAnArray(json_kind(&other))),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            if !item.is_object() {
                return Err(Error::NotAnObject { index });
            }
            Ok(serde_json::from_value(item)?)
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(count_from_value))
}

fn count_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(count_from_float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(count_from_float))
        }
        _ => None,
    }
}

/// Floats at or above 2^64 do not fit a count and are treated as unusable
fn count_from_float(f: f64) -> Option<u64> {
    if f.is_finite() && f >= 0.0 && f < u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}

// ============================================================================
// Summaries
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenderDistribution {
    pub boys: u64,
    pub girls: u64,
}

/// Rolled-up enrollment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentSummary {
    pub total_students: u64,
    pub gender_distribution: GenderDistribution,
}

/// Rolled-up student attendance. The rate is a whole percentage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceSummary {
    pub total_enrolled: u64,
    pub total_present: u64,
    pub attendance_rate: u64,
}

/// Rolled-up teacher attendance. Rates are unrounded percentages; use
/// [`format_rate`] for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherAttendanceSummary {
    pub total_teachers: u64,
    pub attendance_rate: f64,
    pub punctuality_rate: f64,
    pub exercise_completion_rate: f64,
}

// ============================================================================
// Aggregation
// ============================================================================

// Sums saturate so absurd reported counts can never panic or wrap
fn total<R>(rows: &[R], field: impl Fn(&R) -> Option<u64>) -> u64 {
    rows.iter()
        .map(|r| field(r).unwrap_or(0))
        .fold(0, u64::saturating_add)
}

pub fn aggregate_enrollment(rows: &[EnrollmentRow]) -> EnrollmentSummary {
    EnrollmentSummary {
        total_students: total(rows, |r| r.total_students),
        gender_distribution: GenderDistribution {
            boys: total(rows, |r| r.boys),
            girls: total(rows, |r| r.girls),
        },
    }
}

pub fn aggregate_student_attendance(rows: &[StudentAttendanceRow]) -> StudentAttendanceSummary {
    let total_enrolled = total(rows, |r| r.total_enrolled);
    let total_present = total(rows, |r| r.total_present);

    StudentAttendanceSummary {
        total_enrolled,
        total_present,
        attendance_rate: whole_percent(total_present, total_enrolled),
    }
}

/// Teacher totals are summed per row, never counted, so a school reporting
/// twelve teachers contributes twelve.
pub fn aggregate_teacher_attendance(rows: &[TeacherAttendanceRow]) -> TeacherAttendanceSummary {
    let days_expected = total(rows, |r| r.days_expected);
    let days_present = total(rows, |r| r.days_present);
    let days_punctual = total(rows, |r| r.days_punctual);
    let exercises_given = total(rows, |r| r.exercises_given);
    let exercises_marked = total(rows, |r| r.exercises_marked);

    TeacherAttendanceSummary {
        total_teachers: total(rows, |r| r.total_teachers),
        attendance_rate: percent(days_present, days_expected),
        punctuality_rate: percent(days_punctual, days_present),
        exercise_completion_rate: percent(exercises_marked, exercises_given),
    }
}

/// `numerator / denominator * 100`, or 0 when the denominator is 0
pub fn percent(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64 * 100.0
}

/// Percentage rounded half up to a whole number, in integer arithmetic
pub fn whole_percent(numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        return 0;
    }
    let n = numerator as u128;
    let d = denominator as u128;
    u64::try_from((n * 200 + d) / (2 * d)).unwrap_or(u64::MAX)
}

/// Format a rate for display with one decimal place
pub fn format_rate(rate: f64) -> String {
    if rate.is_finite() {
        format!("{:.1}", rate)
    } else {
        "0.0".to_string()
    }
}
