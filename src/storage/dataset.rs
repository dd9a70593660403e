//! JSON dataset files for `ges-stats import`

use crate::Result;
use ges_rollup::{EnrollmentRow, StudentAttendanceRow, TeacherAttendanceRow};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolRecord {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "circuit_id")]
    pub circuit_id: i64,
    #[serde(alias = "district_id")]
    pub district_id: i64,
    #[serde(alias = "region_id")]
    pub region_id: i64,
}

/// Enrollment for one school in one term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    #[serde(alias = "school_id")]
    pub school_id: i64,
    pub year: i32,
    pub term: u8,
    #[serde(flatten)]
    pub counts: EnrollmentRow,
}

/// Student attendance for one school in one week
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceRecord {
    #[serde(alias = "school_id")]
    pub school_id: i64,
    pub year: i32,
    pub term: u8,
    pub week: u8,
    #[serde(flatten)]
    pub counts: StudentAttendanceRow,
}

/// Teacher attendance for one school in one week
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherAttendanceRecord {
    #[serde(alias = "school_id")]
    pub school_id: i64,
    pub year: i32,
    pub term: u8,
    pub week: u8,
    #[serde(flatten)]
    pub counts: TeacherAttendanceRow,
}

/// A batch of reporting data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub schools: Vec<SchoolRecord>,
    #[serde(default)]
    pub enrollment: Vec<EnrollmentRecord>,
    #[serde(default, alias = "student_attendance")]
    pub student_attendance: Vec<StudentAttendanceRecord>,
    #[serde(default, alias = "teacher_attendance")]
    pub teacher_attendance: Vec<TeacherAttendanceRecord>,
}

impl Dataset {
    /// Read a dataset from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let dataset = serde_json::from_str(&content)?;
        Ok(dataset)
    }
}

/// Rows written by an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub schools: usize,
    pub enrollment: usize,
    pub student_attendance: usize,
    pub teacher_attendance: usize,
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.schools + self.enrollment + self.student_attendance + self.teacher_attendance
    }
}
