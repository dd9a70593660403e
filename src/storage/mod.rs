//! Storage layer
//!
//! Row source for the statistics service. A repository returns the per-school
//! rows under an entity for a period; folding them into summaries happens in
//! `ges_rollup`.

mod dataset;
mod sqlite;

pub use dataset::{
    Dataset, EnrollmentRecord, ImportSummary, SchoolRecord, StudentAttendanceRecord,
    TeacherAttendanceRecord,
};
pub use sqlite::SqliteRepository;

use crate::entity::{EntityScope, Period};
use crate::Result;
use async_trait::async_trait;
use ges_rollup::{EnrollmentRow, StudentAttendanceRow, TeacherAttendanceRow};

/// Source of per-school statistics rows
///
/// Each fetch returns at most one row per school under `scope`.
#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// Latest enrollment record per school within the year / term filter.
    /// Enrollment is not reported weekly, so `period.week` is ignored.
    async fn enrollment_rows(
        &self,
        scope: EntityScope,
        period: Period,
    ) -> Result<Vec<EnrollmentRow>>;

    /// Student attendance per school, summed over the matching weeks
    async fn student_attendance_rows(
        &self,
        scope: EntityScope,
        period: Period,
    ) -> Result<Vec<StudentAttendanceRow>>;

    /// Teacher attendance per school, day counts summed over the matching
    /// weeks and the teacher headcount taken as the largest reported
    async fn teacher_attendance_rows(
        &self,
        scope: EntityScope,
        period: Period,
    ) -> Result<Vec<TeacherAttendanceRow>>;
}
