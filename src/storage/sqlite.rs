//! SQLite statistics repository

use super::{Dataset, ImportSummary, StatsRepository};
use crate::entity::{EntityScope, EntityType, Period};
use crate::{Result, StatsError};
use async_trait::async_trait;
use ges_rollup::{EnrollmentRow, StudentAttendanceRow, TeacherAttendanceRow};
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Reporting data in a SQLite database
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteRepository {
    /// Open or create a statistics database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Opening statistics database");

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schools (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                circuit_id INTEGER NOT NULL,
                district_id INTEGER NOT NULL,
                region_id INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS enrollment_records (
                school_id INTEGER NOT NULL REFERENCES schools(id),
                year INTEGER NOT NULL,
                term INTEGER NOT NULL,
                total_students INTEGER,
                boys INTEGER,
                girls INTEGER,
                PRIMARY KEY (school_id, year, term)
            );

            CREATE TABLE IF NOT EXISTS student_attendance_records (
                school_id INTEGER NOT NULL REFERENCES schools(id),
                year INTEGER NOT NULL,
                term INTEGER NOT NULL,
                week INTEGER NOT NULL,
                total_enrolled INTEGER,
                total_present INTEGER,
                PRIMARY KEY (school_id, year, term, week)
            );

            CREATE TABLE IF NOT EXISTS teacher_attendance_records (
                school_id INTEGER NOT NULL REFERENCES schools(id),
                year INTEGER NOT NULL,
                term INTEGER NOT NULL,
                week INTEGER NOT NULL,
                total_teachers INTEGER,
                days_expected INTEGER,
                days_present INTEGER,
                days_punctual INTEGER,
                exercises_given INTEGER,
                exercises_marked INTEGER,
                PRIMARY KEY (school_id, year, term, week)
            );

            CREATE INDEX IF NOT EXISTS idx_schools_circuit ON schools(circuit_id);
            CREATE INDEX IF NOT EXISTS idx_schools_district ON schools(district_id);
            CREATE INDEX IF NOT EXISTS idx_schools_region ON schools(region_id);
            "#,
        )?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking thread pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| {
                StatsError::Storage("Database connection lock poisoned".to_string())
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StatsError::Storage(format!("Database task failed: {}", e)))?
    }

    /// Write a dataset in one transaction, replacing rows with the same keys
    pub async fn import_dataset(&self, dataset: &Dataset) -> Result<ImportSummary> {
        let dataset = dataset.clone();
        let summary = self.with_conn(move |conn| write_dataset(conn, &dataset)).await?;

        tracing::info!(
            path = %self.path.display(),
            schools = summary.schools,
            enrollment = summary.enrollment,
            student_attendance = summary.student_attendance,
            teacher_attendance = summary.teacher_attendance,
            "Imported dataset"
        );

        Ok(summary)
    }
}

fn write_dataset(conn: &mut Connection, dataset: &Dataset) -> Result<ImportSummary> {
    let tx = conn.transaction()?;
    let mut summary = ImportSummary::default();

    for school in &dataset.schools {
        summary.schools += tx.execute(
            "INSERT OR REPLACE INTO schools (id, name, circuit_id, district_id, region_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                school.id,
                school.name,
                school.circuit_id,
                school.district_id,
                school.region_id,
            ],
        )?;
    }

    for record in &dataset.enrollment {
        let c = &record.counts;
        summary.enrollment += tx.execute(
            "INSERT OR REPLACE INTO enrollment_records
             (school_id, year, term, total_students, boys, girls)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.school_id,
                record.year,
                record.term,
                to_sql_count(c.total_students),
                to_sql_count(c.boys),
                to_sql_count(c.girls),
            ],
        )?;
    }

    for record in &dataset.student_attendance {
        let c = &record.counts;
        summary.student_attendance += tx.execute(
            "INSERT OR REPLACE INTO student_attendance_records
             (school_id, year, term, week, total_enrolled, total_present)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.school_id,
                record.year,
                record.term,
                record.week,
                to_sql_count(c.total_enrolled),
                to_sql_count(c.total_present),
            ],
        )?;
    }

    for record in &dataset.teacher_attendance {
        let c = &record.counts;
        summary.teacher_attendance += tx.execute(
            "INSERT OR REPLACE INTO teacher_attendance_records
             (school_id, year, term, week, total_teachers, days_expected, days_present,
              days_punctual, exercises_given, exercises_marked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.school_id,
                record.year,
                record.term,
                record.week,
                to_sql_count(c.total_teachers),
                to_sql_count(c.days_expected),
                to_sql_count(c.days_present),
                to_sql_count(c.days_punctual),
                to_sql_count(c.exercises_given),
                to_sql_count(c.exercises_marked),
            ],
        )?;
    }

    tx.commit()?;
    Ok(summary)
}

#[async_trait]
impl StatsRepository for SqliteRepository {
    async fn enrollment_rows(
        &self,
        scope: EntityScope,
        period: Period,
    ) -> Result<Vec<EnrollmentRow>> {
        let sql = format!(
            "SELECT e.school_id, e.total_students, e.boys, e.girls
             FROM enrollment_records e
             JOIN schools s ON s.id = e.school_id
             WHERE s.{} = ?1
               AND (?2 IS NULL OR e.year = ?2)
               AND (?3 IS NULL OR e.term = ?3)
             ORDER BY e.school_id, e.year DESC, e.term DESC",
            scope_column(scope.entity_type)
        );

        let latest = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![scope.id, period.year, period.term], |row| {
                    Ok(EnrollmentRow {
                        school_id: Some(row.get(0)?),
                        total_students: count(row, 1)?,
                        boys: count(row, 2)?,
                        girls: count(row, 3)?,
                    })
                })?;

                // Rows arrive newest first per school; keep only that one
                let mut seen = HashSet::new();
                let mut latest = Vec::new();
                for row in rows {
                    let row = row?;
                    if seen.insert(row.school_id) {
                        latest.push(row);
                    }
                }
                Ok(latest)
            })
            .await?;

        tracing::debug!(scope = %scope, rows = latest.len(), "Fetched enrollment rows");
        Ok(latest)
    }

    async fn student_attendance_rows(
        &self,
        scope: EntityScope,
        period: Period,
    ) -> Result<Vec<StudentAttendanceRow>> {
        let sql = format!(
            "SELECT a.school_id, SUM(a.total_enrolled), SUM(a.total_present)
             FROM student_attendance_records a
             JOIN schools s ON s.id = a.school_id
             WHERE s.{} = ?1
               AND (?2 IS NULL OR a.year = ?2)
               AND (?3 IS NULL OR a.term = ?3)
               AND (?4 IS NULL OR a.week = ?4)
             GROUP BY a.school_id
             ORDER BY a.school_id",
            scope_column(scope.entity_type)
        );

        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        params![scope.id, period.year, period.term, period.week],
                        |row| {
                            Ok(StudentAttendanceRow {
                                school_id: Some(row.get(0)?),
                                total_enrolled: count(row, 1)?,
                                total_present: count(row, 2)?,
                            })
                        },
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        tracing::debug!(scope = %scope, rows = rows.len(), "Fetched student attendance rows");
        Ok(rows)
    }

    async fn teacher_attendance_rows(
        &self,
        scope: EntityScope,
        period: Period,
    ) -> Result<Vec<TeacherAttendanceRow>> {
        let sql = format!(
            "SELECT t.school_id, MAX(t.total_teachers), SUM(t.days_expected), SUM(t.days_present),
                    SUM(t.days_punctual), SUM(t.exercises_given), SUM(t.exercises_marked)
             FROM teacher_attendance_records t
             JOIN schools s ON s.id = t.school_id
             WHERE s.{} = ?1
               AND (?2 IS NULL OR t.year = ?2)
               AND (?3 IS NULL OR t.term = ?3)
               AND (?4 IS NULL OR t.week = ?4)
             GROUP BY t.school_id
             ORDER BY t.school_id",
            scope_column(scope.entity_type)
        );

        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        params![scope.id, period.year, period.term, period.week],
                        |row| {
                            Ok(TeacherAttendanceRow {
                                school_id: Some(row.get(0)?),
                                total_teachers: count(row, 1)?,
                                days_expected: count(row, 2)?,
                                days_present: count(row, 3)?,
                                days_punctual: count(row, 4)?,
                                exercises_given: count(row, 5)?,
                                exercises_marked: count(row, 6)?,
                            })
                        },
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        tracing::debug!(scope = %scope, rows = rows.len(), "Fetched teacher attendance rows");
        Ok(rows)
    }
}

/// Column of `schools` that holds the id for an entity level
fn scope_column(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::School => "id",
        EntityType::Circuit => "circuit_id",
        EntityType::District => "district_id",
        EntityType::Region => "region_id",
    }
}

/// Read a nullable count; negative values are treated as missing
fn count(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    let value: Option<i64> = row.get(idx)?;
    Ok(value.and_then(|v| u64::try_from(v).ok()))
}

fn to_sql_count(value: Option<u64>) -> Option<i64> {
    value.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}
