//! Statistics service implementation

use crate::cache::{keys, CacheService, CacheStore, MemoryStore, SqliteStore, SystemClock};
use crate::config::{CacheBackend, GesStatsConfig};
use crate::entity::{EntityScope, EntityType, Period};
use crate::metrics;
use crate::storage::{SqliteRepository, StatsRepository};
use crate::{Result, StatsError};
use ges_rollup::{
    aggregate_enrollment, aggregate_student_attendance, aggregate_teacher_attendance,
    EnrollmentSummary, StudentAttendanceSummary, TeacherAttendanceSummary,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Statistics service configuration
#[derive(Debug, Clone)]
pub struct StatsServiceConfig {
    /// How long rolled-up statistics stay cached
    pub ttl: Duration,

    /// Deadline for each row fetch
    pub query_timeout: Duration,
}

impl Default for StatsServiceConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Rolled-up statistics for one entity over one period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStats {
    pub enrolment: EnrollmentSummary,
    pub student_attendance: StudentAttendanceSummary,
    pub teacher_attendance: TeacherAttendanceSummary,
}

pub struct StatsService {
    cache: Arc<CacheService>,
    repository: Arc<dyn StatsRepository>,
    config: StatsServiceConfig,
}

impl StatsService {
    pub fn new(
        cache: Arc<CacheService>,
        repository: Arc<dyn StatsRepository>,
        config: StatsServiceConfig,
    ) -> Self {
        Self {
            cache,
            repository,
            config,
        }
    }

    /// Open the configured database and cache backend
    pub fn from_config(config: &GesStatsConfig) -> Result<Self> {
        let repository = Arc::new(SqliteRepository::open(&config.database.path)?);

        let store: Arc<dyn CacheStore> = match config.cache.backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new()),
            CacheBackend::Sqlite => Arc::new(SqliteStore::open(&config.cache.path)?),
        };
        let cache = Arc::new(CacheService::new(
            store,
            Arc::new(SystemClock),
            config.cache_options(),
        ));

        Ok(Self::new(cache, repository, config.stats_service_config()))
    }

    /// Statistics for `scope` over `period`, served from cache when fresh
    pub async fn entity_stats(&self, scope: EntityScope, period: Period) -> Result<EntityStats> {
        let key = keys::stats_key(scope, period);

        let result = self
            .cache
            .get_or_set(&key, self.config.ttl, || self.compute(scope, period))
            .await;

        match &result {
            Ok(_) => metrics::record_stats_request(scope.entity_type.as_str(), "ok"),
            Err(e) => {
                metrics::record_stats_request(scope.entity_type.as_str(), "error");
                tracing::error!(
                    scope = %scope,
                    key = %key,
                    error = %e,
                    "Failed to compute statistics"
                );
            }
        }

        result
    }

    /// Statistics for several entities at once, in the order given
    pub async fn entity_stats_many(
        &self,
        scopes: &[EntityScope],
        period: Period,
    ) -> Result<Vec<EntityStats>> {
        try_join_all(scopes.iter().map(|scope| self.entity_stats(*scope, period))).await
    }

    /// Drop every cached period for one entity
    pub async fn invalidate_entity(&self, scope: EntityScope) -> Result<usize> {
        Ok(self.cache.invalidate(&keys::entity_pattern(scope)).await?)
    }

    pub async fn invalidate_entity_type(&self, entity_type: EntityType) -> Result<usize> {
        Ok(self
            .cache
            .invalidate(&keys::entity_type_pattern(entity_type))
            .await?)
    }

    /// Drop every cached statistic, e.g. after an import
    pub async fn invalidate_all(&self) -> Result<usize> {
        Ok(self.cache.invalidate("*").await?)
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    async fn compute(&self, scope: EntityScope, period: Period) -> Result<EntityStats> {
        tracing::debug!(scope = %scope, ?period, "Computing statistics");

        let (enrollment, students, teachers) = tokio::try_join!(
            self.with_timeout(self.repository.enrollment_rows(scope, period)),
            self.with_timeout(self.repository.student_attendance_rows(scope, period)),
            self.with_timeout(self.repository.teacher_attendance_rows(scope, period)),
        )?;

        Ok(EntityStats {
            enrolment: aggregate_enrollment(&enrollment),
            student_attendance: aggregate_student_attendance(&students),
            teacher_attendance: aggregate_teacher_attendance(&teachers),
        })
    }

    async fn with_timeout<T>(&self, fetch: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.query_timeout, fetch)
            .await
            .map_err(|_| StatsError::Timeout(self.config.query_timeout.as_secs()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ges_rollup::{EnrollmentRow, StudentAttendanceRow, TeacherAttendanceRow};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Repository returning fixed rows and counting fetches
    #[derive(Default)]
    struct FixedRepository {
        fetches: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    impl FixedRepository {
        async fn touch(&self) -> Result<()> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(StatsError::Storage("connection lost".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StatsRepository for FixedRepository {
        async fn enrollment_rows(
            &self,
            _scope: EntityScope,
            _period: Period,
        ) -> Result<Vec<EnrollmentRow>> {
            self.touch().await?;
            Ok(vec![EnrollmentRow::new(10, 12), EnrollmentRow::default()])
        }

        async fn student_attendance_rows(
            &self,
            _scope: EntityScope,
            _period: Period,
        ) -> Result<Vec<StudentAttendanceRow>> {
            self.touch().await?;
            Ok(vec![
                StudentAttendanceRow::new(100, 80),
                StudentAttendanceRow::new(50, 50),
            ])
        }

        async fn teacher_attendance_rows(
            &self,
            _scope: EntityScope,
            _period: Period,
        ) -> Result<Vec<TeacherAttendanceRow>> {
            self.touch().await?;
            Ok(vec![TeacherAttendanceRow {
                total_teachers: Some(4),
                days_expected: Some(20),
                days_present: Some(20),
                ..Default::default()
            }])
        }
    }

    fn service(repository: Arc<FixedRepository>, config: StatsServiceConfig) -> StatsService {
        StatsService::new(Arc::new(CacheService::in_memory()), repository, config)
    }

    #[tokio::test]
    async fn test_entity_stats_rolls_up_and_caches() {
        let repository = Arc::new(FixedRepository::default());
        let stats = service(repository.clone(), StatsServiceConfig::default());
        let scope = EntityScope::new(EntityType::School, 123);
        let period = Period::for_year(2024).with_term(1).with_week(3);

        let first = stats.entity_stats(scope, period).await.unwrap();
        assert_eq!(first.enrolment.total_students, 22);
        assert_eq!(first.student_attendance.attendance_rate, 87);
        assert_eq!(first.teacher_attendance.total_teachers, 4);
        assert_eq!(first.teacher_attendance.attendance_rate, 100.0);

        let second = stats.entity_stats(scope, period).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repository.fetches.load(Ordering::SeqCst), 3);

        // A different period is a different key
        stats.entity_stats(scope, Period::default()).await.unwrap();
        assert_eq!(repository.fetches.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_entity_stats_many_shares_cache() {
        let repository = Arc::new(FixedRepository::default());
        let stats = service(repository.clone(), StatsServiceConfig::default());
        let scopes = [
            EntityScope::new(EntityType::School, 1),
            EntityScope::new(EntityType::School, 2),
            EntityScope::new(EntityType::School, 1),
        ];

        let results = stats.entity_stats_many(&scopes, Period::default()).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], results[2]);
        // School 1 is computed once; its duplicate waits on the same key
        assert_eq!(repository.fetches.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_invalidate_entity() {
        let repository = Arc::new(FixedRepository::default());
        let stats = service(repository.clone(), StatsServiceConfig::default());
        let school = EntityScope::new(EntityType::School, 1);
        let district = EntityScope::new(EntityType::District, 1);

        stats.entity_stats(school, Period::for_year(2023)).await.unwrap();
        stats.entity_stats(school, Period::for_year(2024)).await.unwrap();
        stats.entity_stats(district, Period::default()).await.unwrap();

        assert_eq!(stats.invalidate_entity(school).await.unwrap(), 2);
        assert_eq!(stats.invalidate_entity_type(EntityType::District).await.unwrap(), 1);
        assert_eq!(stats.invalidate_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_repository_failure_is_not_cached() {
        let failing = Arc::new(FixedRepository {
            fail: true,
            ..Default::default()
        });
        let cache = Arc::new(CacheService::in_memory());
        let stats = StatsService::new(cache.clone(), failing, StatsServiceConfig::default());
        let scope = EntityScope::new(EntityType::Region, 5);

        let err = stats.entity_stats(scope, Period::default()).await.unwrap_err();
        assert!(matches!(err, StatsError::Storage(_)));
        assert_eq!(cache.stats().await.entries, Some(0));

        let healthy = StatsService::new(
            cache,
            Arc::new(FixedRepository::default()),
            StatsServiceConfig::default(),
        );
        assert!(healthy.entity_stats(scope, Period::default()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_times_out() {
        let slow = Arc::new(FixedRepository {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let stats = service(
            slow,
            StatsServiceConfig {
                ttl: Duration::from_secs(300),
                query_timeout: Duration::from_secs(5),
            },
        );

        let err = stats
            .entity_stats(EntityScope::new(EntityType::Circuit, 9), Period::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StatsError::Timeout(5)));
        assert_eq!(stats.cache().stats().await.writes, 0);
    }
}
