//! The analyzer: fetches through the cache, then hands rows to the analyses

use crate::benchmark::{self, BenchmarkReport};
use crate::cache::QueryCache;
use crate::comparison::{self, ProvincialComparison};
use crate::error::AnalyticsError;
use crate::insights::{self, Insights};
use crate::model::{narrow_to_one, Analysis, WaitTimeQuery, WaitTimeRecord};
use crate::significance::{self, ProvinceComparisonTest, TrendSignificance};
use crate::source::FactSource;
use crate::trends::{self, TrendResult};
use common::config::{AnalyticsSettings, ReferenceData};
use common::Settings;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const MEDIAN_METRIC: &str = "50th Percentile";
pub const P90_METRIC: &str = "90th Percentile";
pub const VOLUME_METRIC: &str = "Volume";

pub type TrendAnalysis = BTreeMap<String, TrendResult>;

pub struct WaitTimeAnalyzer<S> {
    source: S,
    cache: QueryCache,
    settings: AnalyticsSettings,
    reference: ReferenceData,
    alpha: f64,
}

impl<S: FactSource> WaitTimeAnalyzer<S> {
    pub fn new(source: S, settings: &Settings) -> Self {
        Self::with_cache(source, settings, QueryCache::new())
    }

    pub fn with_cache(source: S, settings: &Settings, cache: QueryCache) -> Self {
        Self {
            source,
            cache,
            settings: settings.analytics.clone(),
            reference: settings.reference.clone(),
            alpha: settings.rules.significance_level,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Compare the cache's dataset version with the source's latest load and drop
    /// cached results when a new load has completed. Returns whether it cleared.
    pub async fn sync_dataset_version(&mut self) -> Result<bool, AnalyticsError> {
        let current = self.source.dataset_version().await?;
        Ok(self.cache.bind_version(current))
    }

    /// Rows for `query`, served from the cache when the exact query was seen.
    pub async fn get_wait_time_data(
        &mut self,
        query: &WaitTimeQuery,
    ) -> Result<Arc<Vec<WaitTimeRecord>>, AnalyticsError> {
        if let Some(rows) = self.cache.get(query) {
            debug!(rows = rows.len(), "query cache hit");
            return Ok(rows);
        }
        let rows = Arc::new(self.source.wait_times(query).await?);
        self.cache.insert(query.clone(), Arc::clone(&rows));
        Ok(rows)
    }

    pub fn calculate_trend_analysis(&self, data: &[WaitTimeRecord]) -> Analysis<TrendAnalysis> {
        let min_points = self.settings.min_trend_points;
        let trends = trends::analyze(data, min_points);
        if trends.is_empty() {
            return Analysis::insufficient(
                min_points,
                trends::longest_series(data),
                "yearly values per province and procedure",
            );
        }
        info!(series = trends.len(), "trend analysis complete");
        Analysis::Ready(trends)
    }

    pub async fn benchmark_analysis(
        &mut self,
        province: Option<&str>,
        year: i32,
    ) -> Result<Analysis<BenchmarkReport>, AnalyticsError> {
        let medians = self
            .get_wait_time_data(&WaitTimeQuery::new(MEDIAN_METRIC, year, year).province(province))
            .await?;
        let p90 = self
            .get_wait_time_data(&WaitTimeQuery::new(P90_METRIC, year, year).province(province))
            .await?;
        let volumes = self
            .get_wait_time_data(&WaitTimeQuery::new(VOLUME_METRIC, year, year).province(province))
            .await?;

        Ok(benchmark::build(&medians, &p90, &volumes, &self.reference, province, year))
    }

    pub async fn provincial_comparison(
        &mut self,
        procedure: &str,
        year: i32,
    ) -> Result<Analysis<ProvincialComparison>, AnalyticsError> {
        let query = WaitTimeQuery::new(&self.settings.default_metric, year, year).procedure(Some(procedure));
        let rows = self.get_wait_time_data(&query).await?;
        let volumes = self
            .get_wait_time_data(&WaitTimeQuery::new(VOLUME_METRIC, year, year).procedure(Some(procedure)))
            .await?;

        let rows = narrow_to_one(&rows, procedure, |r| r.procedure.as_str());
        let name = rows
            .first()
            .map(|r| r.procedure.clone())
            .unwrap_or_else(|| procedure.to_string());
        let volumes: Vec<&WaitTimeRecord> = volumes.iter().filter(|v| v.procedure == name).collect();

        Ok(comparison::build(&rows, &volumes, &name, year))
    }

    /// Findings over the insight window; benchmark compliance is consulted only when
    /// a procedure is given.
    pub async fn generate_insights(
        &mut self,
        province: Option<&str>,
        procedure: Option<&str>,
    ) -> Result<Analysis<Insights>, AnalyticsError> {
        let query = WaitTimeQuery::new(
            &self.settings.default_metric,
            self.settings.insight_start_year,
            self.settings.insight_end_year,
        )
        .province(province)
        .procedure(procedure);
        let rows = self.get_wait_time_data(&query).await?;
        if rows.is_empty() {
            return Ok(Analysis::insufficient(
                1,
                0,
                format!(
                    "wait-time rows for {}-{}",
                    self.settings.insight_start_year, self.settings.insight_end_year
                ),
            ));
        }

        let trends = trends::analyze(&rows, self.settings.min_trend_points);
        let avg_compliance = if procedure.is_some() {
            self.benchmark_analysis(province, self.settings.default_year)
                .await?
                .as_ready()
                .map(|report| report.summary.avg_compliance)
        } else {
            None
        };

        Ok(Analysis::Ready(insights::synthesize(&trends, &rows, avg_compliance)))
    }

    /// `years` defaults to the configured start year through the default year.
    pub async fn compare_provinces(
        &mut self,
        province1: &str,
        province2: &str,
        procedure: &str,
        years: Option<(i32, i32)>,
    ) -> Result<Analysis<ProvinceComparisonTest>, AnalyticsError> {
        let (start, end) = years.unwrap_or((self.settings.default_start_year, self.settings.default_year));
        let base = WaitTimeQuery::new(&self.settings.default_metric, start, end).procedure(Some(procedure));
        let first = self
            .get_wait_time_data(&base.clone().province(Some(province1)))
            .await?;
        let second = self.get_wait_time_data(&base.province(Some(province2))).await?;

        let first = narrow_pair(&first, province1, procedure);
        let second = narrow_pair(&second, province2, procedure);
        let name1 = first.first().map_or(province1, |r| r.province.as_str());
        let name2 = second.first().map_or(province2, |r| r.province.as_str());
        let procedure_name = first
            .first()
            .or(second.first())
            .map_or(procedure, |r| r.procedure.as_str());

        Ok(significance::compare(
            &first,
            &second,
            (name1, name2),
            procedure_name,
            self.alpha,
        ))
    }

    pub async fn trend_significance(
        &mut self,
        province: &str,
        procedure: &str,
    ) -> Result<Analysis<TrendSignificance>, AnalyticsError> {
        let query = WaitTimeQuery::from_settings(&self.settings)
            .province(Some(province))
            .procedure(Some(procedure));
        let rows = self.get_wait_time_data(&query).await?;
        let rows = narrow_pair(&rows, province, procedure);
        let province_name = rows.first().map_or(province, |r| r.province.as_str());
        let procedure_name = rows.first().map_or(procedure, |r| r.procedure.as_str());

        Ok(significance::trend_test(
            &rows,
            province_name,
            procedure_name,
            self.settings.min_trend_points,
            self.alpha,
        ))
    }
}

/// Rows of exactly one province and one procedure
fn narrow_pair<'a>(rows: &'a [WaitTimeRecord], province: &str, procedure: &str) -> Vec<&'a WaitTimeRecord> {
    let by_procedure: Vec<WaitTimeRecord> = narrow_to_one(rows, procedure, |r| r.procedure.as_str())
        .into_iter()
        .cloned()
        .collect();
    let Some(procedure_name) = by_procedure.first().map(|r| r.procedure.clone()) else {
        return Vec::new();
    };
    let province_name = narrow_to_one(&by_procedure, province, |r| r.province.as_str())
        .first()
        .map(|r| r.province.clone());
    rows.iter()
        .filter(|r| r.procedure == procedure_name && Some(&r.province) == province_name.as_ref())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;
    use uuid::Uuid;

    fn record(province: &str, procedure: &str, metric: &str, year: i32, value: f64) -> WaitTimeRecord {
        WaitTimeRecord::new(province, procedure, metric, year, value)
    }

    fn warehouse() -> Vec<WaitTimeRecord> {
        let mut rows = Vec::new();
        for (i, year) in (2019..=2023).enumerate() {
            let step = i as f64;
            rows.push(record("Ontario", "Hip Replacement", MEDIAN_METRIC, year, 150.0 + 10.0 * step));
            rows.push(record("Quebec", "Hip Replacement", MEDIAN_METRIC, year, 100.0 + 2.0 * step));
            rows.push(record("Alberta", "Hip Replacement", MEDIAN_METRIC, year, 200.0 - 5.0 * step));
            rows.push(record("Canada", "Hip Replacement", MEDIAN_METRIC, year, 150.0));
        }
        rows.push(record("Ontario", "Hip Replacement", P90_METRIC, 2023, 400.0));
        rows.push(record("Ontario", "Hip Replacement", VOLUME_METRIC, 2023, 9000.0));
        rows
    }

    fn analyzer(source: Arc<InMemorySource>) -> WaitTimeAnalyzer<Arc<InMemorySource>> {
        WaitTimeAnalyzer::new(source, &Settings::default())
    }

    // -------------------------------------------------------------------------
    // Data access and cache
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_year_filter_and_national_exclusion() {
        let source = Arc::new(InMemorySource::new(warehouse(), None));
        let mut engine = analyzer(source);
        let rows = engine
            .get_wait_time_data(&WaitTimeQuery::new(MEDIAN_METRIC, 2021, 2022))
            .await
            .unwrap();
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|r| (2021..=2022).contains(&r.year)));
        assert!(rows.iter().all(|r| r.province != "Canada"));
        assert_eq!(rows[0].province, "Alberta");
    }

    #[tokio::test]
    async fn test_repeated_query_hits_cache() {
        let source = Arc::new(InMemorySource::new(warehouse(), None));
        let mut engine = analyzer(Arc::clone(&source));
        let query = WaitTimeQuery::new(MEDIAN_METRIC, 2019, 2023).province(Some("ontario"));

        let first = engine.get_wait_time_data(&query).await.unwrap();
        let second = engine.get_wait_time_data(&query).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.query_count(), 1);
        assert_eq!(engine.cache().stats().hits, 1);

        engine.clear_cache();
        engine.get_wait_time_data(&query).await.unwrap();
        assert_eq!(source.query_count(), 2);
    }

    #[tokio::test]
    async fn test_new_load_invalidates_cache() {
        let source = Arc::new(InMemorySource::new(warehouse(), Some(Uuid::new_v4())));
        let mut engine = analyzer(Arc::clone(&source));
        assert!(engine.sync_dataset_version().await.unwrap());

        let query = WaitTimeQuery::new(MEDIAN_METRIC, 2023, 2023);
        assert_eq!(engine.get_wait_time_data(&query).await.unwrap().len(), 3);
        assert!(!engine.sync_dataset_version().await.unwrap());
        assert_eq!(engine.cache().len(), 1);

        source.reload(
            vec![record("Ontario", "Hip Replacement", MEDIAN_METRIC, 2023, 99.0)],
            Some(Uuid::new_v4()),
        );
        // stale until the version is checked
        assert_eq!(engine.get_wait_time_data(&query).await.unwrap().len(), 3);
        assert!(engine.sync_dataset_version().await.unwrap());
        let fresh = engine.get_wait_time_data(&query).await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].value, 99.0);
    }

    // -------------------------------------------------------------------------
    // Analyses
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_trends_from_engine_data() {
        let source = Arc::new(InMemorySource::new(warehouse(), None));
        let mut engine = analyzer(source);
        let rows = engine
            .get_wait_time_data(&WaitTimeQuery::new(MEDIAN_METRIC, 2019, 2023))
            .await
            .unwrap();

        let trends = engine.calculate_trend_analysis(&rows).ready().unwrap();
        assert_eq!(trends.len(), 3);
        assert_eq!(trends["Ontario_Hip Replacement"].slope, 10.0);
        assert!(trends["Alberta_Hip Replacement"].trend_category.is_improving());

        let short = engine.calculate_trend_analysis(&rows[..2]);
        assert_eq!(
            short,
            Analysis::insufficient(3, 2, "yearly values per province and procedure")
        );
    }

    #[tokio::test]
    async fn test_benchmark_joins_p90_and_volume() {
        let source = Arc::new(InMemorySource::new(warehouse(), None));
        let mut engine = analyzer(source);
        let report = engine
            .benchmark_analysis(Some("Ontario"), 2023)
            .await
            .unwrap()
            .ready()
            .unwrap();

        assert_eq!(report.summary.total_procedures, 1);
        let row = &report.by_procedure[0];
        // median 190 against a 182-day target
        assert_eq!(row.compliance, 95.8);
        assert_eq!(row.improvement_needed, 8.0);
        assert_eq!(row.p90_wait, Some(400.0));
        assert_eq!(row.volume, Some(9000.0));

        let nothing = engine.benchmark_analysis(Some("Yukon"), 2023).await.unwrap();
        assert!(!nothing.is_ready());
    }

    #[tokio::test]
    async fn test_provincial_comparison_ranks_provinces() {
        let source = Arc::new(InMemorySource::new(warehouse(), None));
        let mut engine = analyzer(source);
        let cmp = engine
            .provincial_comparison("hip", 2019)
            .await
            .unwrap()
            .ready()
            .unwrap();

        assert_eq!(cmp.procedure, "Hip Replacement");
        assert_eq!(cmp.national_average, 150.0);
        assert_eq!(cmp.best_performer.name, "Quebec");
        assert_eq!(cmp.worst_performer.name, "Alberta");
        assert_eq!(cmp.statistics.range, 100.0);
    }

    #[tokio::test]
    async fn test_compare_and_trend_tests() {
        let source = Arc::new(InMemorySource::new(warehouse(), None));
        let mut engine = analyzer(source);

        let test = engine
            .compare_provinces("Ontario", "Quebec", "Hip Replacement", Some((2019, 2023)))
            .await
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(test.sample_size_1, 5);
        assert_eq!(test.sample_size_2, 5);
        assert!(test.t_test.is_significant);
        assert!(test.interpretation.starts_with("Ontario has significantly longer"));

        let trend = engine
            .trend_significance("Ontario", "Hip Replacement")
            .await
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(trend.year_range, "2019-2023");
        assert!(trend.linear_regression.is_significant);
        assert_eq!(trend.mann_kendall.statistic, 10);
    }

    #[tokio::test]
    async fn test_insights_include_benchmark_alert() {
        let source = Arc::new(InMemorySource::new(warehouse(), None));
        let mut engine = analyzer(source);

        let insights = engine
            .generate_insights(None, Some("Hip Replacement"))
            .await
            .unwrap()
            .ready()
            .unwrap();
        // 2020-2023: Ontario and Quebec rise, Alberta falls
        assert!(insights
            .alerts
            .contains(&"2 procedure-province combinations show increasing wait times".to_string()));
        assert_eq!(
            insights.key_findings,
            vec!["1 procedure-province combinations show improving wait times"]
        );
        assert!(insights.alerts.iter().all(|a| !a.starts_with("Average benchmark")));

        let empty = engine.generate_insights(Some("Yukon"), None).await.unwrap();
        assert!(!empty.is_ready());
    }
}
