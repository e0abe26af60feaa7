//! Read-only projections consumed by the dashboard front end
//!
//! `Dashboard` holds the immutable base datasets of a session. Every view is
//! produced by [`Dashboard::render`] from an explicit [`FilterState`]; nothing
//! here mutates the datasets or keeps a "current" filtered copy between calls.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::clusters::{AdviceEntry, ClusterAssignment, ClusterSummary, FeatureAverages, FeatureMeans};
use crate::config::Settings;
use crate::data::{selection, DateRange, OrderLine, TransactionStore, ALL};
use crate::error::Error;
use crate::features::{aggregate_features, default_reference_date};
use crate::scoring::{score_customers, RfmLevel, RfmScoredRecord};

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Active selections; `None` and "All" both mean unrestricted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterState {
    pub country: Option<String>,
    /// Defaults to the full span of the transactions
    pub date_range: Option<DateRange>,
    pub rfm_level: Option<String>,
    pub segment: Option<String>,
}

/// Table sizes for the rendered views
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSettings {
    pub top_n: usize,
    pub table_rows: usize,
    pub preview_rows: usize,
    pub weekday_years: Vec<i32>,
}

impl From<&Settings> for ReportSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            top_n: settings.top_n,
            table_rows: settings.table_rows,
            preview_rows: settings.preview_rows,
            weekday_years: settings.weekday_years.clone(),
        }
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesSummary {
    pub total_revenue: f64,
    pub unique_customers: usize,
    pub unique_orders: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRow {
    #[serde(flatten)]
    pub line: OrderLine,
    #[serde(rename = "Revenue")]
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRevenue {
    pub description: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerTransactions {
    pub customer_id: i64,
    pub transaction_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerRevenue {
    pub customer_id: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryTransactions {
    pub country: String,
    pub transaction_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRevenue {
    /// `YYYY-MM`
    pub year_month: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekdayTransactions {
    pub year: i32,
    pub weekday: &'static str,
    pub transaction_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesViews {
    pub summary: SalesSummary,
    pub preview: Vec<PreviewRow>,
    pub top_products: Vec<ProductRevenue>,
    pub top_customers_by_transactions: Vec<CustomerTransactions>,
    pub top_customers_by_revenue: Vec<CustomerRevenue>,
    /// Every country in the filtered data, for the map
    pub country_transactions: Vec<CountryTransactions>,
    pub top_countries: Vec<CountryTransactions>,
    pub monthly_revenue: Vec<MonthlyRevenue>,
    pub weekday_transactions: Vec<WeekdayTransactions>,
}

impl SalesViews {
    pub fn is_empty(&self) -> bool {
        self.summary.unique_orders == 0
    }

    /// Turn an empty filter result into [`Error::EmptyResult`] for callers
    /// that render a "no data" state instead of empty tables.
    pub fn ensure_non_empty(&self, filters: &FilterState) -> crate::Result<()> {
        if self.is_empty() {
            return Err(Error::EmptyResult(describe(filters)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelCount {
    pub level: RfmLevel,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelAverages {
    pub level: RfmLevel,
    #[serde(flatten)]
    pub averages: FeatureAverages,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfmViews {
    pub levels: Vec<RfmLevel>,
    pub table: Vec<RfmScoredRecord>,
    pub level_counts: Vec<LevelCount>,
    pub level_averages: Vec<LevelAverages>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterCount {
    pub cluster: i64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterAverageRow {
    pub cluster: i64,
    #[serde(flatten)]
    pub averages: FeatureAverages,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterViews {
    pub segments: Vec<String>,
    pub counts: Vec<ClusterCount>,
    pub table: Vec<ClusterAssignment>,
    pub averages: Vec<ClusterAverageRow>,
    pub legend: Vec<AdviceEntry>,
}

/// Choices the front end offers in its selectors, "All" first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub countries: Vec<String>,
    pub date_bounds: Option<DateRange>,
    pub rfm_levels: Vec<String>,
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardViews {
    pub filters: FilterState,
    pub options: FilterOptions,
    pub sales: SalesViews,
    pub rfm: RfmViews,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clusters: Option<ClusterViews>,
}

/// Immutable base datasets of one session
#[derive(Debug, Clone)]
pub struct Dashboard {
    transactions: Arc<TransactionStore>,
    rfm: Arc<Vec<RfmScoredRecord>>,
    clusters: Option<Arc<Vec<ClusterAssignment>>>,
}

impl Dashboard {
    pub fn new(transactions: Arc<TransactionStore>, rfm: Arc<Vec<RfmScoredRecord>>) -> Self {
        Self {
            transactions,
            rfm,
            clusters: None,
        }
    }

    /// Build the RFM table from the whole transaction set
    ///
    /// # Arguments
    /// * `transactions` - Base order lines
    /// * `reference_date` - Recency anchor, the day after the latest invoice when `None`
    /// * `bins` - Quantile buckets per sub-score
    pub fn from_transactions(
        transactions: Arc<TransactionStore>,
        reference_date: Option<NaiveDate>,
        bins: u8,
    ) -> crate::Result<Self> {
        let reference_date = reference_date.or_else(|| default_reference_date(transactions.lines()));
        let features = match reference_date {
            Some(date) => aggregate_features(transactions.lines(), date),
            None => Vec::new(),
        };
        let rfm = score_customers(&features, bins)?;
        Ok(Self::new(transactions, Arc::new(rfm)))
    }

    pub fn with_clusters(mut self, clusters: Arc<Vec<ClusterAssignment>>) -> Self {
        self.clusters = Some(clusters);
        self
    }

    pub fn transactions(&self) -> &TransactionStore {
        &self.transactions
    }

    pub fn rfm(&self) -> &[RfmScoredRecord] {
        &self.rfm
    }

    pub fn clusters(&self) -> Option<&[ClusterAssignment]> {
        self.clusters.as_deref().map(Vec::as_slice)
    }

    pub fn filter_options(&self) -> FilterOptions {
        let with_all = |values: Vec<String>| {
            std::iter::once(ALL.to_string()).chain(values).collect::<Vec<_>>()
        };
        let segments = self
            .clusters()
            .map(|records| ClusterSummary::new(records).segments())
            .unwrap_or_default();

        FilterOptions {
            countries: with_all(self.transactions.countries()),
            date_bounds: self.transactions.date_bounds(),
            rfm_levels: with_all(present_levels(&self.rfm).iter().map(|l| l.label().to_string()).collect()),
            segments: with_all(segments),
        }
    }

    /// Produce every view for one filter state. Pure: the same state over the
    /// same datasets always yields the same views.
    pub fn render(&self, state: &FilterState, settings: &ReportSettings) -> crate::Result<DashboardViews> {
        let view = match state.date_range.or_else(|| self.transactions.date_bounds()) {
            Some(range) => self.transactions.filter(state.country.as_deref(), &range),
            None => Vec::new(),
        };

        let sales = sales_views(&view, settings);
        let rfm = rfm_views(&self.rfm, state.rfm_level.as_deref(), settings);
        let clusters = match self.clusters() {
            Some(records) => Some(cluster_views(records, state.segment.as_deref(), settings)?),
            None => None,
        };

        debug!(rows = view.len(), empty = sales.is_empty(), "rendered dashboard");
        Ok(DashboardViews {
            filters: state.clone(),
            options: self.filter_options(),
            sales,
            rfm,
            clusters,
        })
    }
}

fn describe(filters: &FilterState) -> String {
    let range = filters
        .date_range
        .map(|r| format!("{}..={}", r.start, r.end))
        .unwrap_or_else(|| ALL.to_string());
    format!(
        "country={}, dates={}",
        filters.country.as_deref().unwrap_or(ALL),
        range
    )
}

/// Metric values ordered descending in top-N tables
trait Metric: Copy {
    fn compare(&self, other: &Self) -> Ordering;
}

impl Metric for f64 {
    fn compare(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl Metric for usize {
    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

/// Sort by metric descending, key ascending on ties, keep the first `n`
fn top_n<K: Ord, V: Metric>(totals: BTreeMap<K, V>, n: usize) -> Vec<(K, V)> {
    let mut rows: Vec<(K, V)> = totals.into_iter().collect();
    rows.sort_by(|a, b| b.1.compare(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows.truncate(n);
    rows
}

fn revenue_by<K: Ord>(lines: &[&OrderLine], key: impl Fn(&OrderLine) -> Option<K>) -> BTreeMap<K, f64> {
    let mut totals = BTreeMap::new();
    for line in lines {
        if let Some(k) = key(line) {
            *totals.entry(k).or_insert(0.0) += line.revenue();
        }
    }
    totals
}

fn invoices_by<'a, K: Ord>(
    lines: &[&'a OrderLine],
    key: impl Fn(&OrderLine) -> Option<K>,
) -> BTreeMap<K, usize> {
    let mut invoices: BTreeMap<K, BTreeSet<&'a str>> = BTreeMap::new();
    for line in lines {
        if let Some(k) = key(line) {
            invoices.entry(k).or_default().insert(line.invoice_no.as_str());
        }
    }
    invoices.into_iter().map(|(k, set)| (k, set.len())).collect()
}

fn sales_views(lines: &[&OrderLine], settings: &ReportSettings) -> SalesViews {
    let n = settings.top_n;

    let summary = SalesSummary {
        total_revenue: lines.iter().map(|l| l.revenue()).sum(),
        unique_customers: lines.iter().filter_map(|l| l.customer_id).collect::<BTreeSet<_>>().len(),
        unique_orders: lines.iter().map(|l| l.invoice_no.as_str()).collect::<BTreeSet<_>>().len(),
    };

    let preview = lines
        .iter()
        .take(settings.preview_rows)
        .map(|l| PreviewRow {
            line: (*l).clone(),
            revenue: l.revenue(),
        })
        .collect();

    let products = revenue_by(lines, |l| {
        (!l.description.is_empty()).then(|| l.description.clone())
    });
    let top_products = top_n(products, n)
        .into_iter()
        .map(|(description, revenue)| ProductRevenue { description, revenue })
        .collect();

    let top_customers_by_transactions = top_n(invoices_by(lines, |l| l.customer_id), n)
        .into_iter()
        .map(|(customer_id, transaction_count)| CustomerTransactions {
            customer_id,
            transaction_count,
        })
        .collect();

    let top_customers_by_revenue = top_n(revenue_by(lines, |l| l.customer_id), n)
        .into_iter()
        .map(|(customer_id, revenue)| CustomerRevenue { customer_id, revenue })
        .collect();

    let countries = invoices_by(lines, |l| Some(l.country.clone()));
    let country_transactions: Vec<CountryTransactions> = countries
        .iter()
        .map(|(country, &transaction_count)| CountryTransactions {
            country: country.clone(),
            transaction_count,
        })
        .collect();
    let top_countries = top_n(countries, n)
        .into_iter()
        .map(|(country, transaction_count)| CountryTransactions {
            country,
            transaction_count,
        })
        .collect();

    let monthly_revenue = revenue_by(lines, |l| {
        Some(format!("{:04}-{:02}", l.invoice_date.year(), l.invoice_date.month()))
    })
    .into_iter()
    .map(|(year_month, revenue)| MonthlyRevenue { year_month, revenue })
    .collect();

    let years = &settings.weekday_years;
    let weekday_transactions = invoices_by(lines, |l| {
        let year = l.invoice_date.year();
        (years.is_empty() || years.contains(&year))
            .then(|| (year, l.invoice_date.weekday().num_days_from_monday() as usize))
    })
    .into_iter()
    .map(|((year, day), transaction_count)| WeekdayTransactions {
        year,
        weekday: WEEKDAYS[day],
        transaction_count,
    })
    .collect();

    SalesViews {
        summary,
        preview,
        top_products,
        top_customers_by_transactions,
        top_customers_by_revenue,
        country_transactions,
        top_countries,
        monthly_revenue,
        weekday_transactions,
    }
}

/// Levels present in the records, sorted by label
fn present_levels(records: &[RfmScoredRecord]) -> Vec<RfmLevel> {
    let mut levels: Vec<RfmLevel> = records
        .iter()
        .map(|r| r.level)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    levels.sort_by_key(|l| l.label());
    levels
}

/// An unrecognised level label matches no record, like an unknown country
fn rfm_views(records: &[RfmScoredRecord], level: Option<&str>, settings: &ReportSettings) -> RfmViews {
    let selected: Option<Option<RfmLevel>> = selection(level).map(|label| label.parse().ok());

    let table = records
        .iter()
        .filter(|r| selected.map_or(true, |level| level == Some(r.level)))
        .take(settings.table_rows)
        .cloned()
        .collect();

    let mut counts: BTreeMap<RfmLevel, usize> = BTreeMap::new();
    let mut means: BTreeMap<RfmLevel, FeatureMeans> = BTreeMap::new();
    for record in records {
        *counts.entry(record.level).or_insert(0) += 1;
        means.entry(record.level).or_default().add(&record.features);
    }

    let mut level_counts: Vec<LevelCount> = counts
        .into_iter()
        .map(|(level, count)| LevelCount { level, count })
        .collect();
    level_counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.level.label().cmp(b.level.label())));

    let mut level_averages: Vec<LevelAverages> = means
        .into_iter()
        .map(|(level, m)| LevelAverages {
            level,
            averages: m.rounded(),
        })
        .collect();
    level_averages.sort_by_key(|row| row.level.label());

    RfmViews {
        levels: present_levels(records),
        table,
        level_counts,
        level_averages,
    }
}

fn cluster_views(
    records: &[ClusterAssignment],
    segment: Option<&str>,
    settings: &ReportSettings,
) -> crate::Result<ClusterViews> {
    let summary = ClusterSummary::new(records);

    Ok(ClusterViews {
        table: summary
            .filter_by_segment(segment)
            .into_iter()
            .take(settings.table_rows)
            .cloned()
            .collect(),
        counts: summary
            .counts_by_cluster()
            .into_iter()
            .map(|(cluster, count)| ClusterCount { cluster, count })
            .collect(),
        averages: summary
            .averages_by_cluster()
            .into_iter()
            .map(|(cluster, averages)| ClusterAverageRow { cluster, averages })
            .collect(),
        legend: summary.advice_legend()?,
        segments: summary.segments(),
    })
}
