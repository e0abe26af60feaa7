//! Recency / Frequency / Monetary feature computation from order lines

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

use crate::data::OrderLine;

/// Per-customer behavioral features
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerFeatures {
    #[serde(rename = "CustomerID")]
    pub customer_id: i64,
    /// Days between the last purchase and the reference date
    #[serde(rename = "Recency")]
    pub recency: i64,
    /// Distinct invoices
    #[serde(rename = "Frequency")]
    pub frequency: u32,
    /// Sum of line revenue, returns included
    #[serde(rename = "Monetary")]
    pub monetary: f64,
}

#[derive(Default)]
struct Accumulator<'a> {
    last_purchase: Option<NaiveDate>,
    invoices: BTreeSet<&'a str>,
    monetary: f64,
}

/// Default reference date: the day after the latest invoice
pub fn default_reference_date<'a>(lines: impl IntoIterator<Item = &'a OrderLine>) -> Option<NaiveDate> {
    lines
        .into_iter()
        .map(|line| line.invoice_date.date())
        .max()
        .map(|last| last + Duration::days(1))
}

/// Compute RFM features for every customer with a known id
///
/// # Arguments
/// * `lines` - Order lines; rows without a CustomerID are skipped
/// * `reference_date` - Fixed date recency is measured against
///
/// # Returns
/// * One record per customer, ordered by customer id. Recency is counted in
///   calendar days and saturates at zero for purchases after the reference date.
pub fn aggregate_features<'a>(
    lines: impl IntoIterator<Item = &'a OrderLine>,
    reference_date: NaiveDate,
) -> Vec<CustomerFeatures> {
    let mut customers: BTreeMap<i64, Accumulator<'a>> = BTreeMap::new();

    for line in lines {
        let Some(customer_id) = line.customer_id else {
            continue;
        };
        let acc = customers.entry(customer_id).or_default();
        let date = line.invoice_date.date();
        acc.last_purchase = Some(acc.last_purchase.map_or(date, |d| d.max(date)));
        acc.invoices.insert(line.invoice_no.as_str());
        acc.monetary += line.revenue();
    }

    let mut clamped = 0usize;
    let features: Vec<CustomerFeatures> = customers
        .into_iter()
        .filter_map(|(customer_id, acc)| {
            let last = acc.last_purchase?;
            let days = (reference_date - last).num_days();
            if days < 0 {
                clamped += 1;
            }
            Some(CustomerFeatures {
                customer_id,
                recency: days.max(0),
                frequency: acc.invoices.len() as u32,
                monetary: acc.monetary,
            })
        })
        .collect();

    if clamped > 0 {
        warn!(
            customers = clamped,
            %reference_date,
            "purchases after the reference date; recency clamped to 0"
        );
    }
    debug!(customers = features.len(), %reference_date, "aggregated RFM features");
    features
}
