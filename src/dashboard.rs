use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::{self, GroupKey, GroupSum, KeyValue, ValueField};
use crate::config::DashboardConfig;
use crate::dataset::{Dataset, DetailRow};
use crate::filter::{self, Selection};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_rows: usize,
    pub filtered_rows: usize,
    pub human_impact_rows: usize,
}

/// Impact and funding of the human-impact rows of one sector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorImpact {
    pub sector_name: String,
    pub total_impact: f64,
    pub total_disbursed: f64,
}

/// Per-result breakdown of one sector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorBreakdown {
    pub sector_name: String,
    pub results: Vec<GroupSum>,
}

/// Everything the dashboard shows for one selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub selection: Selection,
    pub summary: Summary,
    /// Sectors ranked by total disbursement.
    pub top_sectors: Vec<GroupSum>,
    /// Human-impact indicators ranked by total value.
    pub top_human_results: Vec<GroupSum>,
    pub impact_vs_funding: Vec<SectorImpact>,
    pub drilldown: Vec<SectorBreakdown>,
    pub table: Vec<DetailRow>,
}

impl Dashboard {
    /// Run one full filter + aggregate pass over `dataset`.
    pub fn build(dataset: &Dataset, selection: &Selection, cfg: &DashboardConfig) -> Result<Self> {
        let filtered = filter::filter(dataset, selection)?;
        let human = filter::human_impact(&filtered)?;
        debug!(
            filtered = filtered.num_rows(),
            human = human.num_rows(),
            "selection applied"
        );

        let dashboard = Dashboard {
            generated_at: Utc::now(),
            selection: selection.clone(),
            summary: Summary {
                total_rows: dataset.num_rows(),
                filtered_rows: filtered.num_rows(),
                human_impact_rows: human.num_rows(),
            },
            top_sectors: top_sectors(&filtered, cfg.top_sectors),
            top_human_results: top_human_results(
                &human,
                &cfg.human_impact_grouping,
                cfg.top_results,
            ),
            impact_vs_funding: impact_vs_funding(&human),
            drilldown: drilldown(&filtered, selection),
            table: filtered.detail_rows(),
        };
        info!(
            rows = dashboard.summary.filtered_rows,
            sectors = dashboard.top_sectors.len(),
            "dashboard built"
        );
        Ok(dashboard)
    }
}

/// Sectors by total disbursement, largest first.
pub fn top_sectors(filtered: &Dataset, n: usize) -> Vec<GroupSum> {
    aggregate::top_n(
        aggregate::aggregate(filtered, &[GroupKey::SectorName], ValueField::Disbursements),
        n,
    )
}

/// Human-impact results by total value, largest first. Results with no
/// recorded value still rank, at 0.
pub fn top_human_results(human: &Dataset, grouping: &[GroupKey], n: usize) -> Vec<GroupSum> {
    aggregate::top_n(
        aggregate::aggregate_keep_groups(human, grouping, ValueField::Value),
        n,
    )
}

/// Per-sector impact and disbursement totals; a total with nothing to sum is 0.
pub fn impact_vs_funding(human: &Dataset) -> Vec<SectorImpact> {
    aggregate::aggregate_fields(
        human,
        &[GroupKey::SectorName],
        &[ValueField::Value, ValueField::Disbursements],
    )
    .into_iter()
    .filter_map(|g| match (g.key.as_slice(), g.totals.as_slice()) {
        ([KeyValue::Text(sector)], [impact, disbursed]) => Some(SectorImpact {
            sector_name: sector.clone(),
            total_impact: impact.unwrap_or(0.0),
            total_disbursed: disbursed.unwrap_or(0.0),
        }),
        _ => None,
    })
    .collect()
}

/// Result breakdown for every selected sector that still has rows.
pub fn drilldown(filtered: &Dataset, selection: &Selection) -> Vec<SectorBreakdown> {
    let by_pair = aggregate::aggregate_keep_groups(
        filtered,
        &[GroupKey::SectorName, GroupKey::ResultName],
        ValueField::Value,
    );
    let present = filter::distinct_sectors(filtered);

    let mut out = Vec::new();
    for sector in &selection.sectors {
        if !present.contains(sector) {
            continue;
        }
        let mut results: Vec<GroupSum> = by_pair
            .iter()
            .filter(|g| matches!(g.key.first(), Some(KeyValue::Text(s)) if s == sector))
            .map(|g| GroupSum {
                key: g.key[1..].to_vec(),
                sum: g.sum,
            })
            .collect();
        aggregate::sort_descending(&mut results);
        out.push(SectorBreakdown {
            sector_name: sector.clone(),
            results,
        });
    }
    out
}
