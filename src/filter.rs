use anyhow::Result;
use arrow::array::{Array, BooleanArray};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::dataset::Dataset;

/// The user's current year/sector/result choice.
///
/// An empty set selects nothing. `results: None` means no result-name filter
/// is applied at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub years: BTreeSet<i64>,
    pub sectors: BTreeSet<String>,
    #[serde(default)]
    pub results: Option<BTreeSet<String>>,
}

/// Values the user can pick from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub years: Vec<i64>,
    pub sectors: Vec<String>,
    /// Only the names present under the year/sector part of the selection.
    pub results: Vec<String>,
}

impl Selection {
    /// Every year and sector in the dataset, and every result name they leave available.
    pub fn everything(dataset: &Dataset) -> Result<Self> {
        let mut sel = Selection {
            years: distinct_years(dataset).into_iter().collect(),
            sectors: distinct_sectors(dataset).into_iter().collect(),
            results: None,
        };
        let base = filter_year_sector(dataset, &sel)?;
        sel.results = Some(distinct_results(&base).into_iter().collect());
        Ok(sel)
    }

    pub fn with_results<I, S>(mut self, results: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.results = Some(results.into_iter().map(Into::into).collect());
        self
    }
}

/// Sorted distinct non-missing fiscal years.
pub fn distinct_years(dataset: &Dataset) -> Vec<i64> {
    let set: BTreeSet<i64> = dataset.fiscal_years().iter().flatten().collect();
    set.into_iter().collect()
}

/// Sorted distinct non-missing sector names.
pub fn distinct_sectors(dataset: &Dataset) -> Vec<String> {
    let set: BTreeSet<&str> = dataset.sector_names().iter().flatten().collect();
    set.into_iter().map(str::to_string).collect()
}

/// Sorted distinct non-missing result names.
pub fn distinct_results(dataset: &Dataset) -> Vec<String> {
    let set: BTreeSet<&str> = dataset.result_names().iter().flatten().collect();
    set.into_iter().map(str::to_string).collect()
}

/// Year and sector options come from the whole dataset, result options from
/// the rows left after the year/sector part of `selection`.
pub fn options(dataset: &Dataset, selection: &Selection) -> Result<FilterOptions> {
    let base = filter_year_sector(dataset, selection)?;
    Ok(FilterOptions {
        years: distinct_years(dataset),
        sectors: distinct_sectors(dataset),
        results: distinct_results(&base),
    })
}

/// Apply only the year and sector constraints.
pub fn filter_year_sector(dataset: &Dataset, selection: &Selection) -> Result<Dataset> {
    let years = dataset.fiscal_years();
    let sectors = dataset.sector_names();
    let mask: BooleanArray = (0..dataset.num_rows())
        .map(|i| {
            let year_ok = years.is_valid(i) && selection.years.contains(&years.value(i));
            let sector_ok = sectors.is_valid(i) && selection.sectors.contains(sectors.value(i));
            Some(year_ok && sector_ok)
        })
        .collect();
    dataset.retain(&mask)
}

/// Keep rows whose year, sector and (if filtered) result name are all selected.
pub fn filter(dataset: &Dataset, selection: &Selection) -> Result<Dataset> {
    let base = filter_year_sector(dataset, selection)?;
    let out = match &selection.results {
        None => base,
        Some(results) => {
            let names = base.result_names();
            let mask: BooleanArray = names
                .iter()
                .map(|name| Some(name.is_some_and(|n| results.contains(n))))
                .collect();
            base.retain(&mask)?
        }
    };
    debug!(
        input = dataset.num_rows(),
        kept = out.num_rows(),
        "applied selection"
    );
    Ok(out)
}

/// Rows classified as human-impact.
pub fn human_impact(dataset: &Dataset) -> Result<Dataset> {
    let flags = dataset.human_impact().clone();
    dataset.retain(&flags)
}
