use arrow::array::{Array, Float64Array};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::dataset::{self, text_at, Dataset};

/// Column a group is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    FiscalYear,
    #[serde(alias = "sector")]
    SectorName,
    #[serde(alias = "result")]
    ResultName,
}

/// Numeric column being summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueField {
    Value,
    Disbursements,
}

impl GroupKey {
    pub fn column_name(self) -> &'static str {
        match self {
            GroupKey::FiscalYear => dataset::FISCAL_YEAR,
            GroupKey::SectorName => dataset::SECTOR_NAME,
            GroupKey::ResultName => dataset::RESULT_NAME,
        }
    }

    fn key_at(self, ds: &Dataset, row: usize) -> Option<KeyValue> {
        match self {
            GroupKey::FiscalYear => {
                let years = ds.fiscal_years();
                years.is_valid(row).then(|| KeyValue::Year(years.value(row)))
            }
            GroupKey::SectorName => text_at(ds.sector_names(), row).map(KeyValue::Text),
            GroupKey::ResultName => text_at(ds.result_names(), row).map(KeyValue::Text),
        }
    }
}

impl ValueField {
    pub fn column_name(self) -> &'static str {
        match self {
            ValueField::Value => dataset::VALUE,
            ValueField::Disbursements => dataset::DISBURSEMENTS,
        }
    }

    fn column(self, ds: &Dataset) -> &Float64Array {
        match self {
            ValueField::Value => ds.values(),
            ValueField::Disbursements => ds.disbursements(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl fmt::Display for ValueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for GroupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fiscal_year" | "year" => Ok(GroupKey::FiscalYear),
            "sector_name" | "sector" => Ok(GroupKey::SectorName),
            "result_name" | "result" => Ok(GroupKey::ResultName),
            other => Err(format!(
                "unknown group key '{}' (expected fiscal_year, sector_name or result_name)",
                other
            )),
        }
    }
}

impl FromStr for ValueField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "value" => Ok(ValueField::Value),
            "disbursements" => Ok(ValueField::Disbursements),
            other => Err(format!(
                "unknown value field '{}' (expected value or disbursements)",
                other
            )),
        }
    }
}

/// One component of a group key.
///
/// Ordering puts years before text, which only matters if both kinds share a
/// position, and they never do.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum KeyValue {
    Year(i64),
    Text(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Year(y) => write!(f, "{}", y),
            KeyValue::Text(t) => f.write_str(t),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        KeyValue::Text(s.to_string())
    }
}

impl From<i64> for KeyValue {
    fn from(y: i64) -> Self {
        KeyValue::Year(y)
    }
}

/// A group and its summed field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSum {
    pub key: Vec<KeyValue>,
    pub sum: f64,
}

/// A group and one optional sum per requested field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTotals {
    pub key: Vec<KeyValue>,
    /// `None` where the group has no non-missing value for that field.
    pub totals: Vec<Option<f64>>,
}

fn group_key(ds: &Dataset, keys: &[GroupKey], row: usize) -> Option<Vec<KeyValue>> {
    keys.iter().map(|k| k.key_at(ds, row)).collect()
}

/// Sum `field` per distinct combination of `keys`.
///
/// Rows missing `field` are left out of this sum only, and rows with a
/// missing key component belong to no group. Output is in ascending key
/// order; see [`sort_descending`] and [`top_n`] for ranked output.
pub fn aggregate(ds: &Dataset, keys: &[GroupKey], field: ValueField) -> Vec<GroupSum> {
    let values = field.column(ds);
    let mut groups: BTreeMap<Vec<KeyValue>, f64> = BTreeMap::new();
    for row in 0..ds.num_rows() {
        if values.is_null(row) {
            continue;
        }
        if let Some(key) = group_key(ds, keys, row) {
            *groups.entry(key).or_insert(0.0) += values.value(row);
        }
    }
    groups
        .into_iter()
        .map(|(key, sum)| GroupSum { key, sum })
        .collect()
}

/// Several sums per group in one pass. A group exists once any row carries
/// its key, even if every requested field is missing there.
pub fn aggregate_fields(ds: &Dataset, keys: &[GroupKey], fields: &[ValueField]) -> Vec<GroupTotals> {
    let columns: Vec<&Float64Array> = fields.iter().map(|f| f.column(ds)).collect();
    let mut groups: BTreeMap<Vec<KeyValue>, Vec<Option<f64>>> = BTreeMap::new();
    for row in 0..ds.num_rows() {
        let Some(key) = group_key(ds, keys, row) else {
            continue;
        };
        let totals = groups
            .entry(key)
            .or_insert_with(|| vec![None; columns.len()]);
        for (total, col) in totals.iter_mut().zip(&columns) {
            if col.is_valid(row) {
                *total = Some(total.unwrap_or(0.0) + col.value(row));
            }
        }
    }
    groups
        .into_iter()
        .map(|(key, totals)| GroupTotals { key, totals })
        .collect()
}

/// Like [`aggregate`], but a group stays present when every row in it is
/// missing `field`; its sum is then 0.
pub fn aggregate_keep_groups(ds: &Dataset, keys: &[GroupKey], field: ValueField) -> Vec<GroupSum> {
    aggregate_fields(ds, keys, &[field])
        .into_iter()
        .map(|g| GroupSum {
            key: g.key,
            sum: g.totals.first().copied().flatten().unwrap_or(0.0),
        })
        .collect()
}

/// Sum of every non-missing value of `field`.
pub fn total(ds: &Dataset, field: ValueField) -> f64 {
    field.column(ds).iter().flatten().sum()
}

/// Stable sort, largest sum first; equal sums keep their relative order.
pub fn sort_descending(groups: &mut [GroupSum]) {
    groups.sort_by(|a, b| b.sum.total_cmp(&a.sum));
}

/// Sort descending, then keep the first `n`.
pub fn top_n(mut groups: Vec<GroupSum>, n: usize) -> Vec<GroupSum> {
    sort_descending(&mut groups);
    groups.truncate(n);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use anyhow::Result;

    fn gs(key: &[&str], sum: f64) -> GroupSum {
        GroupSum {
            key: key.iter().map(|k| KeyValue::from(*k)).collect(),
            sum,
        }
    }

    fn example() -> Result<Dataset> {
        Dataset::from_raw_rows(
            [
                [Some("2020"), Some("Health"), Some("People reached"), Some("10"), Some("100")],
                [Some("2020"), Some("Health"), Some("Clinics"), Some("5"), Some("bad")],
                [Some("2020"), Some("Education"), Some("Students"), Some("20"), Some("50")],
            ],
            &Classifier::default(),
        )
    }

    #[test]
    fn test_example_by_sector() -> Result<()> {
        let ds = example()?;

        let mut by_value = aggregate(&ds, &[GroupKey::SectorName], ValueField::Value);
        sort_descending(&mut by_value);
        assert_eq!(by_value, vec![gs(&["Education"], 20.0), gs(&["Health"], 15.0)]);

        // the "bad" disbursement only drops out of the disbursement sum
        let by_disb = aggregate(&ds, &[GroupKey::SectorName], ValueField::Disbursements);
        assert_eq!(by_disb, vec![gs(&["Education"], 50.0), gs(&["Health"], 100.0)]);
        Ok(())
    }

    #[test]
    fn test_two_key_grouping() -> Result<()> {
        let ds = Dataset::from_raw_rows(
            [
                [Some("2019"), Some("Health"), Some("A"), Some("1"), None],
                [Some("2019"), Some("Health"), Some("A"), Some("2"), None],
                [Some("2019"), Some("Health"), Some("B"), Some("4"), None],
                [Some("2019"), Some("Water"), Some("A"), Some("8"), None],
            ],
            &Classifier::default(),
        )?;
        let groups = aggregate(
            &ds,
            &[GroupKey::SectorName, GroupKey::ResultName],
            ValueField::Value,
        );
        assert_eq!(
            groups,
            vec![
                gs(&["Health", "A"], 3.0),
                gs(&["Health", "B"], 4.0),
                gs(&["Water", "A"], 8.0),
            ]
        );
        assert!(aggregate(&ds, &[GroupKey::SectorName], ValueField::Disbursements).is_empty());
        Ok(())
    }

    #[test]
    fn test_year_keys_and_missing_keys() -> Result<()> {
        let ds = Dataset::from_raw_rows(
            [
                [Some("2020"), Some("X"), None, Some("1"), None],
                [Some("2019"), Some("X"), None, Some("2"), None],
                [None, Some("X"), None, Some("4"), None],
            ],
            &Classifier::default(),
        )?;
        let by_year = aggregate(&ds, &[GroupKey::FiscalYear], ValueField::Value);
        assert_eq!(
            by_year,
            vec![
                GroupSum { key: vec![KeyValue::Year(2019)], sum: 2.0 },
                GroupSum { key: vec![KeyValue::Year(2020)], sum: 1.0 },
            ]
        );
        // result_name is missing everywhere, so nothing groups
        assert!(aggregate(&ds, &[GroupKey::ResultName], ValueField::Value).is_empty());
        // no keys: a single overall group
        assert_eq!(
            aggregate(&ds, &[], ValueField::Value),
            vec![GroupSum { key: vec![], sum: 7.0 }]
        );
        Ok(())
    }

    #[test]
    fn test_mass_conservation() -> Result<()> {
        let ds = Dataset::from_raw_rows(
            [
                [Some("2018"), Some("A"), Some("r1"), Some("1.5"), Some("10")],
                [Some("2018"), Some("B"), Some("r2"), Some("x"), Some("20")],
                [Some("2019"), Some("A"), Some("r3"), Some("3"), Some("")],
                [Some("2019"), Some("C"), Some("r1"), Some("4.25"), Some("1e2")],
                [Some("2020"), Some("B"), Some("r2"), None, Some("7")],
            ],
            &Classifier::default(),
        )?;
        for field in [ValueField::Value, ValueField::Disbursements] {
            for keys in [
                vec![GroupKey::SectorName],
                vec![GroupKey::ResultName],
                vec![GroupKey::FiscalYear, GroupKey::SectorName],
            ] {
                let sum: f64 = aggregate(&ds, &keys, field).iter().map(|g| g.sum).sum();
                assert!(
                    (sum - total(&ds, field)).abs() < 1e-9,
                    "{field} by {keys:?}: {sum}"
                );
            }
        }
        Ok(())
    }

    #[test]
    fn test_sort_is_stable_and_top_n_keeps_prefix() {
        let groups = vec![
            gs(&["a"], 5.0),
            gs(&["b"], 9.0),
            gs(&["c"], 5.0),
            gs(&["d"], 1.0),
            gs(&["e"], 9.0),
        ];
        let mut sorted = groups.clone();
        sort_descending(&mut sorted);
        let order: Vec<String> = sorted.iter().map(|g| g.key[0].to_string()).collect();
        assert_eq!(order, vec!["b", "e", "a", "c", "d"]);

        for n in 0..=6 {
            let top = top_n(groups.clone(), n);
            assert_eq!(top.len(), n.min(groups.len()));
            assert_eq!(top[..], sorted[..top.len()]);
        }
    }

    #[test]
    fn test_aggregate_fields() -> Result<()> {
        let ds = Dataset::from_raw_rows(
            [
                [Some("2019"), Some("Health"), Some("x"), Some("3"), None],
                [Some("2019"), Some("Health"), Some("y"), Some("4"), Some("10")],
                [Some("2019"), Some("Water"), Some("z"), None, None],
            ],
            &Classifier::default(),
        )?;
        let totals = aggregate_fields(
            &ds,
            &[GroupKey::SectorName],
            &[ValueField::Value, ValueField::Disbursements],
        );
        assert_eq!(
            totals,
            vec![
                GroupTotals {
                    key: vec!["Health".into()],
                    totals: vec![Some(7.0), Some(10.0)],
                },
                GroupTotals {
                    key: vec!["Water".into()],
                    totals: vec![None, None],
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_keep_groups_with_only_missing_values() -> Result<()> {
        let ds = Dataset::from_raw_rows(
            [
                [Some("2019"), Some("Health"), Some("x"), Some("3"), None],
                [Some("2019"), Some("Water"), Some("y"), None, Some("700")],
                [Some("2019"), None, Some("z"), Some("9"), None],
            ],
            &Classifier::default(),
        )?;
        assert_eq!(
            aggregate_keep_groups(&ds, &[GroupKey::SectorName], ValueField::Value),
            vec![gs(&["Health"], 3.0), gs(&["Water"], 0.0)]
        );
        assert_eq!(
            aggregate_keep_groups(&ds, &[GroupKey::SectorName], ValueField::Disbursements),
            vec![gs(&["Health"], 0.0), gs(&["Water"], 700.0)]
        );
        // the row-dropping form loses Water entirely
        assert_eq!(
            aggregate(&ds, &[GroupKey::SectorName], ValueField::Value),
            vec![gs(&["Health"], 3.0)]
        );
        Ok(())
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("sector".parse::<GroupKey>(), Ok(GroupKey::SectorName));
        assert_eq!("Result_Name".parse::<GroupKey>(), Ok(GroupKey::ResultName));
        assert_eq!("disbursements".parse::<ValueField>(), Ok(ValueField::Disbursements));
        assert!("amount".parse::<ValueField>().is_err());
        assert_eq!(GroupKey::FiscalYear.to_string(), "fiscal_year");
    }
}
