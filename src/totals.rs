use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::{Result, ScanError};

pub const ALL_KEY: &str = "all";
const SYBIL_MARKER: &str = "_sybil";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Eligible,
    Sybil,
    Error,
}

impl Status {
    /// Name of the bucket file a wallet lands in, if any.
    pub fn bucket_file(&self) -> Option<&'static str> {
        match self {
            Status::Eligible => Some("eligibles.txt"),
            Status::Sybil => Some("sybils.txt"),
            Status::Error => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Eligible => "Eligible",
            Status::Sybil => "Sybil",
            Status::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Category points plus the derived `all` total.
#[derive(Debug, Clone, PartialEq)]
pub struct Totals {
    points: BTreeMap<String, f64>,
}

impl Totals {
    pub fn all(&self) -> f64 {
        self.points.get(ALL_KEY).copied().unwrap_or(0.0)
    }

    pub fn rounded_all(&self) -> f64 {
        round2(self.all())
    }

    pub fn points(&self) -> &BTreeMap<String, f64> {
        &self.points
    }

    /// Categories as reported upstream, without the derived total.
    pub fn categories(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.points.iter().filter(|(k, _)| k.as_str() != ALL_KEY)
    }

    pub fn status(&self) -> Status {
        if self.points.keys().any(|k| k.contains(SYBIL_MARKER)) {
            Status::Sybil
        } else {
            Status::Eligible
        }
    }
}

/// Sums every category into `all`. A real category called `all` is overwritten.
pub fn aggregate(points: BTreeMap<String, f64>) -> Totals {
    let mut points = points;
    let total: f64 = points.values().sum();
    points.insert(ALL_KEY.to_string(), total);
    Totals { points }
}

/// Converts the raw `result.data` object into numeric categories.
pub fn numeric_points(data: &Map<String, Value>) -> Result<BTreeMap<String, f64>> {
    data.iter()
        .map(|(k, v)| {
            v.as_f64().map(|n| (k.clone(), n)).ok_or_else(|| {
                ScanError::MalformedResponse(format!("category {k} is not numeric: {v}"))
            })
        })
        .collect()
}

/// Rounds the stored value to cents the way decimal formatting does, so
/// 2.675 (stored just below) becomes 2.67 and exact ties go to even.
pub fn round2(x: f64) -> f64 {
    format!("{x:.2}").parse().unwrap_or(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn points(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn empty_mapping_is_eligible_with_zero() {
        let totals = aggregate(BTreeMap::new());
        assert_eq!(totals.all(), 0.0);
        assert_eq!(totals.status(), Status::Eligible);
    }

    #[test]
    fn sybil_key_flags_wallet() {
        let totals = aggregate(points(&[("epoch1_sybil", 10.0), ("epoch2", 5.0)]));
        assert_eq!(totals.all(), 15.0);
        assert_eq!(totals.status(), Status::Sybil);
    }

    #[test]
    fn plain_categories_are_eligible() {
        let pts = points(&[("epoch1", 1.25), ("epoch2", 2.5), ("closed_alpha", 0.004)]);
        let totals = aggregate(pts);
        assert_eq!(totals.status(), Status::Eligible);
        assert_eq!(totals.rounded_all(), 3.75);
        assert_eq!(totals.categories().count(), 3);
    }

    #[test]
    fn real_all_category_is_overwritten() {
        let totals = aggregate(points(&[("all", 100.0), ("epoch1", 2.0)]));
        assert_eq!(totals.all(), 102.0);
        assert_eq!(totals.points().len(), 2);
    }

    #[test]
    fn non_numeric_category_is_malformed() {
        let data = json!({"epoch1": 3, "epoch2": "lots"});
        let err = numeric_points(data.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, ScanError::MalformedResponse(_)));

        let data = json!({"epoch1": 3, "epoch2": 1.5});
        let pts = numeric_points(data.as_object().unwrap()).unwrap();
        assert_eq!(pts["epoch2"], 1.5);
    }

    #[test]
    fn rounding_keeps_two_decimals() {
        assert_eq!(round2(1.005_1), 1.01);
        assert_eq!(round2(12.344), 12.34);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn rounding_uses_stored_value_not_scaled_value() {
        assert_eq!(round2(2.675), 2.67);
        assert_eq!(round2(1.005), 1.0);
        assert_eq!(round2(120.125), 120.12);
        assert_eq!(round2(0.125), 0.12);
        assert_eq!(round2(-3.14159), -3.14);
    }

    #[test]
    fn buckets_follow_status() {
        assert_eq!(Status::Eligible.bucket_file(), Some("eligibles.txt"));
        assert_eq!(Status::Sybil.bucket_file(), Some("sybils.txt"));
        assert_eq!(Status::Error.bucket_file(), None);
        assert_eq!(Status::Sybil.to_string(), "Sybil");
    }
}
