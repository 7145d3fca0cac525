//! Accuracy scoring: produced rebates against the truth files.
//!
//! Rebates are bucketed by invoice id. Two rebates match when their
//! invoice, supplier and member agree, their dates agree once normalized,
//! and both amounts are within [`TOLERANCE`]. Purchase ids and distributor
//! names are ignored.

use std::collections::BTreeMap;

use crate::dsl::coerce::{format_date, parse_date};
use crate::stats::Discrepancy;
use crate::store::Rebate;

/// Largest amount difference still considered equal.
pub const TOLERANCE: f64 = 0.02;

const DATE_FORMATS: [&str; 2] = ["MM/DD/YY", "M/D/YYYY"];
const DATE_NORMAL: &str = "MM/DD/YY";

fn normal_date(value: &str) -> String {
    parse_date(value, &DATE_FORMATS)
        .map(|d| format_date(d, DATE_NORMAL))
        .unwrap_or_else(|| value.to_string())
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= TOLERANCE + 1e-9
}

/// Whether two rebates describe the same purchase.
pub fn rebates_equal(a: &Rebate, b: &Rebate) -> bool {
    a.invoice_id == b.invoice_id
        && a.supplier_id == b.supplier_id
        && a.member_id == b.member_id
        && close(a.purchase_amount, b.purchase_amount)
        && close(a.rebate_amount, b.rebate_amount)
        && normal_date(&a.transaction_date) == normal_date(&b.transaction_date)
        && normal_date(&a.invoice_date) == normal_date(&b.invoice_date)
}

// =============================================================================
// RebateSet
// =============================================================================

/// A multiset of rebates with tolerant lookup.
#[derive(Debug, Clone, Default)]
pub struct RebateSet {
    buckets: BTreeMap<String, Vec<Rebate>>,
}

impl RebateSet {
    pub fn new<I: IntoIterator<Item = Rebate>>(rebates: I) -> Self {
        let mut set = Self::default();
        for rebate in rebates {
            set.give(rebate);
        }
        set
    }

    pub fn give(&mut self, rebate: Rebate) {
        self.buckets.entry(rebate.invoice_id.clone()).or_default().push(rebate);
    }

    pub fn find(&self, rebate: &Rebate) -> Option<&Rebate> {
        self.buckets
            .get(&rebate.invoice_id)?
            .iter()
            .find(|candidate| rebates_equal(candidate, rebate))
    }

    /// Remove one rebate equal to `rebate`.
    pub fn take(&mut self, rebate: &Rebate) -> Option<Rebate> {
        let bucket = self.buckets.get_mut(&rebate.invoice_id)?;
        let position = bucket.iter().position(|candidate| rebates_equal(candidate, rebate))?;
        let taken = bucket.remove(position);
        if bucket.is_empty() {
            self.buckets.remove(&rebate.invoice_id);
        }
        Some(taken)
    }

    pub fn values(&self) -> impl Iterator<Item = &Rebate> {
        self.buckets.values().flatten()
    }

    pub fn into_values(self) -> Vec<Rebate> {
        self.buckets.into_values().flatten().collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

// =============================================================================
// Comparison
// =============================================================================

/// Match `actual` against `expected`, consuming matches from both sides.
pub fn compare(name: &str, actual: Vec<Rebate>, expected: Vec<Rebate>) -> Discrepancy {
    let produced = actual.len();
    let mut expected = RebateSet::new(expected);
    let mut unexpected = Vec::new();

    for rebate in actual {
        if expected.take(&rebate).is_none() {
            unexpected.push(rebate);
        }
    }

    Discrepancy {
        name: name.to_string(),
        matched: produced - unexpected.len(),
        take: expected.into_values(),
        drop: unexpected,
    }
}

fn by_supplier(rebates: Vec<Rebate>) -> Vec<(String, Vec<Rebate>)> {
    let mut groups: Vec<(String, Vec<Rebate>)> = Vec::new();
    for rebate in rebates {
        match groups.iter_mut().find(|(supplier, _)| *supplier == rebate.supplier_id) {
            Some((_, group)) => group.push(rebate),
            None => groups.push((rebate.supplier_id.clone(), vec![rebate])),
        }
    }
    groups
}

/// One [`Discrepancy`] per supplier present in `actual`.
///
/// With `include_missing`, suppliers only found in `expected` are reported
/// too, with nothing matched.
pub fn discrepancies(actual: Vec<Rebate>, expected: Vec<Rebate>, include_missing: bool) -> Vec<Discrepancy> {
    let mut expected = by_supplier(expected);
    let mut report = Vec::new();

    for (supplier, produced) in by_supplier(actual) {
        let truth = expected
            .iter()
            .position(|(s, _)| *s == supplier)
            .map(|i| expected.remove(i).1)
            .unwrap_or_default();
        report.push(compare(&supplier, produced, truth));
    }

    if include_missing {
        for (supplier, truth) in expected {
            report.push(Discrepancy { name: supplier, matched: 0, take: truth, drop: vec![] });
        }
    }

    report
}
