use crate::{identity::IdentityKey, tool::Tool};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_CURRENCY: &str = "USD";

/// Well-known metadata key carrying the provider login for a record.
pub const LOGIN_METADATA_KEY: &str = "login";

/// Inclusive calendar-day range a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        start <= self.end && self.start <= end
    }
}

/// Free-form provider attributes attached to a record. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Non-empty trimmed value for `key`.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|value| !value.is_empty())
    }
}

impl From<BTreeMap<String, String>> for Metadata {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// One day of activity for one identity in one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub identity: IdentityKey,
    pub tool: Tool,
    pub date: NaiveDate,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_tokens: Option<u64>,
    pub lines_suggested: Option<u64>,
    pub lines_accepted: Option<u64>,
    pub acceptance_rate: Option<f64>,
    pub metadata: Metadata,
}

impl UsageRecord {
    #[allow(dead_code)]
    pub fn new(identity: IdentityKey, tool: Tool, date: NaiveDate) -> Self {
        Self {
            identity,
            tool,
            date,
            input_tokens: None,
            output_tokens: None,
            cache_tokens: None,
            lines_suggested: None,
            lines_accepted: None,
            acceptance_rate: None,
            metadata: Metadata::default(),
        }
    }

    /// Provider login recorded alongside the identity, if any.
    pub fn login(&self) -> Option<&str> {
        self.metadata.get_non_empty(LOGIN_METADATA_KEY)
    }
}

/// Spend reported by a tool for one identity over a billing period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendingRecord {
    pub identity: IdentityKey,
    pub tool: Tool,
    pub period: String,
    pub amount: Option<f64>,
    pub currency: String,
    pub metadata: Metadata,
}

impl SpendingRecord {
    pub fn new(
        identity: IdentityKey,
        tool: Tool,
        period: impl Into<String>,
        amount: Option<f64>,
        currency: Option<String>,
    ) -> Self {
        let currency = currency
            .map(|value| value.trim().to_ascii_uppercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        Self {
            identity,
            tool,
            period: period.into(),
            amount,
            currency,
            metadata: Metadata::default(),
        }
    }
}

/// Addition used by [`NullableSum`]. Integer counters clamp at their maximum
/// instead of overflowing.
pub trait SumValue: Copy + Default {
    fn plus(self, other: Self) -> Self;
}

impl SumValue for u64 {
    fn plus(self, other: Self) -> Self {
        self.saturating_add(other)
    }
}

impl SumValue for f64 {
    fn plus(self, other: Self) -> Self {
        self + other
    }
}

/// Sum that stays absent until at least one value has been seen.
///
/// Missing contributions count as zero once any contributor reported a value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NullableSum<T> {
    sum: T,
    seen: bool,
}

impl<T: SumValue> NullableSum<T> {
    pub fn new() -> Self {
        Self {
            sum: T::default(),
            seen: false,
        }
    }

    pub fn add(&mut self, value: Option<T>) {
        if let Some(value) = value {
            self.sum = self.sum.plus(value);
            self.seen = true;
        }
    }

    pub fn merge(&mut self, other: Self) {
        if other.seen {
            self.add(Some(other.sum));
        }
    }

    pub fn value(&self) -> Option<T> {
        self.seen.then_some(self.sum)
    }
}

impl<T: SumValue> FromIterator<Option<T>> for NullableSum<T> {
    fn from_iter<I: IntoIterator<Item = Option<T>>>(iter: I) -> Self {
        let mut acc = Self::new();
        for value in iter {
            acc.add(value);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, d).unwrap()
    }

    #[test]
    fn nullable_sum_is_absent_when_every_value_is_missing() {
        let acc: NullableSum<u64> = [None, None].into_iter().collect();
        assert_eq!(acc.value(), None);
    }

    #[test]
    fn nullable_sum_treats_missing_as_zero_once_seen() {
        let acc: NullableSum<u64> = [None, Some(4), None, Some(0)].into_iter().collect();
        assert_eq!(acc.value(), Some(4));
    }

    #[test]
    fn nullable_sum_keeps_literal_zero() {
        let acc: NullableSum<u64> = [Some(0)].into_iter().collect();
        assert_eq!(acc.value(), Some(0));
    }

    #[test]
    fn nullable_sum_merge_ignores_unseen_side() {
        let mut left: NullableSum<f64> = [Some(1.5)].into_iter().collect();
        left.merge(NullableSum::new());
        assert_eq!(left.value(), Some(1.5));

        let mut empty: NullableSum<f64> = NullableSum::new();
        empty.merge(left);
        assert_eq!(empty.value(), Some(1.5));
    }

    #[test]
    fn nullable_sum_clamps_at_counter_limit() {
        let mut acc: NullableSum<u64> = [Some(u64::MAX - 2), Some(5)].into_iter().collect();
        assert_eq!(acc.value(), Some(u64::MAX));

        acc.merge([Some(u64::MAX)].into_iter().collect());
        assert_eq!(acc.value(), Some(u64::MAX));
    }

    #[test]
    fn date_range_orders_bounds_and_is_inclusive() {
        let range = DateRange::new(day(10), day(1));
        assert_eq!(range.start, day(1));
        assert!(range.contains(day(1)));
        assert!(range.contains(day(10)));
        assert!(!range.contains(day(11)));
        assert!(range.overlaps(day(10), day(20)));
        assert!(!range.overlaps(day(11), day(20)));
    }

    #[test]
    fn spending_currency_defaults_to_usd() {
        let key = IdentityKey::new("a@b.com");
        let record = SpendingRecord::new(key.clone(), Tool::Cursor, "2026-09", Some(2.0), None);
        assert_eq!(record.currency, "USD");

        let record = SpendingRecord::new(key, Tool::Cursor, "2026-09", None, Some(" eur ".into()));
        assert_eq!(record.currency, "EUR");
    }

    #[test]
    fn login_reads_trimmed_metadata() {
        let mut record = UsageRecord::new(IdentityKey::new("octo"), Tool::Copilot, day(3));
        assert_eq!(record.login(), None);
        record.metadata = [(LOGIN_METADATA_KEY, " octo-cat ")].into_iter().collect();
        assert_eq!(record.login(), Some("octo-cat"));
    }
}
