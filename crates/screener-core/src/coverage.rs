//! Coverage assessment of cached periods against a query window.

use std::collections::BTreeSet;

use crate::types::{PeriodKey, PeriodSet, QueryWindow};

/// How well cached periods cover a window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Coverage {
    /// Every expected period is present, or only the newest one is missing.
    Ready {
        /// The newest period, when it is missing but tolerated as not yet published.
        tolerated: Option<PeriodKey>,
    },
    /// Some periods are present; the span `from..=to` must be fetched.
    ///
    /// A missing newest period never widens the span.
    Partial {
        /// Oldest missing period.
        from: PeriodKey,
        /// Newest missing period, excluding a tolerated newest one.
        to: PeriodKey,
        /// Periods in the span that are neither cached nor known absent, newest first.
        missing: Vec<PeriodKey>,
    },
    /// Nothing usable is cached.
    Miss,
}

impl Coverage {
    /// Returns true if no fetch is needed.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Date range to request from the provider for an incremental fetch.
    #[must_use]
    pub fn fetch_range(&self) -> Option<QueryWindow> {
        match self {
            Self::Partial { from, to, missing } => QueryWindow::new(
                from.period_start(),
                to.date(),
                missing.len(),
            )
            .ok(),
            Self::Ready { .. } | Self::Miss => None,
        }
    }
}

/// Assesses cached periods against the periods a window expects.
///
/// `absent` periods are ones the provider already confirmed it has no record for;
/// they count as covered. A window with no present period is always a miss.
#[must_use]
pub fn assess(window: &QueryWindow, payload: &PeriodSet, absent: &BTreeSet<PeriodKey>) -> Coverage {
    let expected = window.expected_periods();
    let present = expected.iter().filter(|key| payload.contains(key)).count();
    if present == 0 {
        return Coverage::Miss;
    }

    // newest first
    let missing: Vec<PeriodKey> = expected
        .iter()
        .filter(|key| !payload.contains(key) && !absent.contains(key))
        .copied()
        .collect();

    // the newest period may simply not be published yet
    let tolerated = expected
        .first()
        .copied()
        .filter(|newest| missing.first() == Some(newest));
    let gaps = &missing[usize::from(tolerated.is_some())..];

    match (gaps.first(), gaps.last()) {
        (Some(&to), Some(&from)) => Coverage::Partial {
            from,
            to,
            missing: gaps.to_vec(),
        },
        _ => Coverage::Ready { tolerated },
    }
}

/// Merges freshly fetched periods into cached ones.
///
/// Fresh records win on collision; interim periods are dropped.
#[must_use]
pub fn merge(mut cached: PeriodSet, fresh: PeriodSet) -> PeriodSet {
    cached.merge_newer(fresh);
    cached.retain_full_periods();
    cached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeriodRecord;

    fn key(year: i32) -> PeriodKey {
        PeriodKey::annual(year).unwrap()
    }

    fn cached(years: &[i32]) -> PeriodSet {
        years.iter().map(|y| PeriodRecord::new(key(*y))).collect()
    }

    #[test]
    fn test_full_cover_is_ready() {
        let window = QueryWindow::years(2020, 2022).unwrap();
        let coverage = assess(&window, &cached(&[2019, 2020, 2021, 2022]), &BTreeSet::new());
        assert_eq!(coverage, Coverage::Ready { tolerated: None });
    }

    #[test]
    fn test_only_newest_missing_is_tolerated() {
        let window = QueryWindow::years(2018, 2022).unwrap();
        let coverage = assess(&window, &cached(&[2018, 2019, 2020, 2021]), &BTreeSet::new());
        assert_eq!(
            coverage,
            Coverage::Ready {
                tolerated: Some(key(2022))
            }
        );
    }

    #[test]
    fn test_oldest_missing_fetches_span() {
        let window = QueryWindow::years(2018, 2022).unwrap();
        let coverage = assess(&window, &cached(&[2020, 2021, 2022]), &BTreeSet::new());
        assert_eq!(
            coverage,
            Coverage::Partial {
                from: key(2018),
                to: key(2019),
                missing: vec![key(2019), key(2018)],
            }
        );
        let range = coverage.fetch_range().unwrap();
        assert_eq!(range.start, key(2018).period_start());
        assert_eq!(range.end, key(2019).date());
    }

    #[test]
    fn test_unpublished_newest_does_not_widen_span() {
        let window = QueryWindow::years(2018, 2022).unwrap();
        let coverage = assess(&window, &cached(&[2020, 2021]), &BTreeSet::new());
        assert_eq!(
            coverage,
            Coverage::Partial {
                from: key(2018),
                to: key(2019),
                missing: vec![key(2019), key(2018)],
            }
        );
        let range = coverage.fetch_range().unwrap();
        assert_eq!(range.start, key(2018).period_start());
        assert_eq!(range.end, key(2019).date());
    }

    #[test]
    fn test_span_lists_only_absent_periods() {
        let window = QueryWindow::years(2017, 2022).unwrap();
        let coverage = assess(&window, &cached(&[2018, 2020, 2021, 2022]), &BTreeSet::new());
        assert_eq!(
            coverage,
            Coverage::Partial {
                from: key(2017),
                to: key(2019),
                missing: vec![key(2019), key(2017)],
            }
        );
    }

    #[test]
    fn test_single_non_newest_gap_is_partial() {
        let window = QueryWindow::years(2018, 2022).unwrap();
        let coverage = assess(&window, &cached(&[2018, 2019, 2021, 2022]), &BTreeSet::new());
        assert!(matches!(
            coverage,
            Coverage::Partial { from, to, .. } if from == key(2020) && to == key(2020)
        ));
    }

    #[test]
    fn test_known_absent_counts_as_covered() {
        let window = QueryWindow::years(2018, 2022).unwrap();
        let absent = BTreeSet::from([key(2018), key(2019)]);
        let coverage = assess(&window, &cached(&[2020, 2021, 2022]), &absent);
        assert!(coverage.is_ready());
    }

    #[test]
    fn test_nothing_present_is_miss() {
        let window = QueryWindow::years(2021, 2022).unwrap();
        let absent = BTreeSet::from([key(2021)]);
        assert_eq!(assess(&window, &PeriodSet::new(), &absent), Coverage::Miss);
        assert_eq!(
            assess(&window, &cached(&[2015]), &BTreeSet::new()),
            Coverage::Miss
        );
    }

    #[test]
    fn test_merge_fresh_wins() {
        let old = vec![PeriodRecord::new(key(2021)).with_field("v", 1.0)];
        let new = vec![
            PeriodRecord::new(key(2021)).with_field("v", 2.0),
            PeriodRecord::new(key(2020)),
        ];
        let merged = merge(old.into(), new.into());
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged.get(&key(2021)).unwrap().get("v").and_then(|v| v.as_f64()),
            Some(2.0)
        );
    }
}
