//! Timeline merge: many per-asset series into one replay stream.
//!
//! Ticks are ordered by time. Ties keep input order: assets in the order they
//! were inserted into the `SeriesSet`, bars in series order. Replays are
//! therefore deterministic for a given registration order.

use tracing::warn;

use super::provider::DataError;
use crate::domain::{Bar, PriceField, Tick};

/// Per-asset bar series, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SeriesSet {
    entries: Vec<(String, Vec<Bar>)>,
}

impl SeriesSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bars for an asset. Bars for an asset already present are merged
    /// into its series (sorted, duplicate times dropped).
    pub fn insert(&mut self, asset: &str, bars: Vec<Bar>) {
        match self.entries.iter_mut().find(|(a, _)| a == asset) {
            Some((_, existing)) => {
                existing.extend(bars);
                existing.sort_by_key(|b| b.time);
                existing.dedup_by_key(|b| b.time);
            }
            None => self.entries.push((asset.to_string(), bars)),
        }
    }

    pub fn get(&self, asset: &str) -> Option<&[Bar]> {
        self.entries
            .iter()
            .find(|(a, _)| a == asset)
            .map(|(_, bars)| bars.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Bar])> {
        self.entries.iter().map(|(a, b)| (a.as_str(), b.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if at least one asset has a bar.
    pub fn has_data(&self) -> bool {
        self.entries.iter().any(|(_, bars)| !bars.is_empty())
    }
}

/// Globally time-ordered tick stream. Finite and re-iterable.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    ticks: Vec<Tick>,
}

impl Timeline {
    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tick> {
        self.ticks.iter()
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn first_time(&self) -> Option<i64> {
        self.ticks.first().map(|t| t.time)
    }

    pub fn last_time(&self) -> Option<i64> {
        self.ticks.last().map(|t| t.time)
    }

    /// First tick of every asset, in order of first appearance.
    pub fn first_ticks(&self) -> Vec<&Tick> {
        let mut seen: Vec<&str> = Vec::new();
        let mut firsts = Vec::new();
        for tick in &self.ticks {
            if !seen.contains(&tick.asset.as_str()) {
                seen.push(tick.asset.as_str());
                firsts.push(tick);
            }
        }
        firsts
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Tick;
    type IntoIter = std::slice::Iter<'a, Tick>;

    fn into_iter(self) -> Self::IntoIter {
        self.ticks.iter()
    }
}

/// Flatten every series into one stable, time-sorted stream.
///
/// Assets without bars are skipped with a warning as long as some other asset
/// has data; if none do, the merge fails with `DataError::Unavailable`.
pub fn merge(series: &SeriesSet, field: PriceField) -> Result<Timeline, DataError> {
    if !series.has_data() {
        return Err(DataError::Unavailable);
    }

    let mut ticks = Vec::new();
    for (asset, bars) in series.iter() {
        if bars.is_empty() {
            warn!("Data for symbol {asset} is empty; it will be absent from the backtest");
            continue;
        }
        ticks.extend(bars.iter().map(|bar| Tick::from_bar(asset, bar, field)));
    }

    // sort_by_key is stable
    ticks.sort_by_key(|t| t.time);
    Ok(Timeline { ticks })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(time: i64, close: f64) -> Bar {
        Bar {
            time,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn merge_orders_by_time() {
        let mut set = SeriesSet::new();
        set.insert("BTC-USD", vec![bar(0, 1.0), bar(120, 2.0)]);
        set.insert("ETH-USD", vec![bar(60, 10.0), bar(180, 20.0)]);

        let timeline = merge(&set, PriceField::Close).unwrap();
        let order: Vec<(i64, &str)> = timeline.iter().map(|t| (t.time, t.asset.as_str())).collect();
        assert_eq!(
            order,
            vec![(0, "BTC-USD"), (60, "ETH-USD"), (120, "BTC-USD"), (180, "ETH-USD")]
        );
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut set = SeriesSet::new();
        set.insert("ZZZ", vec![bar(0, 1.0)]);
        set.insert("AAA", vec![bar(0, 2.0)]);

        let timeline = merge(&set, PriceField::Close).unwrap();
        assert_eq!(timeline.ticks()[0].asset, "ZZZ");
        assert_eq!(timeline.ticks()[1].asset, "AAA");
    }

    #[test]
    fn use_price_selects_tick_price() {
        let mut set = SeriesSet::new();
        set.insert("BTC-USD", vec![bar(0, 100.0)]);

        let timeline = merge(&set, PriceField::Open).unwrap();
        assert_eq!(timeline.ticks()[0].price, 99.5);
        assert_eq!(timeline.ticks()[0].close, 100.0);
    }

    #[test]
    fn one_empty_asset_is_skipped() {
        let mut set = SeriesSet::new();
        set.insert("BTC-USD", vec![bar(0, 1.0)]);
        set.insert("DOGE-USD", vec![]);

        let timeline = merge(&set, PriceField::Close).unwrap();
        assert_eq!(timeline.len(), 1);
        assert!(timeline.iter().all(|t| t.asset == "BTC-USD"));
    }

    #[test]
    fn all_empty_is_unavailable() {
        let mut set = SeriesSet::new();
        set.insert("BTC-USD", vec![]);
        set.insert("ETH-USD", vec![]);

        assert!(matches!(merge(&set, PriceField::Close), Err(DataError::Unavailable)));
        assert!(matches!(merge(&SeriesSet::new(), PriceField::Close), Err(DataError::Unavailable)));
    }

    #[test]
    fn repeated_insert_merges_series() {
        let mut set = SeriesSet::new();
        set.insert("BTC-USD", vec![bar(120, 3.0), bar(0, 1.0)]);
        set.insert("BTC-USD", vec![bar(60, 2.0), bar(120, 9.0)]);

        let times: Vec<i64> = set.get("BTC-USD").unwrap().iter().map(|b| b.time).collect();
        assert_eq!(times, vec![0, 60, 120]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn first_ticks_per_asset() {
        let mut set = SeriesSet::new();
        set.insert("BTC-USD", vec![bar(60, 1.0), bar(120, 2.0)]);
        set.insert("ETH-USD", vec![bar(0, 10.0)]);

        let timeline = merge(&set, PriceField::Close).unwrap();
        let firsts: Vec<(&str, i64)> = timeline
            .first_ticks()
            .iter()
            .map(|t| (t.asset.as_str(), t.time))
            .collect();
        assert_eq!(firsts, vec![("ETH-USD", 0), ("BTC-USD", 60)]);
        assert_eq!(timeline.first_time(), Some(0));
        assert_eq!(timeline.last_time(), Some(120));
    }
}
