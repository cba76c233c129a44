//! CSV slice cache for historical bars.
//!
//! Layout: `{cache_dir}/{asset},{start},{end},{resolution}.csv`, where `end`
//! already includes one extra resolution step past the last bar.
//!
//! Slices are write-once. Overlapping slices are never rewritten; `sync`
//! reconciles the request against every slice for the key, loads the ones
//! that overlap, fetches only the gaps and merges everything into one
//! ascending, de-duplicated series.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::provider::{DataError, HistoryProvider};
use super::reconcile::{reconcile, Reconciliation};
use crate::domain::{Bar, CacheKey, TimeRange};

/// Deterministic file name for a slice.
pub fn slice_file_name(asset: &str, start: i64, end: i64, resolution: i64) -> String {
    format!("{asset},{start},{end},{resolution}.csv")
}

/// A cache file identified by its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceFile {
    pub key: CacheKey,
    /// Bounds encoded in the file name.
    pub range: TimeRange,
    pub path: PathBuf,
}

/// On-disk row. Times are read as floats so caches written by other tools
/// (`1622400000.0`) still load.
#[derive(Debug, Deserialize)]
struct CsvRow {
    time: f64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl From<CsvRow> for Bar {
    fn from(row: CsvRow) -> Self {
        Bar {
            time: row.time as i64,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        }
    }
}

/// The price cache.
#[derive(Debug, Clone)]
pub struct SeriesStore {
    cache_dir: PathBuf,
    continuous_caching: bool,
}

impl SeriesStore {
    pub fn new(cache_dir: impl Into<PathBuf>, continuous_caching: bool) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            continuous_caching,
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Whether fetched gaps are persisted as new slices.
    pub fn continuous_caching(&self) -> bool {
        self.continuous_caching
    }

    /// Every slice in the cache, sorted by file name.
    ///
    /// Creates the cache directory if it does not exist. A `.csv` file whose
    /// name does not parse is a fatal error; other files are skipped.
    pub fn slices(&self) -> Result<Vec<SliceFile>, DataError> {
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir).map_err(|source| DataError::Io {
                path: self.cache_dir.clone(),
                source,
            })?;
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|source| DataError::Io {
            path: self.cache_dir.clone(),
            source,
        })?;

        let mut slices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DataError::Io {
                path: self.cache_dir.clone(),
                source,
            })?;
            if let Some(slice) = parse_slice_path(&entry.path())? {
                slices.push(slice);
            }
        }

        slices.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(slices)
    }

    /// Slices belonging to one asset and resolution.
    pub fn slices_for(&self, key: &CacheKey) -> Result<Vec<SliceFile>, DataError> {
        Ok(self
            .slices()?
            .into_iter()
            .filter(|s| &s.key == key)
            .collect())
    }

    /// Reconcile a request against the cache without touching the network.
    ///
    /// The end of the request is pulled back one bar: a bar at `t` covers
    /// `[t, t + resolution)`, so the last bar needed starts at `end - resolution`.
    pub fn plan(&self, key: &CacheKey, requested: TimeRange) -> Result<Reconciliation, DataError> {
        let window = bar_window(key, requested)?;
        let cached: Vec<TimeRange> = self.slices_for(key)?.iter().map(|s| s.range).collect();
        Ok(reconcile(window, &cached))
    }

    /// Load the bars for `requested`, fetching and caching only the gaps.
    ///
    /// Returns bars sorted by time, de-duplicated on time, with
    /// `requested.start <= time <= requested.end`.
    pub fn sync<P>(
        &self,
        key: &CacheKey,
        requested: TimeRange,
        provider: &mut P,
    ) -> Result<Vec<Bar>, DataError>
    where
        P: HistoryProvider + ?Sized,
    {
        let window = bar_window(key, requested)?;
        let slices = self.slices_for(key)?;
        let cached: Vec<TimeRange> = slices.iter().map(|s| s.range).collect();
        let plan = reconcile(window, &cached);

        let mut rows = Vec::new();
        for slice in slices.iter().filter(|s| plan.used.contains(&s.range)) {
            debug!(file = %slice.path.display(), "loading cached slice");
            rows.extend(self.load_slice(&slice.path)?);
        }

        let asset = key.asset_id();
        let resolution = key.resolution();
        for gap in &plan.missing {
            info!(
                "No cached data found for {asset} from {} to {} at a resolution of {resolution} seconds",
                gap.start(),
                gap.end()
            );
            let fetched = provider
                .get_product_history(asset, gap.start(), gap.end(), resolution)
                .map_err(|source| DataError::Fetch {
                    asset: asset.to_string(),
                    start: gap.start(),
                    end: gap.end(),
                    resolution,
                    source,
                })?;

            if self.continuous_caching && !fetched.is_empty() {
                let bounds = TimeRange::new(gap.start(), gap.end() + resolution);
                self.write_slice(key, bounds, &fetched)?;
            }
            rows.extend(fetched);
        }

        Ok(normalize(rows, requested))
    }

    /// Read one slice file.
    pub fn load_slice(&self, path: &Path) -> Result<Vec<Bar>, DataError> {
        let mut reader = csv::Reader::from_path(path).map_err(|source| DataError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

        reader
            .deserialize::<CsvRow>()
            .map(|row| {
                row.map(Bar::from).map_err(|source| DataError::Csv {
                    path: path.to_path_buf(),
                    source,
                })
            })
            .collect()
    }

    /// Persist bars as a new slice named by `bounds`.
    ///
    /// Writes are atomic: write to `.tmp`, then rename into place.
    pub fn write_slice(
        &self,
        key: &CacheKey,
        bounds: TimeRange,
        bars: &[Bar],
    ) -> Result<PathBuf, DataError> {
        fs::create_dir_all(&self.cache_dir).map_err(|source| DataError::Io {
            path: self.cache_dir.clone(),
            source,
        })?;

        let name = slice_file_name(key.asset_id(), bounds.start(), bounds.end(), key.resolution());
        let path = self.cache_dir.join(&name);
        let tmp_path = self.cache_dir.join(format!("{name}.tmp"));

        let csv_err = |source| DataError::Csv {
            path: tmp_path.clone(),
            source,
        };
        let mut writer = csv::Writer::from_path(&tmp_path).map_err(csv_err)?;
        for bar in bars {
            writer.serialize(bar).map_err(csv_err)?;
        }
        writer.flush().map_err(|source| DataError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        drop(writer);

        fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Io {
                path: path.clone(),
                source,
            }
        })?;

        debug!(file = %path.display(), bars = bars.len(), "wrote cache slice");
        Ok(path)
    }
}

/// `[start, end - resolution]` for a request, rejecting windows shorter than a bar.
fn bar_window(key: &CacheKey, requested: TimeRange) -> Result<TimeRange, DataError> {
    let last_bar = requested.end() - key.resolution();
    if last_bar < requested.start() {
        return Err(DataError::WindowTooShort {
            start: requested.start(),
            end: requested.end(),
            resolution: key.resolution(),
        });
    }
    Ok(TimeRange::new(requested.start(), last_bar))
}

/// Sort by time, drop duplicate times (first wins), clip to the request.
fn normalize(mut rows: Vec<Bar>, requested: TimeRange) -> Vec<Bar> {
    rows.sort_by_key(|b| b.time);
    rows.dedup_by_key(|b| b.time);
    rows.retain(|b| b.time >= requested.start() && b.time <= requested.end());
    rows
}

/// Parse `{asset},{start},{end},{resolution}.csv`. Non-CSV files yield `None`.
fn parse_slice_path(path: &Path) -> Result<Option<SliceFile>, DataError> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    let Some(stem) = name.strip_suffix(".csv") else {
        return Ok(None);
    };

    let malformed = || DataError::MalformedCacheName {
        file: path.to_path_buf(),
    };

    let fields: Vec<&str> = stem.split(',').collect();
    let &[asset, start, end, resolution] = fields.as_slice() else {
        return Err(malformed());
    };

    let number = |field: &str| -> Result<i64, DataError> {
        field
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v as i64)
            .ok_or_else(malformed)
    };

    let start = number(start)?;
    let end = number(end)?;
    let resolution = number(resolution)?;
    let key = CacheKey::new(asset, resolution).map_err(|_| malformed())?;

    Ok(Some(SliceFile {
        key,
        range: TimeRange::new(start, end),
        path: path.to_path_buf(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeError;

    /// Provider that synthesizes one bar per resolution step and counts calls.
    struct CountingProvider {
        calls: Vec<(String, i64, i64, i64)>,
        fail: bool,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                fail: false,
            }
        }
    }

    impl HistoryProvider for CountingProvider {
        fn get_product_history(
            &mut self,
            asset: &str,
            start: i64,
            end: i64,
            resolution: i64,
        ) -> Result<Vec<Bar>, ExchangeError> {
            self.calls.push((asset.to_string(), start, end, resolution));
            if self.fail {
                return Err(ExchangeError::Request("connection reset".into()));
            }
            Ok((start..=end)
                .step_by(resolution as usize)
                .map(|t| bar(t, t as f64))
                .collect())
        }
    }

    fn bar(time: i64, close: f64) -> Bar {
        Bar {
            time,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    fn key() -> CacheKey {
        CacheKey::new("BTC-USD", 60).unwrap()
    }

    #[test]
    fn file_name_is_bit_exact() {
        assert_eq!(slice_file_name("BTC-USD", 1000, 1120, 60), "BTC-USD,1000,1120,60.csv");
    }

    #[test]
    fn missing_cache_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path().join("price_caches"), true);
        assert!(store.slices().unwrap().is_empty());
        assert!(dir.path().join("price_caches").is_dir());
    }

    #[test]
    fn plan_uses_cached_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path(), true);
        store
            .write_slice(&key(), TimeRange::new(1000, 1120), &[bar(1000, 1.0), bar(1060, 2.0)])
            .unwrap();

        let plan = store.plan(&key(), TimeRange::new(1000, 1300)).unwrap();
        assert_eq!(plan.used, vec![TimeRange::new(1000, 1120)]);
        assert_eq!(plan.missing, vec![TimeRange::new(1120, 1240)]);
    }

    #[test]
    fn sync_fetches_gap_and_persists_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path(), true);
        let mut provider = CountingProvider::new();

        let bars = store
            .sync(&key(), TimeRange::new(1000, 1300), &mut provider)
            .unwrap();

        assert_eq!(provider.calls, vec![("BTC-USD".to_string(), 1000, 1240, 60)]);
        let times: Vec<i64> = bars.iter().map(|b| b.time).collect();
        assert_eq!(times, vec![1000, 1060, 1120, 1180, 1240]);
        assert!(dir.path().join("BTC-USD,1000,1300,60.csv").exists());
    }

    #[test]
    fn second_sync_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path(), true);
        let mut provider = CountingProvider::new();

        let first = store
            .sync(&key(), TimeRange::new(1000, 1300), &mut provider)
            .unwrap();
        let second = store
            .sync(&key(), TimeRange::new(1000, 1300), &mut provider)
            .unwrap();

        assert_eq!(provider.calls.len(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn caching_disabled_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path(), false);
        let mut provider = CountingProvider::new();

        store.sync(&key(), TimeRange::new(1000, 1300), &mut provider).unwrap();
        store.sync(&key(), TimeRange::new(1000, 1300), &mut provider).unwrap();

        assert_eq!(provider.calls.len(), 2);
        assert!(store.slices().unwrap().is_empty());
    }

    #[test]
    fn overlapping_slices_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path(), true);
        store
            .write_slice(&key(), TimeRange::new(1000, 1180), &[bar(1000, 1.0), bar(1060, 2.0), bar(1120, 3.0)])
            .unwrap();
        store
            .write_slice(&key(), TimeRange::new(1060, 1300), &[bar(1060, 2.0), bar(1120, 3.0), bar(1180, 4.0), bar(1240, 5.0)])
            .unwrap();
        let mut provider = CountingProvider::new();

        let bars = store
            .sync(&key(), TimeRange::new(1000, 1300), &mut provider)
            .unwrap();

        assert!(provider.calls.is_empty());
        let times: Vec<i64> = bars.iter().map(|b| b.time).collect();
        assert_eq!(times, vec![1000, 1060, 1120, 1180, 1240]);
    }

    #[test]
    fn other_resolutions_are_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path(), true);
        let hourly = CacheKey::new("BTC-USD", 3600).unwrap();
        store
            .write_slice(&hourly, TimeRange::new(0, 7200), &[bar(0, 1.0), bar(3600, 2.0)])
            .unwrap();

        let plan = store.plan(&key(), TimeRange::new(0, 7200)).unwrap();
        assert!(plan.used.is_empty());
    }

    #[test]
    fn malformed_file_name_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("BTC-USD,1000,60.csv"), "time\n").unwrap();
        let store = SeriesStore::new(dir.path(), true);

        let err = store.slices().unwrap_err();
        assert!(matches!(err, DataError::MalformedCacheName { .. }));
        assert!(err.to_string().contains("BTC-USD,1000,60.csv"));
    }

    #[test]
    fn non_csv_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let store = SeriesStore::new(dir.path(), true);
        assert!(store.slices().unwrap().is_empty());
    }

    #[test]
    fn float_encoded_names_and_times_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("ETH-USD,1000.0,1120.0,60.0.csv"),
            "time,open,high,low,close,volume\n1000.0,1,2,0.5,1.5,3\n1060.0,1.5,2,1,1.8,4\n",
        )
        .unwrap();
        let store = SeriesStore::new(dir.path(), true);

        let slices = store.slices().unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].range, TimeRange::new(1000, 1120));
        let bars = store.load_slice(&slices[0].path).unwrap();
        assert_eq!(bars[1].time, 1060);
        assert_eq!(bars[1].close, 1.8);
    }

    #[test]
    fn window_shorter_than_a_bar_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path(), true);
        let mut provider = CountingProvider::new();

        let err = store
            .sync(&key(), TimeRange::new(1000, 1030), &mut provider)
            .unwrap_err();
        assert!(matches!(err, DataError::WindowTooShort { .. }));
    }

    #[test]
    fn fetch_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path(), true);
        let mut provider = CountingProvider::new();
        provider.fail = true;

        let err = store
            .sync(&key(), TimeRange::new(1000, 1300), &mut provider)
            .unwrap_err();
        assert!(matches!(err, DataError::Fetch { .. }));
        assert!(store.slices().unwrap().is_empty());
    }
}
