//! Price data: cache reconciliation, CSV slice store and timeline merge.

pub mod provider;
pub mod reconcile;
pub mod store;
pub mod timeline;

pub use provider::{DataError, HistoryProvider};
pub use reconcile::{reconcile, Reconciliation};
pub use store::{slice_file_name, SeriesStore, SliceFile};
pub use timeline::{merge, SeriesSet, Timeline};
