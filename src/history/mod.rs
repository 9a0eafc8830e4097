//! Read-only views over everything recorded so far: the merged history
//! feed, per-record detail with deletion, and the control pause chart.

pub mod charts;
pub mod detail;
pub mod feed;

pub use charts::{ChartPoint, ChartsFeed, CpChart};
pub use detail::{DetailEvent, DetailState, HistoryDetail, HistoryError, RecordKind};
pub use feed::{merge_history, HistoryFeed, HistoryItem, LoopSummary};
