/// Data layer: file parsing, normalization, dates, and harmonization.
///
/// Architecture:
/// ```text
///  *.OUT / *.??T
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  headers, banners, rows → RawRow
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐     ┌──────────┐
///   │ missing   │ ──▶ │ temporal  │  sentinels → Absent, row → date
///   └──────────┘     └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │  SeriesTable  │  one per (file, treatment)
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ harmonize │  aliases, date intersection → JoinedSeries
///   └──────────┘
///        │
///        ▼
///     metrics
/// ```
///
/// `evaluate` reads the end-of-season `EVALUATE.OUT` summary, `experiment`
/// the treatment names of an experiment file, and `filter` holds the
/// current treatment/variable selection.

pub mod evaluate;
pub mod experiment;
pub mod filter;
pub mod harmonize;
pub mod loader;
pub mod missing;
pub mod model;
pub mod temporal;
