pub mod catalogue;
pub mod error;
pub mod frame;
pub mod grid;
pub mod merge;
pub mod normalize;
pub mod quality;
pub mod resample;
pub mod table;

pub use catalogue::{ChannelCatalogue, ChannelSpec};
pub use error::{EngineError, Result};
pub use grid::{CanonicalGrid, Resolution};
pub use merge::{clean_rows, combine_by_precedence, left_join_onto_grid};
pub use normalize::{NumberStyle, Normalizer, TimestampLayout};
pub use quality::{daily_missing_ratio, mask_outside_window, missing_ratio, null_at_or_above, unknown_columns};
pub use resample::{power_to_energy, resample, scale_channels, AggRule, AggregationDirective, DirectiveIssue, Resampled};
pub use table::{Channel, ObservationTable, RawCell, RawTable, Sample};
