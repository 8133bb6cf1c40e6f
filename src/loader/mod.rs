//! The bulk CSV loader: row mapping, fixed-size atomic batches, and the
//! report that summarizes a completed load.

pub mod batch;
pub mod mapper;
pub mod report;

pub use batch::{BatchLoader, ConfigError, DelimitedConfig, Destination, DestinationError};
pub use mapper::{coerce, map_row, FieldValue, MappedRecord, RowError};
pub use report::{BatchFailure, LoadReport, RowRejection};
