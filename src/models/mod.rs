pub mod outcome;
pub mod staged;

pub use outcome::{ObjectOutcome, TransferOutcome};
pub use staged::{export_file_name, staged_file_name, SourceEntry, StagedObject};
