/// YAML serialization for requirement records.
pub mod record;
pub mod release_store;

pub use record::{RecordError, RecordFile};
pub use release_store::{ReleaseError, ReleaseStore};
