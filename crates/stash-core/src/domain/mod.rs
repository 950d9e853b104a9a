//! Domain model (collections, entries, retention, sweep results, errors).

pub mod collection;
pub mod entry;
pub mod errors;
pub mod report;
pub mod retention;

pub use self::collection::{Collection, UnknownCollection};
pub use self::entry::{
    BlobMetadata, Fetched, ListedEntry, Listing, ObjectHead, Page, StoredObject, UnreadableEntry,
};
pub use self::errors::{ConfigError, RetrievalError, StoreError};
pub use self::report::{CollectionSweep, SweepError, SweepReport, SweepStatus};
pub use self::retention::{Verdict, evaluate, is_eligible_for_deletion};
