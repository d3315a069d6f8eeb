pub mod collection;

pub use collection::{AddOutcome, CollectionOptions, DEFAULT_INITIAL_CAPACITY, QueryCollection};
