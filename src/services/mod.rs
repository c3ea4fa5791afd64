pub mod corpus;
pub mod records;

pub use corpus::{HashedCorpus, hash_corpus, sample_entries, scan_directory};
pub use records::{RunSummary, read_entries, write_entries, write_records};
