pub mod review_journal;

pub use review_journal::JsonReviewJournal;
