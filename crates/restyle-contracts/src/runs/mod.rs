pub mod receipts;
pub mod report;
pub mod summary;
pub mod usage;
