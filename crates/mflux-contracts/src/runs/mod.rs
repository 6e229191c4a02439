pub mod documents;
pub mod records;
pub mod summary;
