pub mod audit;
pub mod bulk;
pub mod bundle;
pub mod delete;
pub mod meta;
pub mod patch;
pub mod put;
pub mod search;
pub mod summary;
pub mod validation;
