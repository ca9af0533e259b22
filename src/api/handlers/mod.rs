pub mod bulk;
pub mod bundle;
pub mod crud;
pub mod search;
