pub mod ask;
pub mod repos;
pub mod search;
