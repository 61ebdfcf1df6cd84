pub mod catalog;
pub mod download;
pub mod extract;
pub mod manager;
pub mod paths;
