pub mod config;
pub mod harvest;
pub mod images;
pub mod models;
pub mod parsers;
pub mod scrapers;
pub mod store;
