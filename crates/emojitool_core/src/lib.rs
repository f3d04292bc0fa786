pub mod config;
pub mod html;
pub mod probe;
pub mod registry;
pub mod runtime;
pub mod scraper;
pub mod store;
