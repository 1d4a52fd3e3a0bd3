pub mod config;
pub mod date;
pub mod enrich;
pub mod extract;
pub mod fallback;
pub mod fetch;
pub mod model;
pub mod pipeline;
pub mod schedule;
