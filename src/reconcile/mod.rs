pub mod audit;
pub mod backfill;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod external_id;
pub mod file_index;
pub mod model;
pub mod orchestrator;
pub mod paths;
pub mod resolver;
pub mod service;
pub mod session;
pub mod store;
pub mod util;

#[cfg(test)]
pub mod testing;
