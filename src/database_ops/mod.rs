pub mod artifacts;
pub mod chunked;
pub mod corpus;
pub mod letterboxd;
#[cfg(test)]
pub mod memory;
pub mod models;
pub mod refresh;
pub mod sampler;
pub mod sources;
pub mod staleness;
pub mod store;
pub mod tmdb;
pub mod upsert;
