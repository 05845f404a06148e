//! Post service core keeping a Postgres source of truth, a Redis read cache and an
//! Elasticsearch index consistent.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub(crate) mod util;
