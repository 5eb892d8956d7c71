// Library for tests to access modules

pub mod config;
pub mod counters;
pub mod error;
pub mod host;
pub mod models;
pub mod nas;
pub mod probes;
pub mod retention_worker;
pub mod routes;
pub mod session;
pub mod store;
pub mod users;
