pub mod audit;
pub mod catalog;
pub mod config;
pub mod context;
pub mod download;
pub mod fanout;
pub mod model;
pub mod paths;
pub mod persist;
pub mod queue;
pub mod reconcile;
pub mod search;
pub mod store;
#[cfg(test)]
pub mod testutil;
pub mod util;
pub mod validator;
