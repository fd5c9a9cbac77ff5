pub mod config;
pub mod dependency;
pub mod error;
pub mod expression;
pub mod logging;
pub mod master;
pub mod model;
pub mod plugin;
pub mod rpc;
pub mod service;
pub mod worker;
