// Library for tests to access modules

pub mod config;
pub mod error;
pub mod models;
pub mod traffic_repo;
pub mod worker;
