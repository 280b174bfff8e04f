pub mod alerts;
pub mod collector;
pub mod config;
pub mod db;
pub mod entity;
pub mod forecast;
pub mod metrics;
pub mod notify;
pub mod observation;
pub mod scheduler;
pub mod statistics;

pub mod error;
