pub mod btle;
pub mod connection;
pub mod constants;
pub mod controller;
pub mod parser;
pub mod presenter;
pub mod subscriptions;
pub mod transport;
pub mod types;
