pub mod account;
pub mod admission;
pub mod errors;
pub mod order;
pub mod ports;
pub mod position;
pub mod repositories;
pub mod trade;
pub mod types;
