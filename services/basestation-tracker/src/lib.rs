//! BaseStation ADS-B tracker
//!
//! Reads the SBS-1 text feed, keeps a live table of aircraft, persists them
//! through a batched writer and resolves flight details from external APIs.

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod hub;
pub mod message;
pub mod store;
pub mod tracking;
pub mod writer;
