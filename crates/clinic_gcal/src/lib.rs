// --- File: crates/clinic_gcal/src/lib.rs ---
// Declare modules within this crate
pub mod auth;
pub mod booking;
pub mod doc;
pub mod error;
pub mod handlers;
pub mod logic;
#[cfg(test)]
mod logic_proptest;
pub mod oauth;
pub mod routes;
pub mod service;
#[cfg(test)]
mod service_test;
pub mod timezone;
