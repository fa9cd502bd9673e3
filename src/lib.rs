#![forbid(unsafe_code)]

//! Library half of the tikgrab service: everything the `backend` binary wires
//! together lives here so it can be exercised from tests.

pub mod api;
pub mod config;
pub mod download;
pub mod extractor;
pub mod identifier;
pub mod logging;
pub mod monitoring;
pub mod retrieval;
pub mod sanitize;
pub mod store;
