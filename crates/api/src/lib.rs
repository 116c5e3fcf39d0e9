//! HTTP API: routing, request/response mapping and the live event stream.

pub mod app;
