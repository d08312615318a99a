//! HTTP binding of the JSON-RPC server
//!
//! Routes `/` and `/{method}` to the dispatch engine; the second form lets
//! clients name the method in the path.

pub mod handlers;
