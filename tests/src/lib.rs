//! # EventStore Bus Test Suite
//!
//! Cross-crate flows run against the in-memory store.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── fixtures.rs    # Sample events and bus builders
//!     ├── flows.rs       # Publish, round-trip, ack and nack
//!     └── lifecycle.rs   # Startup gate, reconnect, shutdown
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p es-tests
//! cargo test -p es-tests integration::lifecycle::
//! ```

#![allow(dead_code)]

pub mod integration;
