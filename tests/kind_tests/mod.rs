//! Integration tests against a live kind cluster
//!
//! These tests tell the story of how the contest web application drives
//! challenge instances through their lifecycle on a real control plane.
//!
//! # Test Organization
//!
//! - `instance_lifecycle`: Stories about creating, querying, listing and
//!   destroying instances through the Kubernetes backend
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod helpers;
mod instance_lifecycle;
