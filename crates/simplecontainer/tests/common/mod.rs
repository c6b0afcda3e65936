//! Shared utilities for simplecontainer integration tests.
//!
//! - `GitFixture`: a bare origin repository driven through the real `git` CLI
//! - `RecordingControlPlane`: an in-memory control plane that records calls
//! - `TestEngine`: a controller wired to both, with event helpers

pub mod control_plane;
pub mod harness;

pub use control_plane::RecordingControlPlane;
pub use harness::{GitFixture, TestEngine};
