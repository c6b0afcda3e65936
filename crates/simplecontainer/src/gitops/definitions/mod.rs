//! Definitions held in a tracked repository.

pub mod order;
pub mod reader;
pub mod request;

pub use order::{dependencies_of, depends_on, insert_ordered, order, KNOWN_KINDS};
pub use reader::{definitions_dir, read_definitions, ReadOutcome};
pub use request::{Definition, Request};
