//! This mod is meant to hold most of the code for the library's client-facing API.
mod errors;
mod node;
mod options;
mod wiring;

pub use errors::KvError;
pub use node::KvNode;
pub use options::NodeOptions;
pub use wiring::try_create_node;
pub use wiring::NodeConfig;
pub use wiring::NodeCreationError;
