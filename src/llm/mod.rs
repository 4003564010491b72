//! Model invocation: backend-neutral conversation types, the Gemini REST
//! client, and the fallback manager that rotates across backends.

pub mod backend;
pub mod fallback;
pub mod gemini;

pub use backend::{ModelBackend, ModelDescriptor, Reply, Turn};
pub use fallback::{Conversation, FallbackManager, ModelError};
