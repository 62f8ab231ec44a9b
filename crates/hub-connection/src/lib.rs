//! Hub protocol layer for hublink.
//!
//! [`HubConnection`] adds the JSON hub handshake, method dispatch and
//! awaited invocations on top of [`hublink_connection::Connection`].

pub mod callback_manager;
pub mod error;
pub mod hub_connection;

pub use callback_manager::{CallbackManager, CompletionCallback};
pub use error::HubError;
pub use hub_connection::{HubConnection, MethodHandler};
