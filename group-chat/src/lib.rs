//! Line-oriented group chat relay over TCP.
//!
//! A client connects, sends its display name as the first line, and from then
//! on every line it sends is relayed as `<name>: <line>` to all the other
//! connected clients. Nobody hears their own messages, and there is no leave
//! notice when a client goes away.
//!
//! - [`registry`] is the shared set of connected clients. Registration,
//!   removal, and broadcast all serialise on one lock.
//! - [`session`] drives one connection through naming, greeting, relaying and
//!   teardown.
//! - [`server`] runs the accept loop and spawns a task per connection.
//! - [`protocol`] holds the fixed texts and line framing.
//! - [`cli`] and [`client`] are the process boundary for the server and
//!   terminal client binaries.

pub mod cli;
pub mod client;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
