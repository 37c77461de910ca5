//! Relay front end.
//!
//! Holds one client connection and relays each request to the back end:
//!
//! ```text
//! Relay:    \nEnter 3 numbers min,max,cols separated by commas:
//! Client:   1,100,5
//! Relay:    <back-end reply, verbatim>
//! Relay:    \nEnter 3 numbers min,max,cols separated by commas:
//! ```
//!
//! The relay never validates; the back end owns that. When the back end
//! times out or is unreachable, the client receives only the next prompt.

pub mod liveness;
mod session;
pub mod upstream;

pub use session::RelaySession;
