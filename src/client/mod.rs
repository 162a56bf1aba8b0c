//! Client-side pieces: link supervision and the local view of presence and
//! conversations. Transport-agnostic; a concrete socket plugs in through
//! [`Connector`].

mod backoff;
mod roster;
mod supervisor;
mod thread;

pub use backoff::Backoff;
pub use roster::Roster;
pub use supervisor::{Connector, LinkState, Linked, Supervisor, TransportError};
pub use thread::{Entry, Thread};
