//! Leased key publication
//!
//! [`Publisher`] announces a key/value pair bound to a renewable lease, so
//! the entry disappears from the store when the publishing process dies.

mod publisher;

pub use publisher::*;
