//! Server name handling for the honeycomb proxy.
//!
//! A [`ServerName`] is the normalized form of the name a client asked for,
//! either via TLS SNI or via the HTTP `Host` header. Both the Unicode and the
//! Punycode (ASCII) form are kept: routing compares Unicode forms, while
//! X.509 hostname verification uses the Punycode form unchanged.

mod matcher;
mod server_name;

pub use matcher::{Matcher, PatternError};
pub use server_name::{InvalidName, ServerName};
