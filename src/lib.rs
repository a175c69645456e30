//! A blocking LDAPv3 client protocol engine.
//!
//! ## Summary
//!
//! The [`Ldap`](struct.Ldap.html) handle is the starting point for all operations. It
//! owns a [`Connection`](struct.Connection.html), which assigns message ids, frames
//! requests on the wire, and routes responses into per-id queues, so that a response
//! which arrives for another outstanding request is kept until it is asked for.
//!
//! Every call blocks until the matching response has arrived. Operation outcomes are
//! data: a non-zero result code is returned as an [`LdapResult`](result/struct.LdapResult.html)
//! whose `rc` and diagnostic text can be inspected, while errors are reserved for
//! transport, framing, and decoding failures. Results can be turned into errors with
//! `success()` and `non_error()`.
//!
//! The documentation is written for readers familiar with LDAP concepts and terminology,
//! which it won't attempt to explain.
//!
//! ## Compile-time features
//!
//! * __tls__ (enabled by default): TLS support, backed by the `native-tls` crate, which uses
//!   a platform-specific TLS backend. This is an alias for __tls-native__.
//!
//! Without any features, only plain TCP connections (and Unix domain sockets on Unix-like
//! platforms) are available. StartTLS can still be used by installing a custom
//! [`TlsUpgrade`](trait.TlsUpgrade.html) hook on the connection.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ldapwire::{Ldap, Scope};
//! use ldapwire::result::Result;
//!
//! fn main() -> Result<()> {
//!     let mut ldap = Ldap::new("ldap://localhost:2389")?;
//!     ldap.simple_bind("cn=admin,dc=example,dc=org", "secret")?.success()?;
//!     let (rs, _res) = ldap.search(
//!         "ou=Places,dc=example,dc=org",
//!         Scope::Subtree,
//!         "(&(objectClass=locality)(l=ma*))",
//!         vec!["l"]
//!     )?.success()?;
//!     for entry in rs {
//!         println!("{} {:?}", entry.dn, entry.attrs);
//!     }
//!     ldap.unbind()
//! }
//! ```

#[doc(hidden)]
#[macro_use]
pub extern crate log;

/// Type alias for the LDAP message ID.
pub type RequestId = i32;

pub mod asn1 {
    //! ASN.1 structure construction and parsing.
    //!
    //! Needed for implementing new extended operations or controls; the existing
    //! ones in this crate show how the pieces fit.
    pub use lber::common::TagClass;
    pub use lber::parse::{parse_tag, parse_uint};
    pub use lber::structure::{StructureTag, PL};
    pub use lber::structures::{
        ASNTag, Boolean, Enumerated, ExplicitTag, Integer, Null, OctetString, Sequence, Set, Tag,
    };
    pub use lber::universal::Types;
    pub use lber::write;
    pub use lber::IResult;
}
mod conn;
pub mod controls;
pub mod exop;
mod filter;
pub mod instrument;
mod ldap;
pub mod pdu;
mod protocol;
pub mod result;
mod search;
mod socket;

pub use conn::{Connection, LdapConnSettings};
pub use filter::parse_filter;
pub use instrument::{Event, EventBus, EventKind, Instrument};
pub use ldap::{modify_ops, Ldap, Mod, MAX_SASL_CHALLENGES};
pub use pdu::{AppTag, Payload, Pdu};
pub use protocol::{LdapCodec, RawUnit};
pub use result::{LdapError, LdapResult};
pub use search::{DerefAliases, Scope, SearchEntry, SearchOptions};
#[cfg(feature = "tls-native")]
pub use socket::NativeTlsUpgrade;
pub use socket::{ConnType, Framed, Socket, StdStream, TlsUpgrade};
