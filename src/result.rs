//! Operation result structures and the library error type.
//!
//! Protocol-level outcomes are data: every operation which gets a response
//! returns an [`LdapResult`](struct.LdapResult.html), whatever its result code.
//! Only transport and decoding failures, and a few local preconditions, are
//! reported through [`LdapError`](enum.LdapError.html). The helper methods
//! [`success()`](struct.LdapResult.html#method.success) and
//! [`non_error()`](struct.LdapResult.html#method.non_error) turn an unwanted
//! result code into an error when that is more convenient for the caller.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::controls::Control;
use crate::exop::Exop;
use crate::pdu::AppTag;
use crate::search::SearchEntry;
use crate::RequestId;

use thiserror::Error;

/// Type alias for the standard `Result` with the fixed `LdapError` error part.
pub type Result<T> = std::result::Result<T, LdapError>;

/// Error variants recognized by the library.
#[derive(Debug, Error)]
pub enum LdapError {
    /// The server could not be reached: unresolvable name, unreachable host
    /// or network, or no usable local address.
    #[error("connection error: {source}")]
    Connect { source: io::Error },

    /// The server actively refused the connection.
    #[error("connection refused: {source}")]
    ConnectionRefused { source: io::Error },

    /// I/O error, passed through unchanged. Establishment failures which are
    /// neither refusals nor reachability problems also end up here.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Error raised by a caller-supplied socket or TLS hook, passed through unchanged.
    #[error("{source}")]
    Other {
        source: Box<dyn StdError + Send + Sync>,
    },

    /// Malformed or truncated protocol data.
    #[error("decoding error: {0}")]
    Decode(String),

    /// A response of a kind the running operation can't accept.
    #[error("unexpected response for message {id}: expected {expected:?}, got {got:?}")]
    UnexpectedResponse {
        id: RequestId,
        expected: &'static [AppTag],
        got: AppTag,
    },

    /// Operation attempted after the connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// All message ids for this connection have been used.
    #[error("message id space exhausted")]
    MessageIdExhausted,

    /// StartTLS succeeded on the server, but there is no way to wrap the socket.
    #[error("no TLS upgrade available for this connection")]
    NoTlsUpgrade,

    /// TLS is already active on the connection.
    #[error("TLS already active")]
    TlsActive,

    /// An extended request must name its operation.
    #[error("extended request without a name")]
    ExopNoName,

    /// No path given for a `ldapi://` URL.
    #[error("empty Unix domain socket path")]
    EmptyUnixPath,

    /// A `ldapi://` URL contains a port spec, which it shouldn't.
    #[error("the port must be empty in the ldapi scheme")]
    PortInUnixPath,

    /// The stream handed to the library doesn't fit the requested use.
    #[error("the stream type does not match the URL or operation")]
    MismatchedStreamType,

    /// URL parsing error.
    #[error("url parse error: {source}")]
    UrlParsing {
        #[from]
        source: url::ParseError,
    },

    /// Unknown LDAP URL scheme.
    #[error("unknown LDAP URL scheme: {0}")]
    UnknownScheme(String),

    #[cfg(feature = "tls-native")]
    /// Native TLS library error.
    #[error("native TLS error: {source}")]
    NativeTLS {
        #[from]
        source: native_tls::Error,
    },

    /// Error parsing the string representation of a search filter.
    #[error("filter parse error")]
    FilterParsing,

    /// No values provided for an attribute in Add, or for a Modify add.
    #[error("empty value set for Add")]
    AddNoValues,

    /// The server kept asking for more SASL rounds than the library allows.
    #[error("too many SASL challenges")]
    SaslChallengeOverflow,

    /// Error converting a protocol string to UTF-8.
    #[error("utf8 decoding error")]
    DecodingUTF8,

    /// LDAP operation result with an error return code.
    #[error("LDAP operation result: {result}")]
    LdapResult {
        #[from]
        result: LdapResult,
    },
}

impl LdapError {
    pub(crate) fn decode(what: impl Into<String>) -> LdapError {
        LdapError::Decode(what.into())
    }

    /// Wrap an error from a caller-supplied socket or TLS hook.
    pub fn other<E>(source: E) -> LdapError
    where
        E: StdError + Send + Sync + 'static,
    {
        LdapError::Other {
            source: Box::new(source),
        }
    }

    /// Classify an error from connection establishment. Refusals and
    /// reachability problems get their own kinds, the rest pass through.
    pub(crate) fn connect(source: io::Error) -> LdapError {
        match source.kind() {
            io::ErrorKind::ConnectionRefused => LdapError::ConnectionRefused { source },
            io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::NotFound => LdapError::Connect { source },
            _ => LdapError::Io { source },
        }
    }

    /// True for both kinds of connection establishment failure.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            LdapError::Connect { .. } | LdapError::ConnectionRefused { .. }
        )
    }
}

impl From<LdapError> for io::Error {
    fn from(le: LdapError) -> io::Error {
        match le {
            LdapError::Io { source } => source,
            _ => io::Error::new(io::ErrorKind::Other, format!("{}", le)),
        }
    }
}

pub(crate) const SASL_BIND_IN_PROGRESS: u32 = 14;

fn rc_name(rc: u32) -> &'static str {
    match rc {
        0 => "success",
        1 => "operationsError",
        2 => "protocolError",
        3 => "timeLimitExceeded",
        4 => "sizeLimitExceeded",
        5 => "compareFalse",
        6 => "compareTrue",
        7 => "authMethodNotSupported",
        8 => "strongerAuthRequired",
        10 => "referral",
        11 => "adminLimitExceeded",
        12 => "unavailableCriticalExtension",
        13 => "confidentialityRequired",
        14 => "saslBindInProgress",
        16 => "noSuchAttribute",
        17 => "undefinedAttributeType",
        18 => "inappropriateMatching",
        19 => "constraintViolation",
        20 => "attributeOrValueExists",
        21 => "invalidAttributeSyntax",
        32 => "noSuchObject",
        33 => "aliasProblem",
        34 => "invalidDNSyntax",
        36 => "aliasDereferencingProblem",
        48 => "inappropriateAuthentication",
        49 => "invalidCredentials",
        50 => "insufficientAccessRights",
        51 => "busy",
        52 => "unavailable",
        53 => "unwillingToPerform",
        54 => "loopDetect",
        64 => "namingViolation",
        65 => "objectClassViolation",
        66 => "notAllowedOnNonLeaf",
        67 => "notAllowedOnRDN",
        68 => "entryAlreadyExists",
        69 => "objectClassModsProhibited",
        71 => "affectsMultipleDSAs",
        80 => "other",
        88 => "abandoned",
        118 => "canceled",
        122 => "assertionFailed",
        _ => "unknown",
    }
}

/// Common components of an LDAP operation result.
///
/// The struct mirrors the LDAPResult of the protocol, with the message id of
/// the exchange and any response controls added. `text` is the server's
/// diagnostic message, kept verbatim.
#[derive(Clone, Debug)]
pub struct LdapResult {
    /// Message id of the request this result answers.
    pub id: RequestId,
    /// Result code. Zero is success.
    /// See [Section A.1 of RFC 4511](https://tools.ietf.org/html/rfc4511#appendix-A.1).
    pub rc: u32,
    /// Matched component DN, where applicable.
    pub matched: String,
    /// Additional diagnostic text.
    pub text: String,
    /// Referrals. Absence of referrals is an empty vector.
    pub refs: Vec<String>,
    /// Response controls. Missing and empty controls are both an empty vector.
    pub ctrls: Vec<Control>,
}

impl StdError for LdapResult {}

impl fmt::Display for LdapResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "rc={} ({}), dn: \"{}\", text: \"{}\"",
            self.rc,
            rc_name(self.rc),
            self.matched,
            self.text
        )
    }
}

impl LdapResult {
    /// True if the result code is zero.
    pub fn is_success(&self) -> bool {
        self.rc == 0
    }

    /// Symbolic name of the result code, e.g. `unwillingToPerform`.
    pub fn message(&self) -> &'static str {
        rc_name(self.rc)
    }

    /// Diagnostic message sent by the server.
    pub fn error_message(&self) -> &str {
        &self.text
    }

    /// If the result code is zero, return the instance itself wrapped
    /// in `Ok()`, otherwise wrap the instance in an `LdapError`.
    pub fn success(self) -> Result<Self> {
        if self.rc == 0 {
            Ok(self)
        } else {
            Err(LdapError::from(self))
        }
    }

    /// If the result code is 0 or 10 (referral), return the instance
    /// itself wrapped in `Ok()`, otherwise wrap the instance in an
    /// `LdapError`.
    pub fn non_error(self) -> Result<Self> {
        if self.rc == 0 || self.rc == 10 {
            Ok(self)
        } else {
            Err(LdapError::from(self))
        }
    }
}

/// Entries and overall result of a Search.
#[derive(Clone, Debug)]
pub struct SearchResult(pub Vec<SearchEntry>, pub LdapResult);

impl SearchResult {
    /// If the result code is zero, return the entries and the result,
    /// otherwise wrap the `LdapResult` part in an `LdapError`.
    pub fn success(self) -> Result<(Vec<SearchEntry>, LdapResult)> {
        let SearchResult(entries, res) = self;
        Ok((entries, res.success()?))
    }

    /// Like [`success()`](#method.success), but also accepts a referral.
    pub fn non_error(self) -> Result<(Vec<SearchEntry>, LdapResult)> {
        let SearchResult(entries, res) = self;
        Ok((entries, res.non_error()?))
    }
}

/// Wrapper for the result of a Compare operation.
///
/// A completed comparison reports either compareFalse (5) or compareTrue (6);
/// every other code except referral signals an error.
#[derive(Clone, Debug)]
pub struct CompareResult(pub LdapResult);

impl CompareResult {
    /// Map compareTrue/compareFalse to a boolean, anything else to an error.
    pub fn equal(self) -> Result<bool> {
        match self.0.rc {
            5 => Ok(false),
            6 => Ok(true),
            _ => Err(LdapError::from(self.0)),
        }
    }

    /// Return the inner result for codes 5, 6 and 10, otherwise an error.
    pub fn non_error(self) -> Result<LdapResult> {
        match self.0.rc {
            5 | 6 | 10 => Ok(self.0),
            _ => Err(LdapError::from(self.0)),
        }
    }
}

/// Response name/value and overall result of an Extended operation.
#[derive(Clone, Debug)]
pub struct ExopResult(pub Exop, pub LdapResult);

impl ExopResult {
    /// If the result code is zero, return both parts, otherwise wrap the
    /// `LdapResult` part in an `LdapError`.
    pub fn success(self) -> Result<(Exop, LdapResult)> {
        let ExopResult(exop, res) = self;
        Ok((exop, res.success()?))
    }

    /// Like [`success()`](#method.success), but also accepts a referral.
    pub fn non_error(self) -> Result<(Exop, LdapResult)> {
        let ExopResult(exop, res) = self;
        Ok((exop, res.non_error()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(rc: u32, text: &str) -> LdapResult {
        LdapResult {
            id: 3,
            rc,
            matched: String::new(),
            text: text.to_owned(),
            refs: vec![],
            ctrls: vec![],
        }
    }

    #[test]
    fn failing_result_keeps_diagnostic() {
        let res = result(53, "no writes today");
        assert!(!res.is_success());
        assert_eq!(res.message(), "unwillingToPerform");
        assert_eq!(res.error_message(), "no writes today");
        assert_eq!(
            res.to_string(),
            "rc=53 (unwillingToPerform), dn: \"\", text: \"no writes today\""
        );
        match res.success() {
            Err(LdapError::LdapResult { result }) => assert_eq!(result.text, "no writes today"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn referral_is_not_an_error() {
        assert!(result(10, "").non_error().is_ok());
        assert!(result(10, "").success().is_err());
    }

    #[test]
    fn compare_outcomes() {
        assert!(CompareResult(result(6, "")).equal().unwrap());
        assert!(!CompareResult(result(5, "")).equal().unwrap());
        assert!(CompareResult(result(32, "")).equal().is_err());
    }

    #[test]
    fn connect_errors_are_classified() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            LdapError::connect(refused),
            LdapError::ConnectionRefused { .. }
        ));
        for kind in [
            io::ErrorKind::HostUnreachable,
            io::ErrorKind::NetworkUnreachable,
            io::ErrorKind::AddrNotAvailable,
        ] {
            let err = LdapError::connect(io::Error::from(kind));
            assert!(matches!(err, LdapError::Connect { .. }), "{:?}", kind);
            assert!(err.is_connect_error());
        }
    }

    #[test]
    fn other_connect_errors_pass_through() {
        for kind in [io::ErrorKind::TimedOut, io::ErrorKind::PermissionDenied] {
            match LdapError::connect(io::Error::new(kind, "as raised")) {
                LdapError::Io { source } => {
                    assert_eq!(source.kind(), kind);
                    assert_eq!(source.to_string(), "as raised");
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn foreign_errors_are_kept_intact() {
        #[derive(Debug)]
        struct HandshakeRejected;

        impl fmt::Display for HandshakeRejected {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "handshake rejected")
            }
        }

        impl StdError for HandshakeRejected {}

        let err = LdapError::other(HandshakeRejected);
        assert_eq!(err.to_string(), "handshake rejected");
        match err {
            LdapError::Other { source } => assert!(source.is::<HandshakeRejected>()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
