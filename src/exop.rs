//! Extended operation construction and parsing.
//!
//! A request is anything convertible into [`Exop`](struct.Exop.html) and is
//! sent with [`Ldap::extended()`](../struct.Ldap.html#method.extended). The
//! response value, if any, is parsed with [`Exop::parse()`](struct.Exop.html#method.parse).

use std::str;

use crate::protocol::context_octet;
use crate::result::{LdapError, Result};

use lber::common::TagClass;
use lber::parse::parse_tag;
use lber::structures::{ASNTag, OctetString, Sequence, Tag};
use lber::write;

pub const STARTTLS_OID: &str = "1.3.6.1.4.1.1466.20037";
pub const WHOAMI_OID: &str = "1.3.6.1.4.1.4203.1.11.3";
pub const PASSMOD_OID: &str = "1.3.6.1.4.1.4203.1.11.1";

/// Generic extended operation.
///
/// Used both for requests and responses. In a response, either part may be
/// absent; a request must have a name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Exop {
    /// OID of the operation.
    pub name: Option<String>,
    /// Request or response value.
    pub val: Option<Vec<u8>>,
}

impl Exop {
    /// Parse the response value into an operation-specific struct.
    pub fn parse<T: ExopParser>(&self) -> Result<T> {
        T::parse(self.val.as_deref().unwrap_or_default())
    }
}

/// Conversion trait for extended response values.
pub trait ExopParser: Sized {
    fn parse(val: &[u8]) -> Result<Self>;
}

pub(crate) fn construct_exop(exop: Exop) -> Result<Vec<Tag>> {
    let name = exop.name.ok_or(LdapError::ExopNoName)?;
    let mut seq = vec![context_octet(0, name)];
    if let Some(val) = exop.val {
        seq.push(context_octet(1, val));
    }
    Ok(seq)
}

/// StartTLS extended operation ([RFC 4511](https://tools.ietf.org/html/rfc4511#section-4.14)).
///
/// Usually sent through [`Ldap::start_tls()`](../struct.Ldap.html#method.start_tls),
/// which also replaces the socket when the server agrees.
#[derive(Clone, Copy, Debug)]
pub struct StartTLS;

impl From<StartTLS> for Exop {
    fn from(_: StartTLS) -> Exop {
        Exop {
            name: Some(STARTTLS_OID.to_owned()),
            val: None,
        }
    }
}

/// Who Am I extended operation ([RFC 4532](https://tools.ietf.org/html/rfc4532)).
#[derive(Clone, Copy, Debug)]
pub struct WhoAmI;

/// Who Am I response.
#[derive(Clone, Debug)]
pub struct WhoAmIResp {
    /// Authorization identity, empty for anonymous.
    pub authzid: String,
}

impl From<WhoAmI> for Exop {
    fn from(_: WhoAmI) -> Exop {
        Exop {
            name: Some(WHOAMI_OID.to_owned()),
            val: None,
        }
    }
}

impl ExopParser for WhoAmIResp {
    fn parse(val: &[u8]) -> Result<WhoAmIResp> {
        Ok(WhoAmIResp {
            authzid: str::from_utf8(val)
                .map_err(|_| LdapError::DecodingUTF8)?
                .to_owned(),
        })
    }
}

/// Password Modify extended operation ([RFC 3062](https://tools.ietf.org/html/rfc3062)).
///
/// Every field is optional. Without `user_id`, the password of the bound
/// identity is changed; without `new_pass`, the server generates one and
/// returns it in [`PasswordModifyResp`](struct.PasswordModifyResp.html).
#[derive(Clone, Debug, Default)]
pub struct PasswordModify<'a> {
    pub user_id: Option<&'a str>,
    pub old_pass: Option<&'a str>,
    pub new_pass: Option<&'a str>,
}

/// Password Modify response.
#[derive(Clone, Debug)]
pub struct PasswordModifyResp {
    /// Server-generated password.
    pub gen_pass: String,
}

impl<'a> From<PasswordModify<'a>> for Exop {
    fn from(pm: PasswordModify<'a>) -> Exop {
        let fields = [pm.user_id, pm.old_pass, pm.new_pass];
        let inner: Vec<Tag> = fields
            .iter()
            .enumerate()
            .filter_map(|(id, field)| {
                field.map(|s| {
                    Tag::OctetString(OctetString {
                        id: id as u64,
                        class: TagClass::Context,
                        inner: s.as_bytes().to_vec(),
                    })
                })
            })
            .collect();
        let val = if inner.is_empty() {
            None
        } else {
            let seq = Tag::Sequence(Sequence {
                inner,
                ..Default::default()
            });
            Some(write::encode(seq.into_structure()))
        };
        Exop {
            name: Some(PASSMOD_OID.to_owned()),
            val,
        }
    }
}

impl ExopParser for PasswordModifyResp {
    fn parse(val: &[u8]) -> Result<PasswordModifyResp> {
        let bad = || LdapError::decode("password modify response");
        let (_, tag) = parse_tag(val).map_err(|_| bad())?;
        let gen_pass = tag
            .expect_constructed()
            .ok_or_else(bad)?
            .into_iter()
            .find(|t| t.is(TagClass::Context, 0))
            .and_then(|t| t.expect_primitive())
            .ok_or_else(bad)?;
        Ok(PasswordModifyResp {
            gen_pass: String::from_utf8(gen_pass).map_err(|_| LdapError::DecodingUTF8)?,
        })
    }
}
