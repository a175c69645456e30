//! Typed model of decoded responses.
//!
//! Every unit read from the socket is turned into a [`Pdu`](struct.Pdu.html),
//! whose [`AppTag`](enum.AppTag.html) tells which response kind it is. Operation
//! builders match on the tag and treat any kind they don't expect as an
//! [`UnexpectedResponse`](../enum.LdapError.html#variant.UnexpectedResponse).

use std::fmt;

use crate::controls::Control;
use crate::exop::Exop;
use crate::protocol::RawUnit;
use crate::result::{LdapError, LdapResult, Result};
use crate::search::{parse_refs, SearchEntry};
use crate::RequestId;

use lber::common::TagClass;
use lber::parse::parse_uint;
use lber::structure::StructureTag;
use lber::universal::Types;

/// Response kinds, by APPLICATION tag number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AppTag {
    BindResponse = 1,
    SearchResultEntry = 4,
    SearchResultDone = 5,
    ModifyResponse = 7,
    AddResponse = 9,
    DeleteResponse = 11,
    ModifyDNResponse = 13,
    CompareResponse = 15,
    SearchResultReference = 19,
    ExtendedResponse = 24,
    IntermediateResponse = 25,
}

impl AppTag {
    pub fn from_id(id: u64) -> Option<AppTag> {
        Some(match id {
            1 => AppTag::BindResponse,
            4 => AppTag::SearchResultEntry,
            5 => AppTag::SearchResultDone,
            7 => AppTag::ModifyResponse,
            9 => AppTag::AddResponse,
            11 => AppTag::DeleteResponse,
            13 => AppTag::ModifyDNResponse,
            15 => AppTag::CompareResponse,
            19 => AppTag::SearchResultReference,
            24 => AppTag::ExtendedResponse,
            25 => AppTag::IntermediateResponse,
            _ => return None,
        })
    }

    /// True for kinds which carry an LDAPResult.
    pub fn has_result(self) -> bool {
        !matches!(
            self,
            AppTag::SearchResultEntry | AppTag::SearchResultReference | AppTag::IntermediateResponse
        )
    }
}

impl fmt::Display for AppTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Operation-specific part of a response.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    None,
    Entry(SearchEntry),
    /// URIs of a search continuation reference.
    Reference(Vec<String>),
    /// Name and value of an extended or intermediate response.
    Extended(Exop),
    /// Server SASL credentials of a bind response.
    SaslCreds(Vec<u8>),
}

/// Decoded response unit.
///
/// For kinds without an LDAPResult, `rc` is zero and the strings are empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Pdu {
    pub msgid: RequestId,
    pub app_tag: AppTag,
    pub rc: u32,
    pub matched: String,
    pub text: String,
    pub refs: Vec<String>,
    pub payload: Payload,
    pub ctrls: Vec<Control>,
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| LdapError::DecodingUTF8)
}

fn octets(tag: Option<StructureTag>, what: &str) -> Result<Vec<u8>> {
    tag.filter(|t| t.is(TagClass::Universal, Types::OctetString as u64))
        .and_then(|t| t.expect_primitive())
        .ok_or_else(|| LdapError::decode(format!("{}: expected octet string", what)))
}

impl Pdu {
    /// Decode the protocol op of a raw unit.
    pub fn decode(unit: RawUnit) -> Result<Pdu> {
        let RawUnit { id, op, ctrls } = unit;
        let app_tag = AppTag::from_id(op.id)
            .ok_or_else(|| LdapError::decode(format!("unknown response tag {}", op.id)))?;
        let mut pdu = Pdu {
            msgid: id,
            app_tag,
            rc: 0,
            matched: String::new(),
            text: String::new(),
            refs: vec![],
            payload: Payload::None,
            ctrls,
        };
        match app_tag {
            AppTag::SearchResultEntry => {
                pdu.payload = Payload::Entry(SearchEntry::decode(op)?);
            }
            AppTag::SearchResultReference => {
                pdu.payload = Payload::Reference(parse_refs(op)?);
            }
            AppTag::IntermediateResponse => {
                let mut exop = Exop::default();
                let parts = op
                    .expect_constructed()
                    .ok_or_else(|| LdapError::decode("intermediate response"))?;
                for part in parts {
                    match (part.class, part.id) {
                        (TagClass::Context, 0) => {
                            exop.name = Some(utf8(octets_ctx(part, "responseName")?)?)
                        }
                        (TagClass::Context, 1) => {
                            exop.val = Some(octets_ctx(part, "responseValue")?)
                        }
                        _ => return Err(LdapError::decode("intermediate response element")),
                    }
                }
                pdu.payload = Payload::Extended(exop);
            }
            _ => pdu.decode_result(op)?,
        }
        Ok(pdu)
    }

    fn decode_result(&mut self, op: StructureTag) -> Result<()> {
        let mut parts = op
            .expect_constructed()
            .ok_or_else(|| LdapError::decode(format!("{}: not constructed", self.app_tag)))?
            .into_iter();
        let rc = parts
            .next()
            .filter(|t| t.is(TagClass::Universal, Types::Enumerated as u64))
            .and_then(|t| t.expect_primitive())
            .ok_or_else(|| LdapError::decode("resultCode: expected enumerated"))?;
        self.rc = match parse_uint(&rc) {
            Ok((_, rc)) if rc <= u64::from(u32::MAX) => rc as u32,
            _ => return Err(LdapError::decode("resultCode out of range")),
        };
        self.matched = utf8(octets(parts.next(), "matchedDN")?)?;
        self.text = utf8(octets(parts.next(), "diagnosticMessage")?)?;
        let mut exop = Exop::default();
        for part in parts {
            match (self.app_tag, part.class, part.id) {
                (_, TagClass::Context, 3) => self.refs = parse_refs(part)?,
                (AppTag::BindResponse, TagClass::Context, 7) => {
                    self.payload = Payload::SaslCreds(octets_ctx(part, "serverSaslCreds")?)
                }
                (AppTag::ExtendedResponse, TagClass::Context, 10) => {
                    exop.name = Some(utf8(octets_ctx(part, "responseName")?)?)
                }
                (AppTag::ExtendedResponse, TagClass::Context, 11) => {
                    exop.val = Some(octets_ctx(part, "responseValue")?)
                }
                _ => {
                    return Err(LdapError::decode(format!(
                        "{}: unexpected element [{}]",
                        self.app_tag, part.id
                    )))
                }
            }
        }
        if self.app_tag == AppTag::ExtendedResponse {
            self.payload = Payload::Extended(exop);
        }
        Ok(())
    }

    /// Fail with `UnexpectedResponse` unless the PDU is one of the `expected` kinds.
    pub fn expect_tag(self, expected: &'static [AppTag]) -> Result<Pdu> {
        if expected.contains(&self.app_tag) {
            Ok(self)
        } else {
            Err(LdapError::UnexpectedResponse {
                id: self.msgid,
                expected,
                got: self.app_tag,
            })
        }
    }

    pub fn is_success(&self) -> bool {
        self.rc == 0
    }

    /// Result part of the PDU, leaving the payload in place.
    pub fn result(&self) -> LdapResult {
        LdapResult {
            id: self.msgid,
            rc: self.rc,
            matched: self.matched.clone(),
            text: self.text.clone(),
            refs: self.refs.clone(),
            ctrls: self.ctrls.clone(),
        }
    }

    /// Split the PDU into its result and payload.
    pub fn into_result(self) -> (LdapResult, Payload) {
        (
            LdapResult {
                id: self.msgid,
                rc: self.rc,
                matched: self.matched,
                text: self.text,
                refs: self.refs,
                ctrls: self.ctrls,
            },
            self.payload,
        )
    }
}

fn octets_ctx(tag: StructureTag, what: &str) -> Result<Vec<u8>> {
    tag.expect_primitive()
        .ok_or_else(|| LdapError::decode(format!("{}: expected primitive", what)))
}
