use crate::controls::{build_tag, parse_controls, Control, RawControl};
use crate::result::LdapError;
use crate::RequestId;

use lber::common::TagClass;
use lber::parse::parse_int;
use lber::structure::{StructureTag, PL};
use lber::structures::{ASNTag, Integer, OctetString, Sequence, Tag};
use lber::universal::Types;
use lber::write;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// APPLICATION tag numbers of request operations.
pub(crate) mod op {
    pub const BIND: u64 = 0;
    pub const UNBIND: u64 = 2;
    pub const SEARCH: u64 = 3;
    pub const MODIFY: u64 = 6;
    pub const ADD: u64 = 8;
    pub const DELETE: u64 = 10;
    pub const MODDN: u64 = 12;
    pub const COMPARE: u64 = 14;
    pub const ABANDON: u64 = 16;
    pub const EXTENDED: u64 = 23;
}

pub(crate) type MaybeControls = Option<Vec<RawControl>>;

/// One decoded message envelope: the message id, the still-undecoded
/// protocol operation, and the response controls.
#[derive(Clone, Debug, PartialEq)]
pub struct RawUnit {
    pub id: RequestId,
    pub op: StructureTag,
    pub ctrls: Vec<Control>,
}

/// Envelope codec for LDAPMessage framing.
#[derive(Clone, Copy, Debug, Default)]
pub struct LdapCodec;

fn decoding_error(what: &str) -> LdapError {
    LdapError::decode(format!("message envelope: {}", what))
}

impl Decoder for LdapCodec {
    type Item = RawUnit;
    type Error = LdapError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawUnit>, LdapError> {
        let mut parser = lber::Parser::new();
        let (consumed, tag) = match parser.parse(buf) {
            Err(e) if e.is_incomplete() => return Ok(None),
            Err(_) => return Err(decoding_error("malformed BER")),
            Ok((rest, tag)) => (buf.len() - rest.len(), tag),
        };
        buf.advance(consumed);
        let mut tags = tag
            .match_class(TagClass::Universal)
            .and_then(|t| t.match_id(Types::Sequence as u64))
            .and_then(|t| t.expect_constructed())
            .ok_or_else(|| decoding_error("not a sequence"))?
            .into_iter();
        let msgid = tags
            .next()
            .filter(|t| t.is(TagClass::Universal, Types::Integer as u64))
            .and_then(|t| t.expect_primitive())
            .ok_or_else(|| decoding_error("missing message id"))?;
        let msgid = match parse_int(&msgid) {
            Ok((_, id)) if (0..=i64::from(RequestId::MAX)).contains(&id) => id as RequestId,
            _ => return Err(decoding_error("message id out of range")),
        };
        let op = tags
            .next()
            .filter(|t| t.class == TagClass::Application)
            .ok_or_else(|| decoding_error("missing protocol op"))?;
        let mut ctrls = vec![];
        for extra in tags {
            match extra {
                StructureTag {
                    class: TagClass::Context,
                    id: 0,
                    payload: PL::C(_),
                } => ctrls = parse_controls(extra)?,
                // Active Directory puts the OID of a Notice of Disconnection
                // after the protocol op instead of inside it.
                StructureTag {
                    class: TagClass::Context,
                    id: 10,
                    ..
                } => (),
                _ => return Err(decoding_error("unexpected trailing element")),
            }
        }
        Ok(Some(RawUnit {
            id: msgid,
            op,
            ctrls,
        }))
    }
}

impl Encoder<(RequestId, Tag, MaybeControls)> for LdapCodec {
    type Error = LdapError;

    fn encode(
        &mut self,
        msg: (RequestId, Tag, MaybeControls),
        into: &mut BytesMut,
    ) -> Result<(), LdapError> {
        let (id, tag, controls) = msg;
        let mut inner = vec![
            Tag::Integer(Integer {
                inner: id as i64,
                ..Default::default()
            }),
            tag,
        ];
        if let Some(controls) = controls {
            inner.push(Tag::StructureTag(StructureTag {
                id: 0,
                class: TagClass::Context,
                payload: PL::C(controls.into_iter().map(build_tag).collect()),
            }));
        }
        let envelope = Tag::Sequence(Sequence {
            inner,
            ..Default::default()
        });
        write::encode_into(into, envelope.into_structure());
        Ok(())
    }
}

pub(crate) fn octet(bytes: impl AsRef<[u8]>) -> Tag {
    Tag::OctetString(OctetString {
        inner: bytes.as_ref().to_vec(),
        ..Default::default()
    })
}

pub(crate) fn context_octet(id: u64, bytes: impl AsRef<[u8]>) -> Tag {
    Tag::OctetString(OctetString {
        id,
        class: TagClass::Context,
        inner: bytes.as_ref().to_vec(),
    })
}

pub(crate) fn app_seq(id: u64, inner: Vec<Tag>) -> Tag {
    Tag::Sequence(Sequence {
        id,
        class: TagClass::Application,
        inner,
    })
}
