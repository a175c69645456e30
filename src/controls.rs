//! Control construction and parsing.
//!
//! A request control is anything convertible into [`RawControl`](struct.RawControl.html);
//! it is attached to the next operation with
//! [`Ldap::with_controls()`](../struct.Ldap.html#method.with_controls). Response
//! controls are decoded into [`Control`](struct.Control.html) values and end up in
//! the `ctrls` vector of the operation's result.

use crate::result::{LdapError, Result};

use lber::common::TagClass;
use lber::parse::{parse_int, parse_tag};
use lber::structure::StructureTag;
use lber::structures::{ASNTag, Boolean, Integer, OctetString, Sequence, Tag};
use lber::universal::Types;
use lber::write;

pub const MANAGE_DSA_IT_OID: &str = "2.16.840.1.113730.3.4.2";
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// Control types recognized by the library.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlType {
    PagedResults,
    ManageDsaIt,
}

fn known_control(oid: &str) -> Option<ControlType> {
    match oid {
        PAGED_RESULTS_OID => Some(ControlType::PagedResults),
        MANAGE_DSA_IT_OID => Some(ControlType::ManageDsaIt),
        _ => None,
    }
}

/// Conversion trait for request control lists, so that a single control can
/// be passed where a vector is expected.
pub trait IntoRawControlVec {
    fn into(self) -> Vec<RawControl>;
}

impl IntoRawControlVec for Vec<RawControl> {
    fn into(self) -> Vec<RawControl> {
        self
    }
}

impl<R> IntoRawControlVec for R
where
    RawControl: From<R>,
{
    fn into(self) -> Vec<RawControl> {
        vec![std::convert::Into::into(self)]
    }
}

/// Mark a control as critical.
pub trait MakeCritical {
    fn critical(self) -> CriticalControl<Self>
    where
        Self: Sized,
    {
        CriticalControl { control: self }
    }
}

/// Wrapper which sets the criticality of the enclosed control when encoded.
pub struct CriticalControl<T> {
    control: T,
}

impl<T> From<CriticalControl<T>> for RawControl
where
    T: Into<RawControl>,
{
    fn from(cc: CriticalControl<T>) -> RawControl {
        let mut rc = cc.control.into();
        rc.crit = true;
        rc
    }
}

/// Conversion trait for response control values.
pub trait ControlParser: Sized {
    fn parse(val: &[u8]) -> Result<Self>;
}

/// Response control, with the recognized type if the OID is known.
#[derive(Clone, Debug, PartialEq)]
pub struct Control(pub Option<ControlType>, pub RawControl);

/// Generic control, used for both requests and responses.
#[derive(Clone, Debug, PartialEq)]
pub struct RawControl {
    /// OID of the control.
    pub ctype: String,
    /// Criticality, has no meaning on response.
    pub crit: bool,
    /// Raw value of the control, if any.
    pub val: Option<Vec<u8>>,
}

impl RawControl {
    /// Parse the control value into a control-specific struct.
    pub fn parse<T: ControlParser>(&self) -> Result<T> {
        match self.val {
            Some(ref val) => T::parse(val),
            None => Err(LdapError::decode(format!("control {} has no value", self.ctype))),
        }
    }
}

/// ManageDsaIt control ([RFC 3296](https://tools.ietf.org/html/rfc3296)).
#[derive(Clone, Copy, Debug, Default)]
pub struct ManageDsaIt;

impl MakeCritical for ManageDsaIt {}

impl From<ManageDsaIt> for RawControl {
    fn from(_: ManageDsaIt) -> RawControl {
        RawControl {
            ctype: MANAGE_DSA_IT_OID.to_owned(),
            crit: false,
            val: None,
        }
    }
}

/// Paged Results control ([RFC 2696](https://tools.ietf.org/html/rfc2696)),
/// the same struct for request and response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PagedResults {
    /// Requested page size, or the server's estimate of the result size.
    pub size: i32,
    /// Opaque cookie; empty on the first request and on the last response.
    pub cookie: Vec<u8>,
}

impl MakeCritical for PagedResults {}

impl From<PagedResults> for RawControl {
    fn from(pr: PagedResults) -> RawControl {
        let value = Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer {
                    inner: pr.size as i64,
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    inner: pr.cookie,
                    ..Default::default()
                }),
            ],
            ..Default::default()
        });
        RawControl {
            ctype: PAGED_RESULTS_OID.to_owned(),
            crit: false,
            val: Some(write::encode(value.into_structure())),
        }
    }
}

impl ControlParser for PagedResults {
    fn parse(val: &[u8]) -> Result<PagedResults> {
        let bad = || LdapError::decode("paged results control value");
        let (_, tag) = parse_tag(val).map_err(|_| bad())?;
        let mut parts = tag.expect_constructed().ok_or_else(bad)?.into_iter();
        let size = parts
            .next()
            .and_then(|t| t.expect_primitive())
            .ok_or_else(bad)?;
        let size = parse_int(&size).map_err(|_| bad())?.1 as i32;
        let cookie = parts
            .next()
            .and_then(|t| t.expect_primitive())
            .ok_or_else(bad)?;
        Ok(PagedResults { size, cookie })
    }
}

pub(crate) fn build_tag(rc: RawControl) -> StructureTag {
    let mut seq = vec![Tag::OctetString(OctetString {
        inner: rc.ctype.into_bytes(),
        ..Default::default()
    })];
    if rc.crit {
        seq.push(Tag::Boolean(Boolean {
            inner: true,
            ..Default::default()
        }));
    }
    if let Some(val) = rc.val {
        seq.push(Tag::OctetString(OctetString {
            inner: val,
            ..Default::default()
        }));
    }
    Tag::Sequence(Sequence {
        inner: seq,
        ..Default::default()
    })
    .into_structure()
}

pub(crate) fn parse_controls(t: StructureTag) -> Result<Vec<Control>> {
    let bad = || LdapError::decode("response controls");
    let mut ctrls = Vec::new();
    for ctrl in t.expect_constructed().ok_or_else(bad)? {
        let mut components = ctrl.expect_constructed().ok_or_else(bad)?.into_iter();
        let ctype = components
            .next()
            .and_then(|t| t.expect_primitive())
            .ok_or_else(bad)?;
        let ctype = String::from_utf8(ctype).map_err(|_| LdapError::DecodingUTF8)?;
        let mut crit = false;
        let mut val = None;
        for comp in components {
            if comp.is(TagClass::Universal, Types::Boolean as u64) {
                crit = comp.as_primitive().ok_or_else(bad)?.first().copied().unwrap_or(0) != 0;
            } else if comp.is(TagClass::Universal, Types::OctetString as u64) {
                val = Some(comp.expect_primitive().ok_or_else(bad)?);
            } else {
                return Err(bad());
            }
        }
        ctrls.push(Control(known_control(&ctype), RawControl { ctype, crit, val }));
    }
    Ok(ctrls)
}
