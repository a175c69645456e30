//! Search filter parser.
//!
//! Turns the string representation of a filter ([RFC 4515](https://tools.ietf.org/html/rfc4515))
//! into its BER form. Supported are and, or, not, equality, approximate match,
//! ordering, presence and substring assertions. Any byte of an assertion value
//! may be written as `\NN` with two hex digits; parentheses, the asterisk and
//! the backslash must be.

use crate::result::{LdapError, Result};

use lber::common::TagClass;
use lber::structures::{ExplicitTag, OctetString, Sequence, Tag};

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::combinator::{map, map_res, recognize, verify};
use nom::multi::many0;
use nom::number::complete::be_u8;
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;

const AND: u64 = 0;
const OR: u64 = 1;
const NOT: u64 = 2;
const EQUALITY: u64 = 3;
const SUBSTRINGS: u64 = 4;
const GREATER_OR_EQUAL: u64 = 5;
const LESS_OR_EQUAL: u64 = 6;
const PRESENT: u64 = 7;
const APPROX: u64 = 8;

const SUB_INITIAL: u64 = 0;
const SUB_ANY: u64 = 1;
const SUB_FINAL: u64 = 2;

/// Parse a filter string. The outer parentheses may be omitted for a single item.
pub fn parse_filter(input: impl AsRef<[u8]>) -> Result<Tag> {
    match filter_expr(input.as_ref()) {
        Ok((rest, tag)) if rest.is_empty() => Ok(tag),
        _ => Err(LdapError::FilterParsing),
    }
}

fn filter_expr(i: &[u8]) -> IResult<&[u8], Tag> {
    alt((parenthesized, item))(i)
}

fn parenthesized(i: &[u8]) -> IResult<&[u8], Tag> {
    delimited(tag("("), component, tag(")"))(i)
}

fn component(i: &[u8]) -> IResult<&[u8], Tag> {
    alt((and, or, negation, item))(i)
}

fn and(i: &[u8]) -> IResult<&[u8], Tag> {
    set_of(i, "&", AND)
}

fn or(i: &[u8]) -> IResult<&[u8], Tag> {
    set_of(i, "|", OR)
}

fn set_of<'a>(i: &'a [u8], marker: &'static str, id: u64) -> IResult<&'a [u8], Tag> {
    let (i, inner) = preceded(tag(marker), many0(parenthesized))(i)?;
    Ok((
        i,
        Tag::Sequence(Sequence {
            id,
            class: TagClass::Context,
            inner,
        }),
    ))
}

fn negation(i: &[u8]) -> IResult<&[u8], Tag> {
    map(preceded(tag("!"), parenthesized), |inner| {
        Tag::ExplicitTag(ExplicitTag {
            id: NOT,
            class: TagClass::Context,
            inner: Box::new(inner),
        })
    })(i)
}

fn item(i: &[u8]) -> IResult<&[u8], Tag> {
    let (i, attr) = attribute_description(i)?;
    let (i, op) = alt((tag(">="), tag("<="), tag("~="), tag("=")))(i)?;
    let id = match op {
        b">=" => GREATER_OR_EQUAL,
        b"<=" => LESS_OR_EQUAL,
        b"~=" => APPROX,
        _ => return equality_or_substrings(i, attr),
    };
    let (i, value) = value_chunk(i)?;
    Ok((i, assertion(id, attr, value)))
}

fn equality_or_substrings<'a>(i: &'a [u8], attr: &[u8]) -> IResult<&'a [u8], Tag> {
    let (rest, (initial, mut tail)) = pair(value_chunk, many0(preceded(tag("*"), value_chunk)))(i)?;
    if tail.is_empty() {
        return Ok((rest, assertion(EQUALITY, attr, initial)));
    }
    if initial.is_empty() && tail.len() == 1 && tail[0].is_empty() {
        return Ok((
            rest,
            Tag::OctetString(OctetString {
                id: PRESENT,
                class: TagClass::Context,
                inner: attr.to_vec(),
            }),
        ));
    }
    // Only the final component may be empty: "a=x**y" is invalid.
    let last = tail.pop().unwrap_or_default();
    if tail.iter().any(Vec::is_empty) {
        return Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Verify,
        )));
    }
    let mut subs = vec![];
    let mut push = |id, inner: Vec<u8>| {
        if !inner.is_empty() {
            subs.push(Tag::OctetString(OctetString {
                id,
                class: TagClass::Context,
                inner,
            }));
        }
    };
    push(SUB_INITIAL, initial);
    for any in tail {
        push(SUB_ANY, any);
    }
    push(SUB_FINAL, last);
    Ok((
        rest,
        Tag::Sequence(Sequence {
            id: SUBSTRINGS,
            class: TagClass::Context,
            inner: vec![
                octet_string(attr.to_vec()),
                Tag::Sequence(Sequence {
                    inner: subs,
                    ..Default::default()
                }),
            ],
        }),
    ))
}

fn assertion(id: u64, attr: &[u8], value: Vec<u8>) -> Tag {
    Tag::Sequence(Sequence {
        id,
        class: TagClass::Context,
        inner: vec![octet_string(attr.to_vec()), octet_string(value)],
    })
}

fn octet_string(inner: Vec<u8>) -> Tag {
    Tag::OctetString(OctetString {
        inner,
        ..Default::default()
    })
}

fn is_value_char(c: u8) -> bool {
    !matches!(c, 0 | b'(' | b')' | b'*')
}

fn value_chunk(i: &[u8]) -> IResult<&[u8], Vec<u8>> {
    map_res(take_while(is_value_char), unescape)(i)
}

fn hex_value(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

fn unescape(raw: &[u8]) -> std::result::Result<Vec<u8>, ()> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter().copied();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match (
            bytes.next().and_then(hex_value),
            bytes.next().and_then(hex_value),
        ) {
            (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
            _ => return Err(()),
        }
    }
    Ok(out)
}

fn is_keychar(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'-'
}

fn attribute_description(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(pair(
        alt((numeric_oid, descr)),
        many0(preceded(tag(";"), take_while1(is_keychar))),
    ))(i)
}

fn descr(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(pair(
        verify(be_u8, |c: &u8| c.is_ascii_alphabetic()),
        take_while(is_keychar),
    ))(i)
}

fn numeric_oid(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(pair(number, many0(preceded(tag("."), number))))(i)
}

// No superfluous leading zeroes.
fn number(i: &[u8]) -> IResult<&[u8], &[u8]> {
    verify(take_while1(|c: u8| c.is_ascii_digit()), |d: &[u8]| {
        d.len() == 1 || d[0] != b'0'
    })(i)
}
