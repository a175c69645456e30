//! BER decoding.
//!
//! The parsers are streaming: a buffer that ends in the middle of a value
//! yields `nom::Err::Incomplete`, while structurally invalid input (indefinite
//! lengths, oversized length fields, bad class bits) yields a hard error.
use crate::common::{TagClass, TagStructure};
use crate::structure::{StructureTag, PL};

use nom::bytes::streaming::take;
use nom::error::{Error, ErrorKind};
use nom::number::streaming::be_u8;
use nom::{IResult, Needed};

fn fail<T>(i: &[u8], kind: ErrorKind) -> IResult<&[u8], T> {
    Err(nom::Err::Failure(Error::new(i, kind)))
}

fn parse_identifier(i: &[u8]) -> IResult<&[u8], (TagClass, TagStructure, u64)> {
    let (mut i, lead) = be_u8(i)?;
    let class = match TagClass::from_u8(lead >> 6) {
        Some(class) => class,
        None => return fail(i, ErrorKind::Tag),
    };
    let structure = if lead & 0x20 == 0 {
        TagStructure::Primitive
    } else {
        TagStructure::Constructed
    };
    let mut id = u64::from(lead & 0x1F);
    if id == 0x1F {
        id = 0;
        loop {
            let (rest, digit) = be_u8(i)?;
            i = rest;
            if id > (u64::MAX >> 7) {
                return fail(i, ErrorKind::TooLarge);
            }
            id = (id << 7) | u64::from(digit & 0x7F);
            if digit & 0x80 == 0 {
                break;
            }
        }
    }
    Ok((i, (class, structure, id)))
}

fn parse_length(i: &[u8]) -> IResult<&[u8], usize> {
    let (i, first) = be_u8(i)?;
    if first < 0x80 {
        return Ok((i, first as usize));
    }
    let count = (first & 0x7F) as usize;
    if count == 0 {
        // Indefinite length is not used by LDAP.
        return fail(i, ErrorKind::LengthValue);
    }
    if count > std::mem::size_of::<usize>() {
        return fail(i, ErrorKind::TooLarge);
    }
    let (i, octets) = take(count)(i)?;
    let len = octets
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok((i, len))
}

/// Extract an unsigned integer value from the content octets of a BER integer.
///
/// Fails on empty input or on more than eight significant octets.
pub fn parse_uint(i: &[u8]) -> IResult<&[u8], u64> {
    let significant = match i.iter().position(|&b| b != 0) {
        Some(pos) => &i[pos..],
        None if i.is_empty() => return fail(i, ErrorKind::Eof),
        None => &[][..],
    };
    if significant.len() > 8 {
        return fail(i, ErrorKind::TooLarge);
    }
    let value = significant
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    Ok((&i[i.len()..], value))
}

/// Extract a signed integer value from two's-complement content octets.
pub fn parse_int(i: &[u8]) -> IResult<&[u8], i64> {
    if i.is_empty() {
        return fail(i, ErrorKind::Eof);
    }
    if i.len() > 8 {
        return fail(i, ErrorKind::TooLarge);
    }
    let seed: i64 = if i[0] & 0x80 != 0 { -1 } else { 0 };
    let value = i.iter().fold(seed, |acc, &b| (acc << 8) | i64::from(b));
    Ok((&i[i.len()..], value))
}

/// Parse one complete tag, recursing into constructed values.
pub fn parse_tag(i: &[u8]) -> IResult<&[u8], StructureTag> {
    let (i, (class, structure, id)) = parse_identifier(i)?;
    let (i, len) = parse_length(i)?;
    let (rest, content) = take(len)(i)?;
    let payload = match structure {
        TagStructure::Primitive => PL::P(content.to_vec()),
        TagStructure::Constructed => {
            let mut children = Vec::new();
            let mut content = content;
            while !content.is_empty() {
                // The enclosing length said these bytes are all there, so
                // running short inside them means the value is malformed.
                let (tail, child) = match parse_tag(content) {
                    Err(nom::Err::Incomplete(_)) => return fail(content, ErrorKind::Complete),
                    other => other?,
                };
                children.push(child);
                content = tail;
            }
            PL::C(children)
        }
    };
    Ok((rest, StructureTag { class, id, payload }))
}

/// Stateless entry point for parsing a buffer which may be empty.
#[derive(Debug, Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Parser
    }

    pub fn parse<'a>(&mut self, input: &'a [u8]) -> IResult<&'a [u8], StructureTag> {
        if input.is_empty() {
            return Err(nom::Err::Incomplete(Needed::Unknown));
        }
        parse_tag(input)
    }
}
