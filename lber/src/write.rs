//! BER encoding.
//!
//! Only the definite-length form is produced. Lengths below 128 use the short
//! form; longer ones use a length-of-length octet followed by the big-endian
//! length with no leading zero octets.
use crate::common::{TagClass, TagStructure};
use crate::structure::{StructureTag, PL};

use bytes::{BufMut, BytesMut};

/// Append the BER encoding of `tag` to `buf`.
pub fn encode_into(buf: &mut BytesMut, tag: StructureTag) {
    match tag.payload {
        PL::P(content) => {
            put_identifier(buf, tag.class, TagStructure::Primitive, tag.id);
            put_length(buf, content.len());
            buf.put_slice(&content);
        }
        PL::C(children) => {
            let mut content = BytesMut::new();
            for child in children {
                encode_into(&mut content, child);
            }
            put_identifier(buf, tag.class, TagStructure::Constructed, tag.id);
            put_length(buf, content.len());
            buf.put_slice(&content);
        }
    }
}

/// Encode `tag` into a freshly allocated vector.
pub fn encode(tag: StructureTag) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_into(&mut buf, tag);
    buf.to_vec()
}

fn put_identifier(buf: &mut BytesMut, class: TagClass, structure: TagStructure, id: u64) {
    let lead = (class as u8) << 6 | (structure as u8) << 5;
    if id < 31 {
        buf.put_u8(lead | id as u8);
        return;
    }
    // High tag number form: 0x1F, then base-128 digits, most significant first,
    // with the top bit set on all but the last.
    buf.put_u8(lead | 0x1F);
    let digits = (64 - id.leading_zeros() as usize + 6) / 7;
    for i in (0..digits).rev() {
        let digit = ((id >> (7 * i)) & 0x7F) as u8;
        buf.put_u8(if i == 0 { digit } else { digit | 0x80 });
    }
}

fn put_length(buf: &mut BytesMut, length: usize) {
    if length < 128 {
        buf.put_u8(length as u8);
        return;
    }
    let repr = length.to_be_bytes();
    let skip = repr.iter().take_while(|&&b| b == 0).count();
    buf.put_u8(0x80 | (repr.len() - skip) as u8);
    buf.put_slice(&repr[skip..]);
}
