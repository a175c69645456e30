use super::{universal_default, ASNTag};
use crate::common::TagClass;
use crate::structure::{StructureTag, PL};
use crate::universal::Types;

/// Integer value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Integer {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

/// Integer under the ENUMERATED tag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Enumerated {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

/// String of bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct OctetString {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<u8>,
}

/// Boolean value. TRUE is encoded as 0xFF.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boolean {
    pub id: u64,
    pub class: TagClass,
    pub inner: bool,
}

/// Null value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Null {
    pub id: u64,
    pub class: TagClass,
    pub inner: (),
}

universal_default!(Integer, Types::Integer, 0);
universal_default!(Enumerated, Types::Enumerated, 0);
universal_default!(OctetString, Types::OctetString, Vec::new());
universal_default!(Boolean, Types::Boolean, false);
universal_default!(Null, Types::Null, ());

/// Minimal two's-complement, big-endian representation of `value`.
///
/// A leading octet is dropped while it is pure sign extension of the octet
/// after it, so 127 is `7F`, 128 is `00 80`, and -129 is `FF 7F`.
pub fn twos_complement(value: i64) -> Vec<u8> {
    let repr = value.to_be_bytes();
    let mut start = 0;
    while start < repr.len() - 1 {
        let next_negative = repr[start + 1] & 0x80 != 0;
        match repr[start] {
            0x00 if !next_negative => start += 1,
            0xFF if next_negative => start += 1,
            _ => break,
        }
    }
    repr[start..].to_vec()
}

fn primitive(id: u64, class: TagClass, content: Vec<u8>) -> StructureTag {
    StructureTag {
        id,
        class,
        payload: PL::P(content),
    }
}

impl ASNTag for Integer {
    fn into_structure(self) -> StructureTag {
        primitive(self.id, self.class, twos_complement(self.inner))
    }
}

impl ASNTag for Enumerated {
    fn into_structure(self) -> StructureTag {
        primitive(self.id, self.class, twos_complement(self.inner))
    }
}

impl ASNTag for OctetString {
    fn into_structure(self) -> StructureTag {
        primitive(self.id, self.class, self.inner)
    }
}

impl ASNTag for Boolean {
    fn into_structure(self) -> StructureTag {
        primitive(self.id, self.class, vec![if self.inner { 0xFF } else { 0x00 }])
    }
}

impl ASNTag for Null {
    fn into_structure(self) -> StructureTag {
        primitive(self.id, self.class, Vec::new())
    }
}
