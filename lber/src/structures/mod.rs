//! Typed ASN.1 values used by LDAP.
//!
//! Every value carries its own class and tag number, so the same struct serves
//! for universal and implicitly tagged uses. `Default` gives the universal tag.
use crate::structure::StructureTag;

macro_rules! universal_default {
    ($name:ident, $ty:expr, $inner:expr) => {
        impl Default for $name {
            fn default() -> Self {
                $name {
                    id: $ty as u64,
                    class: $crate::common::TagClass::Universal,
                    inner: $inner,
                }
            }
        }
    };
}
pub(crate) use universal_default;

mod constructed;
mod primitive;

pub use self::constructed::{ExplicitTag, Sequence, Set};
pub use self::primitive::{Boolean, Enumerated, Integer, Null, OctetString};

/// Conversion of a typed value into the generic serializable form.
pub trait ASNTag {
    fn into_structure(self) -> StructureTag;
}

/// Set of basic ASN.1 types used by LDAP.
#[derive(Clone, Debug, PartialEq)]
pub enum Tag {
    Integer(Integer),
    Enumerated(Enumerated),
    Sequence(Sequence),
    /// Set of values. Element order is kept as given.
    Set(Set),
    OctetString(OctetString),
    Boolean(Boolean),
    Null(Null),
    /// Explicitly tagged value. LDAP tags implicitly, except for the NOT filter.
    ExplicitTag(ExplicitTag),
    /// Value already in serializable form.
    StructureTag(StructureTag),
}

impl ASNTag for Tag {
    fn into_structure(self) -> StructureTag {
        match self {
            Tag::Integer(t) => t.into_structure(),
            Tag::Enumerated(t) => t.into_structure(),
            Tag::Sequence(t) => t.into_structure(),
            Tag::Set(t) => t.into_structure(),
            Tag::OctetString(t) => t.into_structure(),
            Tag::Boolean(t) => t.into_structure(),
            Tag::Null(t) => t.into_structure(),
            Tag::ExplicitTag(t) => t.into_structure(),
            Tag::StructureTag(t) => t,
        }
    }
}
