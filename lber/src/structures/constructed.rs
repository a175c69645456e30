use super::{universal_default, ASNTag, Tag};
use crate::common::TagClass;
use crate::structure::{StructureTag, PL};
use crate::universal::Types;

/// Ordered sequence of values.
#[derive(Clone, Debug, PartialEq)]
pub struct Sequence {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<Tag>,
}

/// Set of values.
#[derive(Clone, Debug, PartialEq)]
pub struct Set {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<Tag>,
}

/// Value wrapped in an explicit tag.
// No Default: an explicit tag without a chosen number is meaningless.
#[derive(Clone, Debug, PartialEq)]
pub struct ExplicitTag {
    pub id: u64,
    pub class: TagClass,
    pub inner: Box<Tag>,
}

universal_default!(Sequence, Types::Sequence, Vec::new());
universal_default!(Set, Types::Set, Vec::new());

fn constructed(id: u64, class: TagClass, inner: Vec<Tag>) -> StructureTag {
    StructureTag {
        id,
        class,
        payload: PL::C(inner.into_iter().map(ASNTag::into_structure).collect()),
    }
}

impl ASNTag for Sequence {
    fn into_structure(self) -> StructureTag {
        constructed(self.id, self.class, self.inner)
    }
}

impl ASNTag for Set {
    fn into_structure(self) -> StructureTag {
        constructed(self.id, self.class, self.inner)
    }
}

impl ASNTag for ExplicitTag {
    fn into_structure(self) -> StructureTag {
        constructed(self.id, self.class, vec![*self.inner])
    }
}
