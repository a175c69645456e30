use crate::common::TagClass;

/// Generic tag tree with already encoded primitive payloads.
///
/// Everything written to or read from the wire passes through this form.
#[derive(Clone, PartialEq, Debug, Eq)]
pub struct StructureTag {
    pub class: TagClass,
    pub id: u64,
    pub payload: PL,
}

/// Tagged value payload.
#[derive(Clone, PartialEq, Debug, Eq)]
pub enum PL {
    /// Primitive value.
    P(Vec<u8>),
    /// Constructed value.
    C(Vec<StructureTag>),
}

impl StructureTag {
    /// True if the tag has the given class and number.
    pub fn is(&self, class: TagClass, id: u64) -> bool {
        self.class == class && self.id == id
    }

    pub fn is_constructed(&self) -> bool {
        matches!(self.payload, PL::C(_))
    }

    pub fn match_class(self, class: TagClass) -> Option<Self> {
        (self.class == class).then_some(self)
    }

    pub fn match_id(self, id: u64) -> Option<Self> {
        (self.id == id).then_some(self)
    }

    pub fn expect_constructed(self) -> Option<Vec<StructureTag>> {
        match self.payload {
            PL::C(inner) => Some(inner),
            PL::P(_) => None,
        }
    }

    pub fn expect_primitive(self) -> Option<Vec<u8>> {
        match self.payload {
            PL::P(inner) => Some(inner),
            PL::C(_) => None,
        }
    }

    /// Borrow the contents of a primitive value.
    pub fn as_primitive(&self) -> Option<&[u8]> {
        match self.payload {
            PL::P(ref inner) => Some(inner),
            PL::C(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind_response() -> StructureTag {
        StructureTag {
            class: TagClass::Application,
            id: 1,
            payload: PL::C(vec![
                StructureTag {
                    class: TagClass::Universal,
                    id: 10,
                    payload: PL::P(vec![0x31]),
                },
                StructureTag {
                    class: TagClass::Context,
                    id: 7,
                    payload: PL::P(b"creds".to_vec()),
                },
            ]),
        }
    }

    #[test]
    fn match_by_class_and_id() {
        let tag = bind_response();
        assert!(tag.is(TagClass::Application, 1));
        assert!(!tag.is(TagClass::Context, 1));
        assert_eq!(
            tag.clone()
                .match_class(TagClass::Application)
                .and_then(|t| t.match_id(1)),
            Some(tag.clone())
        );
        assert_eq!(tag.match_id(4), None);
    }

    #[test]
    fn unwrap_payloads() {
        let mut inner = bind_response().expect_constructed().unwrap();
        let creds = inner.pop().unwrap();
        assert_eq!(creds.as_primitive(), Some(&b"creds"[..]));
        assert!(!creds.is_constructed());
        assert_eq!(creds.clone().expect_constructed(), None);
        assert_eq!(creds.expect_primitive(), Some(b"creds".to_vec()));
        assert!(bind_response().expect_primitive().is_none());
    }
}
