use std::collections::HashMap;

use crate::filter::parse_filter;
use crate::protocol::{app_seq, octet, op};
use crate::result::{LdapError, Result};

use lber::common::TagClass;
use lber::structure::StructureTag;
use lber::structures::{Boolean, Enumerated, Integer, Sequence, Tag};
use lber::universal::Types;

/// Possible values for search scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Base object; search only the object named in the base DN.
    Base = 0,
    /// Search the objects immediately below the base DN.
    OneLevel = 1,
    /// Search the object named in the base DN and the whole subtree below it.
    Subtree = 2,
}

/// Possible values for alias dereferencing during search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DerefAliases {
    /// Never dereference.
    #[default]
    Never = 0,
    /// Dereference while retrieving objects according to search scope.
    Searching = 1,
    /// Dereference while finding the base object.
    Finding = 2,
    /// Always dereference.
    Always = 3,
}

/// Additional parameters for the Search operation.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct SearchOptions {
    pub deref: DerefAliases,
    pub typesonly: bool,
    pub timelimit: i32,
    pub sizelimit: i32,
}

impl SearchOptions {
    /// Create an instance of the structure with default values.
    pub fn new() -> Self {
        SearchOptions::default()
    }

    /// Set the method for dereferencing aliases.
    pub fn deref(mut self, d: DerefAliases) -> Self {
        self.deref = d;
        self
    }

    /// Set the indicator of returning just attribute names (`true`) vs. names and values (`false`).
    pub fn typesonly(mut self, typesonly: bool) -> Self {
        self.typesonly = typesonly;
        self
    }

    /// Set the time limit, in seconds, for the whole search operation.
    ///
    /// This is a server-side limit of the elapsed time for performing the operation, _not_ a
    /// network timeout; the library itself never times out a read.
    pub fn timelimit(mut self, timelimit: i32) -> Self {
        self.timelimit = timelimit;
        self
    }

    /// Set the size limit, in entries, for the whole search operation.
    pub fn sizelimit(mut self, sizelimit: i32) -> Self {
        self.sizelimit = sizelimit;
        self
    }
}

/// Parsed search result entry.
///
/// Attribute values come from the server as octet strings without type
/// information. Each value is converted to a `String` if it is valid UTF-8. If
/// any value of an attribute isn't, the attribute with all its values goes to
/// `bin_attrs` instead, so a binary attribute should be looked up in both maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchEntry {
    /// Entry DN.
    pub dn: String,
    /// Attributes.
    pub attrs: HashMap<String, Vec<String>>,
    /// Binary-valued attributes.
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

fn entry_error(what: &str) -> LdapError {
    LdapError::decode(format!("search entry: {}", what))
}

fn octets(tag: StructureTag, what: &str) -> Result<Vec<u8>> {
    tag.match_class(TagClass::Universal)
        .and_then(|t| t.match_id(Types::OctetString as u64))
        .and_then(|t| t.expect_primitive())
        .ok_or_else(|| entry_error(what))
}

impl SearchEntry {
    /// Decode the SearchResultEntry protocol op.
    pub fn decode(op: StructureTag) -> Result<SearchEntry> {
        let mut parts = op
            .match_class(TagClass::Application)
            .and_then(|t| t.match_id(4))
            .and_then(|t| t.expect_constructed())
            .ok_or_else(|| entry_error("not a SearchResultEntry"))?
            .into_iter();
        let dn = parts.next().ok_or_else(|| entry_error("missing DN"))?;
        let dn = String::from_utf8(octets(dn, "DN")?).map_err(|_| LdapError::DecodingUTF8)?;
        let attr_list = parts
            .next()
            .and_then(|t| t.expect_constructed())
            .ok_or_else(|| entry_error("missing attribute list"))?;
        let mut entry = SearchEntry {
            dn,
            ..Default::default()
        };
        for partial in attr_list {
            let mut partial = partial
                .expect_constructed()
                .ok_or_else(|| entry_error("partial attribute"))?
                .into_iter();
            let name = partial.next().ok_or_else(|| entry_error("attribute type"))?;
            let name = String::from_utf8(octets(name, "attribute type")?)
                .map_err(|_| LdapError::DecodingUTF8)?;
            let values = partial
                .next()
                .and_then(|t| t.expect_constructed())
                .ok_or_else(|| entry_error("attribute values"))?
                .into_iter()
                .map(|v| octets(v, "attribute value"))
                .collect::<Result<Vec<_>>>()?;
            if values.iter().all(|v| std::str::from_utf8(v).is_ok()) {
                let values = values
                    .into_iter()
                    .filter_map(|v| String::from_utf8(v).ok())
                    .collect();
                entry.attrs.insert(name, values);
            } else {
                entry.bin_attrs.insert(name, values);
            }
        }
        Ok(entry)
    }
}

/// Parse the referral URIs from a sequence of octet strings.
pub(crate) fn parse_refs(t: StructureTag) -> Result<Vec<String>> {
    t.expect_constructed()
        .ok_or_else(|| LdapError::decode("referrals"))?
        .into_iter()
        .map(|t| {
            t.expect_primitive()
                .ok_or_else(|| LdapError::decode("referral URI"))
                .and_then(|uri| String::from_utf8(uri).map_err(|_| LdapError::DecodingUTF8))
        })
        .collect()
}

pub(crate) fn search_request<S: AsRef<str>>(
    base: &str,
    scope: Scope,
    filter: &str,
    attrs: &[S],
    opts: &SearchOptions,
) -> Result<Tag> {
    Ok(app_seq(
        op::SEARCH,
        vec![
            octet(base),
            Tag::Enumerated(Enumerated {
                inner: scope as i64,
                ..Default::default()
            }),
            Tag::Enumerated(Enumerated {
                inner: opts.deref as i64,
                ..Default::default()
            }),
            Tag::Integer(Integer {
                inner: opts.sizelimit as i64,
                ..Default::default()
            }),
            Tag::Integer(Integer {
                inner: opts.timelimit as i64,
                ..Default::default()
            }),
            Tag::Boolean(Boolean {
                inner: opts.typesonly,
                ..Default::default()
            }),
            parse_filter(filter)?,
            Tag::Sequence(Sequence {
                inner: attrs.iter().map(|a| octet(AsRef::<str>::as_ref(a))).collect(),
                ..Default::default()
            }),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lber::structure::PL;
    use lber::structures::ASNTag;
    use lber::write;

    fn os(bytes: &[u8]) -> StructureTag {
        StructureTag {
            class: TagClass::Universal,
            id: Types::OctetString as u64,
            payload: PL::P(bytes.to_vec()),
        }
    }

    fn seq(id: u64, inner: Vec<StructureTag>) -> StructureTag {
        StructureTag {
            class: TagClass::Universal,
            id,
            payload: PL::C(inner),
        }
    }

    fn entry_op(dn: &str, attrs: Vec<(&str, Vec<&[u8]>)>) -> StructureTag {
        let attrs = attrs
            .into_iter()
            .map(|(name, vals)| {
                seq(
                    Types::Sequence as u64,
                    vec![
                        os(name.as_bytes()),
                        seq(Types::Set as u64, vals.into_iter().map(os).collect()),
                    ],
                )
            })
            .collect();
        StructureTag {
            class: TagClass::Application,
            id: 4,
            payload: PL::C(vec![os(dn.as_bytes()), seq(Types::Sequence as u64, attrs)]),
        }
    }

    #[test]
    fn text_and_binary_attributes() {
        let op = entry_op(
            "uid=test,dc=example,dc=org",
            vec![
                ("cn", vec![&b"Test"[..], &b"Tester"[..]]),
                ("jpegPhoto", vec![&b"ok"[..], &[0xFF, 0xD8][..]]),
            ],
        );
        let entry = SearchEntry::decode(op).unwrap();
        assert_eq!(entry.dn, "uid=test,dc=example,dc=org");
        assert_eq!(entry.attrs["cn"], vec!["Test", "Tester"]);
        assert!(!entry.attrs.contains_key("jpegPhoto"));
        assert_eq!(
            entry.bin_attrs["jpegPhoto"],
            vec![b"ok".to_vec(), vec![0xFF, 0xD8]]
        );
    }

    #[test]
    fn malformed_entry() {
        let mut op = entry_op("cn=x", vec![]);
        op.id = 5;
        assert!(SearchEntry::decode(op).is_err());
        let op = StructureTag {
            class: TagClass::Application,
            id: 4,
            payload: PL::C(vec![os(b"cn=x")]),
        };
        assert!(matches!(SearchEntry::decode(op), Err(LdapError::Decode(_))));
    }

    #[test]
    fn request_encoding() {
        let req = search_request(
            "dc=ex",
            Scope::Subtree,
            "(cn=*)",
            &["cn"],
            &SearchOptions::new().sizelimit(10),
        )
        .unwrap();
        assert_eq!(
            write::encode(req.into_structure()),
            vec![
                0x63, 0x20, 0x04, 0x05, b'd', b'c', b'=', b'e', b'x', 0x0A, 0x01, 0x02, 0x0A,
                0x01, 0x00, 0x02, 0x01, 0x0A, 0x02, 0x01, 0x00, 0x01, 0x01, 0x00, 0x87, 0x02,
                b'c', b'n', 0x30, 0x04, 0x04, 0x02, b'c', b'n',
            ]
        );
        let no_attrs: [&str; 0] = [];
        assert!(matches!(
            search_request("", Scope::Base, "(cn=", &no_attrs, &SearchOptions::new()),
            Err(LdapError::FilterParsing)
        ));
    }

    #[test]
    fn referral_uris() {
        let refs = seq(3, vec![os(b"ldap://a/"), os(b"ldap://b/")]);
        assert_eq!(parse_refs(refs).unwrap(), vec!["ldap://a/", "ldap://b/"]);
        assert!(parse_refs(os(b"x")).is_err());
    }
}
