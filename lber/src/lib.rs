//! A subset of the ASN.1 Basic Encoding Rules, sufficient for LDAP.
//!
//! Values are built with the typed structs in [`structures`], lowered into the
//! generic [`structure::StructureTag`] tree, and serialized by [`write`]. The
//! reverse direction is [`parse`], which produces a `StructureTag` tree from raw
//! bytes using a streaming nom parser, so that a short buffer reports
//! `Incomplete` instead of an error.

pub mod common;
pub mod parse;
pub mod structure;
pub mod structures;
pub mod universal;
pub mod write;

pub use nom::IResult;
pub use parse::Parser;
