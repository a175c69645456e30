use crate::conn::{Connection, LdapConnSettings};
use crate::controls::IntoRawControlVec;
use crate::exop::{
    construct_exop, Exop, PasswordModify, PasswordModifyResp, StartTLS, WhoAmI, WhoAmIResp,
    STARTTLS_OID,
};
use crate::instrument::{Event, EventKind};
use crate::pdu::{AppTag, Payload};
use crate::protocol::{app_seq, context_octet, octet, op, MaybeControls};
use crate::result::{
    CompareResult, ExopResult, LdapError, LdapResult, Result, SearchResult, SASL_BIND_IN_PROGRESS,
};
use crate::search::{search_request, Scope, SearchOptions};
use crate::RequestId;

use lber::common::TagClass;
use lber::structures::{Boolean, Enumerated, Integer, Null, OctetString, Sequence, Set, Tag};

use url::Url;

/// Number of server challenges a SASL bind will answer.
pub const MAX_SASL_CHALLENGES: usize = 10;

/// Possible sub-operations for the Modify operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mod<S: AsRef<[u8]>> {
    /// Add an attribute, with at least one value.
    Add(S, Vec<S>),
    /// Delete the entire attribute, or the given values of an attribute.
    Delete(S, Vec<S>),
    /// Replace an existing attribute, setting its values to those given, or delete it
    /// if no values are given.
    Replace(S, Vec<S>),
    /// Increment the attribute by the given value.
    Increment(S, S),
}

fn value_set<S: AsRef<[u8]>>(vals: &[S]) -> Tag {
    Tag::Set(Set {
        inner: vals.iter().map(|v| octet(v.as_ref())).collect(),
        ..Default::default()
    })
}

/// Encode modifications as the elements of the `changes` sequence of a Modify request.
///
/// Every change is `SEQUENCE { ENUMERATED operation, SEQUENCE { type, SET OF value } }`,
/// with the values in the order given.
pub fn modify_ops<S: AsRef<[u8]>>(mods: &[Mod<S>]) -> Vec<Tag> {
    mods.iter()
        .map(|m| {
            let (num, attr, vals) = match m {
                Mod::Add(attr, vals) => (0, attr, value_set(vals)),
                Mod::Delete(attr, vals) => (1, attr, value_set(vals)),
                Mod::Replace(attr, vals) => (2, attr, value_set(vals)),
                Mod::Increment(attr, val) => (3, attr, value_set(std::slice::from_ref(val))),
            };
            Tag::Sequence(Sequence {
                inner: vec![
                    Tag::Enumerated(Enumerated {
                        inner: num,
                        ..Default::default()
                    }),
                    Tag::Sequence(Sequence {
                        inner: vec![octet(attr.as_ref()), vals],
                        ..Default::default()
                    }),
                ],
                ..Default::default()
            })
        })
        .collect()
}

fn sasl_bind_req(mech: &str, creds: Option<&[u8]>) -> Tag {
    let mut auth = vec![octet(mech)];
    if let Some(creds) = creds {
        auth.push(octet(creds));
    }
    app_seq(
        op::BIND,
        vec![
            Tag::Integer(Integer {
                inner: 3,
                ..Default::default()
            }),
            octet(""),
            Tag::Sequence(Sequence {
                id: 3,
                class: TagClass::Context,
                inner: auth,
            }),
        ],
    )
}

/// Handle for LDAP operations.
///
/// All operations allow attaching a series of request controls, which augment or modify
/// the operation. Controls are attached by calling [`with_controls()`](#method.with_controls)
/// on the handle, and using the result to call another modifier or the operation itself.
/// The less frequently used Search parameters are passed the same way, through
/// [`with_search_options()`](#method.with_search_options).
///
/// Every operation which gets a response returns its result as data, whatever the result
/// code; see [`LdapResult`](result/struct.LdapResult.html). Errors are reserved for
/// transport and decoding failures.
///
/// Calls block until the operation completes. There is no timeout once the connection is
/// established.
#[derive(Debug)]
pub struct Ldap {
    conn: Connection,
    controls: MaybeControls,
    search_opts: Option<SearchOptions>,
}

impl Ldap {
    /// Open a connection to the server at `url` with default settings.
    pub fn new(url: &str) -> Result<Ldap> {
        Ldap::with_settings(LdapConnSettings::new(), url)
    }

    /// Open a connection to the server at `url` with custom settings.
    pub fn with_settings(settings: LdapConnSettings, url: &str) -> Result<Ldap> {
        let url = Url::parse(url)?;
        Ldap::from_url_with_settings(settings, &url)
    }

    /// Open a connection to the server at an already parsed `url`.
    pub fn from_url(url: &Url) -> Result<Ldap> {
        Ldap::from_url_with_settings(LdapConnSettings::new(), url)
    }

    /// Open a connection to the server at an already parsed `url`, with custom settings.
    ///
    /// If StartTLS was requested in the settings for an __ldap__ URL, it is performed
    /// before returning, and a failing result is returned as an error.
    pub fn from_url_with_settings(settings: LdapConnSettings, url: &Url) -> Result<Ldap> {
        let starttls = settings.starttls() && url.scheme() == "ldap";
        let mut ldap = Ldap::from_connection(Connection::open(url, settings)?);
        if starttls {
            ldap.start_tls()?.success()?;
        }
        Ok(ldap)
    }

    /// Drive operations over an existing connection.
    pub fn from_connection(conn: Connection) -> Ldap {
        Ldap {
            conn,
            controls: None,
            search_opts: None,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Use the provided `SearchOptions` with the next Search operation. If the next
    /// operation isn't a Search, the options are silently discarded.
    pub fn with_search_options(&mut self, opts: SearchOptions) -> &mut Self {
        self.search_opts = Some(opts);
        self
    }

    /// Pass the provided request control(s) to the next LDAP operation.
    ///
    /// This method accepts either a control vector or a single `RawControl`.
    pub fn with_controls<V: IntoRawControlVec>(&mut self, ctrls: V) -> &mut Self {
        self.controls = Some(ctrls.into());
        self
    }

    /// Message id of the last operation, zero if there was none.
    pub fn last_id(&self) -> RequestId {
        self.conn.last_id()
    }

    pub fn has_tls(&self) -> bool {
        self.conn.has_tls()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    fn exchange(&mut self, req: Tag, expected: &'static [AppTag]) -> Result<(LdapResult, Payload)> {
        let controls = self.controls.take();
        self.search_opts = None;
        let (id, _) = self.conn.write(req, controls)?;
        let pdu = self.conn.queued_read(id)?.expect_tag(expected)?;
        Ok(pdu.into_result())
    }

    fn finish(&self, kind: EventKind, result: LdapResult) -> LdapResult {
        self.conn.emit(|| Event::Operation {
            kind,
            result: result.clone(),
        });
        result
    }

    /// Do a simple Bind with the provided DN (`bind_dn`) and password (`bind_pw`).
    pub fn simple_bind(&mut self, bind_dn: &str, bind_pw: &str) -> Result<LdapResult> {
        let req = app_seq(
            op::BIND,
            vec![
                Tag::Integer(Integer {
                    inner: 3,
                    ..Default::default()
                }),
                octet(bind_dn),
                context_octet(0, bind_pw),
            ],
        );
        let (result, _) = self.exchange(req, &[AppTag::BindResponse])?;
        self.conn.emit(|| Event::Bind {
            result: result.clone(),
        });
        Ok(result)
    }

    /// Do an anonymous simple Bind.
    pub fn anonymous_bind(&mut self) -> Result<LdapResult> {
        self.simple_bind("", "")
    }

    /// Do a SASL Bind with mechanism `mech`.
    ///
    /// `initial` is the client's initial response, if the mechanism has one. Every time the
    /// server answers with saslBindInProgress, `respond` is called with the server's
    /// challenge and its return value is sent in the next round. All rounds use the message
    /// id of the first one. After [`MAX_SASL_CHALLENGES`](constant.MAX_SASL_CHALLENGES.html)
    /// answered challenges, a further one fails with `SaslChallengeOverflow`.
    pub fn sasl_bind<F>(
        &mut self,
        mech: &str,
        initial: Option<&[u8]>,
        mut respond: F,
    ) -> Result<LdapResult>
    where
        F: FnMut(&[u8]) -> Result<Vec<u8>>,
    {
        let controls = self.controls.take();
        let id = self.conn.next_msgid()?;
        let mut creds = initial.map(<[u8]>::to_vec);
        let mut challenges = 0;
        loop {
            self.conn
                .write_with_id(id, sasl_bind_req(mech, creds.as_deref()), controls.clone())?;
            let pdu = self
                .conn
                .queued_read(id)?
                .expect_tag(&[AppTag::BindResponse])?;
            let (result, payload) = pdu.into_result();
            if result.rc != SASL_BIND_IN_PROGRESS {
                self.conn.emit(|| Event::Bind {
                    result: result.clone(),
                });
                return Ok(result);
            }
            challenges += 1;
            if challenges > MAX_SASL_CHALLENGES {
                return Err(LdapError::SaslChallengeOverflow);
            }
            let challenge = match payload {
                Payload::SaslCreds(challenge) => challenge,
                _ => vec![],
            };
            debug!("SASL {} challenge {} for message {}", mech, challenges, id);
            creds = Some(respond(&challenge)?);
        }
    }

    /// Do an SASL EXTERNAL bind on the connection. The identity of the client
    /// must have already been established by connection-specific methods, as
    /// is the case for Unix domain sockets or TLS client certificates. The bind
    /// is made with the hardcoded empty authzId value.
    pub fn sasl_external_bind(&mut self) -> Result<LdapResult> {
        self.sasl_bind("EXTERNAL", Some(b""), |_| Ok(vec![]))
    }

    /// Perform a Search with the given base location, scope, filter, and list of attributes
    /// to return. An empty list returns all user attributes.
    ///
    /// Entries are collected until SearchResultDone arrives. Continuation references are
    /// added to the referrals of the final result; intermediate responses are skipped.
    pub fn search<S: AsRef<str>>(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: Vec<S>,
    ) -> Result<SearchResult> {
        let opts = self.search_opts.take().unwrap_or_default();
        let req = search_request(base, scope, filter, &attrs, &opts)?;
        let controls = self.controls.take();
        let (id, _) = self.conn.write(req, controls)?;
        let mut entries = vec![];
        let mut refs = vec![];
        let mut result = loop {
            let pdu = self.conn.queued_read(id)?.expect_tag(&[
                AppTag::SearchResultEntry,
                AppTag::SearchResultReference,
                AppTag::IntermediateResponse,
                AppTag::SearchResultDone,
            ])?;
            if pdu.app_tag == AppTag::SearchResultDone {
                break pdu.into_result().0;
            }
            match pdu.payload {
                Payload::Entry(entry) => entries.push(entry),
                Payload::Reference(uris) => refs.extend(uris),
                _ => trace!("skipping intermediate response for message {}", id),
            }
        };
        result.refs.extend(refs);
        let unread = self.conn.pending(id);
        if unread > 0 {
            warn!("{} unread messages left for search {}", unread, id);
            self.conn.emit(|| Event::SearchMessagesUnread {
                message_id: id,
                unread,
            });
        }
        self.conn.emit(|| Event::Search {
            base: base.to_owned(),
            filter: filter.to_owned(),
            entries: entries.len(),
            result: result.clone(),
        });
        Ok(SearchResult(entries, result))
    }

    /// Read the root DSE with all user and operational attributes.
    pub fn search_root_dse(&mut self) -> Result<SearchResult> {
        self.search("", Scope::Base, "(objectClass=*)", vec!["*", "+"])
    }

    /// Add an entry named by `dn`, with the list of attributes and their values
    /// given in `attrs`. None of the value lists may be empty.
    pub fn add<S: AsRef<[u8]>>(&mut self, dn: &str, attrs: Vec<(S, Vec<S>)>) -> Result<LdapResult> {
        if attrs.iter().any(|(_, vals)| vals.is_empty()) {
            return Err(LdapError::AddNoValues);
        }
        let attrs = attrs
            .iter()
            .map(|(name, vals)| {
                Tag::Sequence(Sequence {
                    inner: vec![octet(name.as_ref()), value_set(vals)],
                    ..Default::default()
                })
            })
            .collect();
        let req = app_seq(
            op::ADD,
            vec![
                octet(dn),
                Tag::Sequence(Sequence {
                    inner: attrs,
                    ..Default::default()
                }),
            ],
        );
        let (result, _) = self.exchange(req, &[AppTag::AddResponse])?;
        Ok(self.finish(EventKind::Add, result))
    }

    /// Compare the value(s) of the attribute `attr` within an entry named by `dn` with the
    /// value `val`. See [`CompareResult`](result/struct.CompareResult.html) for the outcome.
    pub fn compare<B: AsRef<[u8]>>(
        &mut self,
        dn: &str,
        attr: &str,
        val: B,
    ) -> Result<CompareResult> {
        let req = app_seq(
            op::COMPARE,
            vec![
                octet(dn),
                Tag::Sequence(Sequence {
                    inner: vec![octet(attr), octet(val)],
                    ..Default::default()
                }),
            ],
        );
        let (result, _) = self.exchange(req, &[AppTag::CompareResponse])?;
        Ok(CompareResult(self.finish(EventKind::Compare, result)))
    }

    /// Delete an entry named by `dn`.
    pub fn delete(&mut self, dn: &str) -> Result<LdapResult> {
        let req = Tag::OctetString(OctetString {
            id: op::DELETE,
            class: TagClass::Application,
            inner: dn.as_bytes().to_vec(),
        });
        let (result, _) = self.exchange(req, &[AppTag::DeleteResponse])?;
        Ok(self.finish(EventKind::Delete, result))
    }

    /// Modify an entry named by `dn` by sequentially applying the modifications given by `mods`.
    /// See the [`Mod`](enum.Mod.html) documentation for the description of possible values.
    pub fn modify<S: AsRef<[u8]>>(&mut self, dn: &str, mods: Vec<Mod<S>>) -> Result<LdapResult> {
        if mods
            .iter()
            .any(|m| matches!(m, Mod::Add(_, vals) if vals.is_empty()))
        {
            return Err(LdapError::AddNoValues);
        }
        let req = app_seq(
            op::MODIFY,
            vec![
                octet(dn),
                Tag::Sequence(Sequence {
                    inner: modify_ops(&mods),
                    ..Default::default()
                }),
            ],
        );
        let (result, _) = self.exchange(req, &[AppTag::ModifyResponse])?;
        Ok(self.finish(EventKind::Modify, result))
    }

    /// Rename and/or move an entry named by `dn`. The new name is given by `rdn`. If
    /// `delete_old` is `true`, delete the previous value of the naming attribute from
    /// the entry. If the entry is to be moved elsewhere in the DIT, `new_sup` gives
    /// the new superior entry where the moved entry will be anchored.
    pub fn modifydn(
        &mut self,
        dn: &str,
        rdn: &str,
        delete_old: bool,
        new_sup: Option<&str>,
    ) -> Result<LdapResult> {
        let mut params = vec![
            octet(dn),
            octet(rdn),
            Tag::Boolean(Boolean {
                inner: delete_old,
                ..Default::default()
            }),
        ];
        if let Some(new_sup) = new_sup {
            params.push(context_octet(0, new_sup));
        }
        let req = app_seq(op::MODDN, params);
        let (result, _) = self.exchange(req, &[AppTag::ModifyDNResponse])?;
        Ok(self.finish(EventKind::Rename, result))
    }

    fn extended_exchange(&mut self, exop: Exop) -> Result<ExopResult> {
        let req = app_seq(op::EXTENDED, construct_exop(exop)?);
        let (result, payload) = self.exchange(req, &[AppTag::ExtendedResponse])?;
        let exop = match payload {
            Payload::Extended(exop) => exop,
            _ => Exop::default(),
        };
        Ok(ExopResult(exop, result))
    }

    /// Perform an Extended operation given by `exop`. Extended operations are defined in the
    /// [`exop`](exop/index.html) module.
    ///
    /// A StartTLS request is handled by [`start_tls()`](#method.start_tls).
    pub fn extended<E: Into<Exop>>(&mut self, exop: E) -> Result<ExopResult> {
        let exop = exop.into();
        if exop.name.as_deref() == Some(STARTTLS_OID) {
            return self.start_tls();
        }
        let ExopResult(exop, result) = self.extended_exchange(exop)?;
        Ok(ExopResult(exop, self.finish(EventKind::Extended, result)))
    }

    /// Ask the server to start TLS, and on success wrap the socket with the
    /// connection's TLS hook. All further traffic goes through the wrapped socket.
    ///
    /// Nothing is sent if TLS is already active, or if the hook can't wrap the
    /// socket.
    pub fn start_tls(&mut self) -> Result<ExopResult> {
        self.conn.can_upgrade_tls()?;
        let ExopResult(exop, result) = self.extended_exchange(StartTLS.into())?;
        if result.is_success() {
            self.conn.upgrade_tls()?;
        }
        Ok(ExopResult(exop, self.finish(EventKind::StartTls, result)))
    }

    /// Return the authorization identity of the connection, as reported by the
    /// Who Am I operation.
    pub fn whoami(&mut self) -> Result<String> {
        let (exop, _) = self.extended(WhoAmI)?.success()?;
        Ok(exop.parse::<WhoAmIResp>()?.authzid)
    }

    /// Change a password with the Password Modify operation. If the server
    /// generated a new password, it is returned.
    pub fn passwd(&mut self, req: PasswordModify) -> Result<Option<String>> {
        let (exop, _) = self.extended(req)?.success()?;
        match exop.val {
            Some(_) => Ok(Some(exop.parse::<PasswordModifyResp>()?.gen_pass)),
            None => Ok(None),
        }
    }

    /// Ask the server to abandon an operation identified by `msgid`. Anything
    /// still buffered for that id is discarded.
    pub fn abandon(&mut self, msgid: RequestId) -> Result<()> {
        let req = Tag::Integer(Integer {
            id: op::ABANDON,
            class: TagClass::Application,
            inner: msgid as i64,
        });
        let controls = self.controls.take();
        self.conn.write(req, controls)?;
        let dropped = self.conn.drop_queue(msgid);
        if dropped > 0 {
            debug!("abandon of {} discarded {} buffered messages", msgid, dropped);
        }
        Ok(())
    }

    /// Terminate the connection to the server. Buffered responses are discarded.
    pub fn unbind(&mut self) -> Result<()> {
        let req = Tag::Null(Null {
            id: op::UNBIND,
            class: TagClass::Application,
            inner: (),
        });
        let controls = self.controls.take();
        let sent = self.conn.write(req, controls);
        let closed = self.conn.close();
        sent?;
        closed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::conn::testing::*;
    use crate::controls::{ManageDsaIt, RawControl};
    use crate::instrument::EventBus;
    use crate::socket::{Socket, TlsUpgrade};

    use lber::structure::PL;
    use lber::structures::ASNTag;
    use lber::write;
    use rstest::rstest;

    fn ldap(script: Vec<crate::protocol::RawUnit>) -> (Ldap, Recorder) {
        let (socket, rec) = ScriptedSocket::new(script);
        (Ldap::from_connection(Connection::new(socket)), rec)
    }

    #[rstest]
    #[case::delete_all(
        Mod::Delete("mail", vec![]),
        &[
            0x30, 0x0D, 0x0A, 0x01, 0x01, 0x30, 0x08, 0x04, 0x04, b'm', b'a', b'i', b'l', 0x31,
            0x00,
        ][..]
    )]
    #[case::add(
        Mod::Add("mail", vec!["testuser@example.com"]),
        &[
            &[0x30, 0x23, 0x0A, 0x01, 0x00, 0x30, 0x1E, 0x04, 0x04][..],
            b"mail",
            &[0x31, 0x16, 0x04, 0x14][..],
            b"testuser@example.com",
        ].concat()[..]
    )]
    #[case::replace(
        Mod::Replace("mail", vec!["testuser@example.com"]),
        &[
            &[0x30, 0x23, 0x0A, 0x01, 0x02, 0x30, 0x1E, 0x04, 0x04][..],
            b"mail",
            &[0x31, 0x16, 0x04, 0x14][..],
            b"testuser@example.com",
        ].concat()[..]
    )]
    fn modify_op_encoding(#[case] m: Mod<&str>, #[case] expected: &[u8]) {
        let ops = modify_ops(&[m]);
        assert_eq!(ops.len(), 1);
        let tag = ops.into_iter().next().unwrap();
        assert_eq!(write::encode(tag.into_structure()), expected);
    }

    #[test]
    fn modify_values_keep_their_order() {
        let ops = modify_ops(&[Mod::Replace("cn", vec!["b", "a", "c"])]);
        let bytes = write::encode(ops[0].clone().into_structure());
        assert!(bytes.ends_with(&[
            0x31, 0x09, 0x04, 0x01, b'b', 0x04, 0x01, b'a', 0x04, 0x01, b'c'
        ]));
    }

    #[test]
    fn results_carry_the_request_id() {
        let (mut ldap, rec) = ldap(vec![
            response(1, AppTag::BindResponse, 0, ""),
            response(2, AppTag::AddResponse, 0, ""),
            response(3, AppTag::ModifyResponse, 0, ""),
            response(4, AppTag::DeleteResponse, 0, ""),
            response(5, AppTag::ModifyDNResponse, 0, ""),
            extended_response(6, 0, Some("1.3.6.1.4.1.4203.1.11.3"), Some(b"dn:cn=admin")),
        ]);
        let bind = ldap.simple_bind("cn=admin", "secret").unwrap();
        assert!(bind.is_success());
        assert_eq!(bind.id, 1);
        let add = ldap.add("cn=x", vec![("cn", vec!["x"])]).unwrap();
        assert_eq!((add.id, add.rc), (2, 0));
        let modify = ldap
            .modify("cn=x", vec![Mod::Delete("mail", vec![])])
            .unwrap();
        assert_eq!(modify.id, 3);
        assert_eq!(ldap.delete("cn=x").unwrap().id, 4);
        let rename = ldap.modifydn("cn=x", "cn=y", true, Some("ou=people")).unwrap();
        assert_eq!(rename.id, 5);
        let ExopResult(exop, res) = ldap.extended(WhoAmI).unwrap();
        assert_eq!(res.id, 6);
        assert_eq!(exop.parse::<WhoAmIResp>().unwrap().authzid, "dn:cn=admin");
        assert_eq!(rec.written_ids(), vec![1, 2, 3, 4, 5, 6]);
        assert!(rec.written_op(3).is(TagClass::Application, op::DELETE));
        assert_eq!(rec.written_op(3).payload, PL::P(b"cn=x".to_vec()));
    }

    #[test]
    fn failure_keeps_diagnostic_text() {
        let text = "no user modification allowed: 0000209A";
        let (mut ldap, _) = ldap(vec![response(1, AppTag::ModifyResponse, 53, text)]);
        let res = ldap
            .modify("cn=x", vec![Mod::Replace("mail", vec!["a@b"])])
            .unwrap();
        assert!(!res.is_success());
        assert_eq!(res.rc, 53);
        assert_eq!(res.message(), "unwillingToPerform");
        assert_eq!(res.error_message(), text);
    }

    #[test]
    fn search_collects_entries() {
        let (mut ldap, rec) = ldap(vec![
            entry(1, "uid=a,dc=ex", &[("cn", &["A"])]),
            reference(1, &["ldap://other/dc=ex"]),
            response(1, AppTag::SearchResultDone, 0, ""),
        ]);
        let SearchResult(entries, res) = ldap
            .search("dc=ex", Scope::Subtree, "(uid=a)", vec!["cn"])
            .unwrap();
        assert!(res.is_success());
        assert_eq!(res.id, 1);
        assert_eq!(res.refs, vec!["ldap://other/dc=ex"]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dn, "uid=a,dc=ex");
        assert_eq!(entries[0].attrs["cn"], vec!["A"]);
        assert_eq!(ldap.connection().pending(1), 0);
        assert_eq!(rec.reads(), 3);
    }

    #[test]
    fn search_leftovers_are_reported() {
        let bus = Arc::new(EventBus::new());
        let mut unread = bus.subscribe(EventKind::SearchMessagesUnread);
        let mut searches = bus.subscribe(EventKind::Search);
        let (socket, rec) = ScriptedSocket::new(vec![]);
        let mut ldap = Ldap::from_connection(Connection::new(socket).with_instrument(bus));
        for unit in [
            response(1, AppTag::SearchResultDone, 0, ""),
            entry(1, "cn=late", &[]),
        ] {
            ldap.connection_mut()
                .enqueue(crate::pdu::Pdu::decode(unit).unwrap());
        }
        let SearchResult(entries, _) = ldap
            .search("", Scope::Base, "(objectClass=*)", Vec::<&str>::new())
            .unwrap();
        assert!(entries.is_empty());
        assert_eq!(rec.reads(), 0);
        assert_eq!(ldap.connection().pending(1), 1);
        match unread.try_recv().unwrap() {
            Event::SearchMessagesUnread { message_id, unread } => {
                assert_eq!((message_id, unread), (1, 1))
            }
            other => panic!("unexpected {:?}", other),
        }
        match searches.try_recv().unwrap() {
            Event::Search { filter, entries, .. } => {
                assert_eq!(filter, "(objectClass=*)");
                assert_eq!(entries, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_filter_sends_nothing() {
        let (mut ldap, rec) = ldap(vec![]);
        assert!(matches!(
            ldap.search("", Scope::Base, "(cn=", vec!["cn"]),
            Err(LdapError::FilterParsing)
        ));
        assert!(rec.frames().is_empty());
    }

    #[test]
    fn sasl_rounds_reuse_the_message_id() {
        let (mut ldap, rec) = ldap(vec![
            bind_in_progress(1, b"c1"),
            bind_in_progress(1, b"c2"),
            response(1, AppTag::BindResponse, 0, ""),
        ]);
        let mut seen = vec![];
        let res = ldap
            .sasl_bind("DIGEST-MD5", None, |challenge| {
                seen.push(challenge.to_vec());
                Ok(b"answer".to_vec())
            })
            .unwrap();
        assert!(res.is_success());
        assert_eq!(res.id, 1);
        assert_eq!(seen, vec![b"c1".to_vec(), b"c2".to_vec()]);
        assert_eq!(rec.written_ids(), vec![1, 1, 1]);
        assert_eq!(ldap.last_id(), 1);
    }

    #[test]
    fn sasl_challenges_are_capped() {
        let script = (0..=MAX_SASL_CHALLENGES)
            .map(|_| bind_in_progress(1, b"again"))
            .collect();
        let (mut ldap, rec) = ldap(script);
        let mut calls = 0;
        let res = ldap.sasl_bind("X-LOOP", Some(b"hi"), |_| {
            calls += 1;
            Ok(vec![])
        });
        assert!(matches!(res, Err(LdapError::SaslChallengeOverflow)));
        assert_eq!(calls, MAX_SASL_CHALLENGES);
        assert_eq!(rec.frames().len(), MAX_SASL_CHALLENGES + 1);
    }

    #[test]
    fn add_requires_values() {
        let (mut ldap, rec) = ldap(vec![]);
        assert!(matches!(
            ldap.add("cn=x", vec![("cn", vec![])]),
            Err(LdapError::AddNoValues)
        ));
        assert!(matches!(
            ldap.modify("cn=x", vec![Mod::Add("cn", vec![])]),
            Err(LdapError::AddNoValues)
        ));
        assert!(rec.frames().is_empty());
    }

    #[test]
    fn unexpected_response_kind() {
        let (mut ldap, _) = ldap(vec![response(1, AppTag::AddResponse, 0, "")]);
        match ldap.delete("cn=x") {
            Err(LdapError::UnexpectedResponse { id, got, .. }) => {
                assert_eq!((id, got), (1, AppTag::AddResponse))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn compare_outcome() {
        let (mut ldap, _) = ldap(vec![response(1, AppTag::CompareResponse, 6, "")]);
        assert!(ldap.compare("cn=x", "cn", "x").unwrap().equal().unwrap());
    }

    #[test]
    fn controls_go_with_the_next_operation_only() {
        let (mut ldap, rec) = ldap(vec![
            response(1, AppTag::DeleteResponse, 0, ""),
            response(2, AppTag::DeleteResponse, 0, ""),
        ]);
        ldap.with_controls(RawControl::from(ManageDsaIt))
            .delete("cn=x")
            .unwrap();
        ldap.delete("cn=y").unwrap();
        let frames = rec.frames();
        let with = frames[0].len();
        let without = frames[1].len();
        assert_eq!(with - without, 2 + 2 + 2 + crate::controls::MANAGE_DSA_IT_OID.len());
    }

    struct SwapSocket(Mutex<Option<Box<ScriptedSocket>>>);

    impl TlsUpgrade for SwapSocket {
        fn wrap(&self, old: Box<dyn Socket>) -> Result<Box<dyn Socket>> {
            drop(old);
            let new: Box<dyn Socket> =
                self.0.lock().unwrap().take().ok_or(LdapError::NoTlsUpgrade)?;
            Ok(new)
        }
    }

    #[test]
    fn start_tls_replaces_the_socket() {
        let bus = Arc::new(EventBus::new());
        let mut events = bus.subscribe(EventKind::StartTls);
        let (plain, plain_rec) = ScriptedSocket::new(vec![extended_response(
            1,
            0,
            Some(STARTTLS_OID),
            None,
        )]);
        let (secure, secure_rec) =
            ScriptedSocket::new(vec![response(2, AppTag::BindResponse, 0, "")]);
        let conn = Connection::new(plain)
            .with_instrument(bus)
            .with_tls_upgrade(Arc::new(SwapSocket(Mutex::new(Some(secure)))));
        let mut ldap = Ldap::from_connection(conn);
        let ExopResult(exop, res) = ldap.start_tls().unwrap();
        assert_eq!(res.id, 1);
        assert_eq!(exop.name.as_deref(), Some(STARTTLS_OID));
        assert!(ldap.has_tls());
        assert_eq!(ldap.simple_bind("cn=admin", "pw").unwrap().id, 2);
        assert_eq!(plain_rec.written_ids(), vec![1]);
        assert_eq!(secure_rec.written_ids(), vec![2]);
        assert_eq!(events.try_recv().unwrap().result().unwrap().id, 1);
    }

    fn tls_ldap(
        script: Vec<crate::protocol::RawUnit>,
        upgrade: Arc<dyn TlsUpgrade>,
    ) -> (Ldap, Recorder) {
        let (socket, rec) = ScriptedSocket::new(script);
        let conn = Connection::new(socket).with_tls_upgrade(upgrade);
        (Ldap::from_connection(conn), rec)
    }

    #[test]
    fn extended_start_tls_replaces_the_socket() {
        let (secure, secure_rec) =
            ScriptedSocket::new(vec![response(2, AppTag::DeleteResponse, 0, "")]);
        let (mut ldap, plain_rec) = tls_ldap(
            vec![extended_response(1, 0, Some(STARTTLS_OID), None)],
            Arc::new(SwapSocket(Mutex::new(Some(secure)))),
        );
        let ExopResult(_, res) = ldap.extended(StartTLS).unwrap();
        assert!(res.is_success());
        assert!(ldap.has_tls());
        ldap.delete("cn=x").unwrap().success().unwrap();
        assert_eq!(plain_rec.written_ids(), vec![1]);
        assert_eq!(secure_rec.written_ids(), vec![2]);
    }

    #[test]
    fn second_start_tls_sends_nothing() {
        let (secure, secure_rec) = ScriptedSocket::new(vec![]);
        let (mut ldap, _) = tls_ldap(
            vec![extended_response(1, 0, Some(STARTTLS_OID), None)],
            Arc::new(SwapSocket(Mutex::new(Some(secure)))),
        );
        ldap.start_tls().unwrap().success().unwrap();
        assert!(matches!(ldap.start_tls(), Err(LdapError::TlsActive)));
        assert!(matches!(ldap.extended(StartTLS), Err(LdapError::TlsActive)));
        assert!(ldap.has_tls());
        assert!(!ldap.is_closed());
        assert!(secure_rec.written_ids().is_empty());
    }

    #[test]
    fn refused_start_tls_keeps_the_socket() {
        let (mut ldap, _) = tls_ldap(
            vec![extended_response(1, 52, None, None)],
            Arc::new(SwapSocket(Mutex::new(None))),
        );
        let ExopResult(_, res) = ldap.start_tls().unwrap();
        assert_eq!(res.rc, 52);
        assert!(!ldap.has_tls());
        assert!(!ldap.is_closed());
    }

    #[test]
    fn unnamed_extended_request_sends_nothing() {
        let (mut ldap, rec) = ldap(vec![response(1, AppTag::DeleteResponse, 0, "")]);
        assert!(matches!(
            ldap.extended(Exop::default()),
            Err(LdapError::ExopNoName)
        ));
        assert!(rec.frames().is_empty());
        assert_eq!(ldap.delete("cn=x").unwrap().id, 1);
    }

    #[test]
    fn start_tls_without_a_hook_sends_nothing() {
        let (mut ldap, rec) = ldap(vec![]);
        assert!(matches!(ldap.start_tls(), Err(LdapError::NoTlsUpgrade)));
        assert!(rec.frames().is_empty());
        assert!(!ldap.is_closed());
    }

    struct PlainOnly;

    impl TlsUpgrade for PlainOnly {
        fn check(&self, _socket: &dyn Socket) -> Result<()> {
            Err(LdapError::MismatchedStreamType)
        }

        fn wrap(&self, _socket: Box<dyn Socket>) -> Result<Box<dyn Socket>> {
            Err(LdapError::MismatchedStreamType)
        }
    }

    #[test]
    fn unwrappable_socket_skips_the_request() {
        let (mut ldap, rec) = tls_ldap(
            vec![response(1, AppTag::DeleteResponse, 0, "")],
            Arc::new(PlainOnly),
        );
        assert!(matches!(
            ldap.extended(StartTLS),
            Err(LdapError::MismatchedStreamType)
        ));
        assert!(rec.frames().is_empty());
        assert!(!ldap.is_closed());
        assert_eq!(ldap.delete("cn=x").unwrap().id, 1);
    }

    struct FailedHandshake;

    impl TlsUpgrade for FailedHandshake {
        fn wrap(&self, _socket: Box<dyn Socket>) -> Result<Box<dyn Socket>> {
            Err(LdapError::other(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "handshake rejected",
            )))
        }
    }

    #[test]
    fn failed_handshake_closes_the_connection() {
        let (mut ldap, rec) = tls_ldap(
            vec![extended_response(1, 0, Some(STARTTLS_OID), None)],
            Arc::new(FailedHandshake),
        );
        match ldap.start_tls() {
            Err(LdapError::Other { source }) => {
                assert_eq!(source.to_string(), "handshake rejected")
            }
            other => panic!("unexpected outcome: {:?}", other.map(|r| r.1.rc)),
        }
        assert_eq!(rec.written_ids(), vec![1]);
        assert!(ldap.is_closed());
        assert!(!ldap.has_tls());
        assert!(matches!(
            ldap.delete("cn=x"),
            Err(LdapError::ConnectionClosed)
        ));
    }

    #[test]
    fn abandon_and_unbind() {
        let (mut ldap, rec) = ldap(vec![]);
        ldap.connection_mut().enqueue(
            crate::pdu::Pdu::decode(entry(7, "cn=x", &[])).unwrap(),
        );
        ldap.abandon(7).unwrap();
        assert_eq!(ldap.connection().pending(7), 0);
        assert!(rec.written_op(0).is(TagClass::Application, op::ABANDON));
        ldap.unbind().unwrap();
        assert!(ldap.is_closed());
        assert_eq!(rec.written_ids(), vec![1, 2]);
        assert!(matches!(
            ldap.delete("cn=x"),
            Err(LdapError::ConnectionClosed)
        ));
    }

    #[test]
    fn password_modify_returns_generated_password() {
        let (mut ldap, _) = ldap(vec![extended_response(
            1,
            0,
            None,
            Some(&[0x30, 0x04, 0x80, 0x02, b'p', b'w']),
        )]);
        let generated = ldap
            .passwd(PasswordModify {
                user_id: Some("uid=a"),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(generated.as_deref(), Some("pw"));
    }

    #[test]
    fn bind_events() {
        let bus = Arc::new(EventBus::new());
        let mut binds = bus.subscribe(EventKind::Bind);
        let (socket, _) = ScriptedSocket::new(vec![response(1, AppTag::BindResponse, 49, "bad")]);
        let mut ldap = Ldap::from_connection(Connection::new(socket).with_instrument(bus));
        assert_eq!(ldap.anonymous_bind().unwrap().rc, 49);
        let event = binds.try_recv().unwrap();
        assert_eq!(event.result().unwrap().text, "bad");
    }
}
