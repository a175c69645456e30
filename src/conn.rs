use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use crate::instrument::{step, Event, Instrument};
use crate::pdu::Pdu;
use crate::protocol::{LdapCodec, MaybeControls};
use crate::result::{LdapError, Result};
#[cfg(feature = "tls-native")]
use crate::socket::NativeTlsUpgrade;
use crate::socket::{ConnType, Framed, Socket, StdStream, TlsUpgrade};
use crate::RequestId;

use lber::structures::Tag;

use bytes::BytesMut;
#[cfg(feature = "tls-native")]
use native_tls::TlsConnector;
#[cfg(unix)]
use percent_encoding::percent_decode;
use tokio_util::codec::Encoder;
use url::Url;

/// Additional settings for an LDAP connection.
///
/// The structure is opaque for better extensibility. An instance with
/// default values is constructed by [`new()`](#method.new), and all
/// available settings can be replaced through a builder-like interface,
/// by calling the appropriate functions.
#[derive(Clone, Default)]
pub struct LdapConnSettings {
    conn_timeout: Option<Duration>,
    #[cfg(feature = "tls-native")]
    connector: Option<TlsConnector>,
    #[cfg(feature = "tls-native")]
    starttls: bool,
    #[cfg(feature = "tls-native")]
    no_tls_verify: bool,
    std_stream: Option<StdStream>,
    instrument: Option<Arc<dyn Instrument>>,
    tls_upgrade: Option<Arc<dyn TlsUpgrade>>,
}

impl LdapConnSettings {
    /// Create an instance of the structure with default settings.
    pub fn new() -> LdapConnSettings {
        LdapConnSettings::default()
    }

    /// Set the connection timeout. It applies only to establishing the TCP
    /// connection; once connected, reads block without a limit. Defaults to
    /// `None`, meaning an infinite timeout.
    pub fn set_conn_timeout(mut self, timeout: Duration) -> Self {
        self.conn_timeout = Some(timeout);
        self
    }

    #[cfg(feature = "tls-native")]
    /// Set a custom TLS connector, which enables setting various options
    /// when establishing a secure connection. The default of `None` will
    /// use a connector with default settings.
    pub fn set_connector(mut self, connector: TlsConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    #[cfg(feature = "tls-native")]
    /// If `true`, use the StartTLS extended operation to establish a
    /// secure connection. Defaults to `false`.
    pub fn set_starttls(mut self, starttls: bool) -> Self {
        self.starttls = starttls;
        self
    }

    #[cfg(feature = "tls-native")]
    /// The `starttls` settings indicates whether the StartTLS extended
    /// operation will be used to establish a secure connection.
    pub fn starttls(&self) -> bool {
        self.starttls
    }

    #[cfg(not(feature = "tls-native"))]
    /// Always `false` when no TLS support is compiled in.
    pub fn starttls(&self) -> bool {
        false
    }

    #[cfg(feature = "tls-native")]
    /// If `true`, try to establish a TLS connection without certificate
    /// verification. Defaults to `false`.
    pub fn set_no_tls_verify(mut self, no_tls_verify: bool) -> Self {
        self.no_tls_verify = no_tls_verify;
        self
    }

    /// Create an LDAP connection using a previously opened standard library
    /// stream (TCP or Unix, if applicable.) The full URL must still be provided
    /// in order to select connection details, such as TLS establishment or
    /// Unix domain socket operation.
    ///
    /// If the provided stream doesn't match the URL (e.g., a Unix stream is
    /// given with the __ldap__ or __ldaps__ URL), an error will be returned.
    pub fn set_std_stream(mut self, stream: StdStream) -> Self {
        self.std_stream = Some(stream);
        self
    }

    /// Attach an observer for connection and operation events.
    pub fn set_instrument(mut self, instrument: Arc<dyn Instrument>) -> Self {
        self.instrument = Some(instrument);
        self
    }

    /// Use a custom hook for wrapping the socket after StartTLS, instead of
    /// the built-in `native-tls` one.
    pub fn set_tls_upgrade(mut self, upgrade: Arc<dyn TlsUpgrade>) -> Self {
        self.tls_upgrade = Some(upgrade);
        self
    }
}

/// Connection to an LDAP server: socket, message ids and response queues.
///
/// Every request gets the next message id; ids start at 1 and are never
/// reused. Responses are read one unit at a time. A unit for an id other than
/// the one being waited for is appended to that id's queue, and handed out by
/// a later [`queued_read()`](#method.queued_read) for it without reading the
/// socket. All calls block; a connection serves a single caller, which may
/// have several requests outstanding.
pub struct Connection {
    socket: Option<Box<dyn Socket>>,
    next_id: RequestId,
    queues: HashMap<RequestId, VecDeque<Pdu>>,
    codec: LdapCodec,
    instrument: Option<Arc<dyn Instrument>>,
    tls_upgrade: Option<Arc<dyn TlsUpgrade>>,
    has_tls: bool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.socket.is_none())
            .field("next_id", &self.next_id)
            .field("queued", &self.queues.len())
            .field("has_tls", &self.has_tls)
            .finish()
    }
}

impl Connection {
    /// Create a connection over an already established socket.
    pub fn new(socket: Box<dyn Socket>) -> Self {
        Connection {
            socket: Some(socket),
            next_id: 1,
            queues: HashMap::new(),
            codec: LdapCodec,
            instrument: None,
            tls_upgrade: None,
            has_tls: false,
        }
    }

    pub fn with_instrument(mut self, instrument: Arc<dyn Instrument>) -> Self {
        self.instrument = Some(instrument);
        self
    }

    pub fn with_tls_upgrade(mut self, upgrade: Arc<dyn TlsUpgrade>) -> Self {
        self.tls_upgrade = Some(upgrade);
        self
    }

    /// Open a connection to the server named by an LDAP URL.
    ///
    /// The __ldap__ scheme uses port 389 by default, __ldaps__ 636 with TLS
    /// established before any LDAP traffic. With __ldapi__, the percent-encoded
    /// host part is the path of a Unix domain socket.
    pub fn open(url: &Url, mut settings: LdapConnSettings) -> Result<Self> {
        if url.scheme() == "ldapi" {
            return Connection::open_unix(url, settings);
        }
        let port = match url.scheme() {
            "ldap" => 389,
            #[cfg(feature = "tls-native")]
            "ldaps" => 636,
            s => return Err(LdapError::UnknownScheme(s.to_owned())),
        };
        let port = url.port().unwrap_or(port);
        let hostname = match url.host_str() {
            Some("") | None => "localhost",
            Some(h) => h,
        };
        let stream = match settings.std_stream.take() {
            None => connect_tcp(hostname, port, settings.conn_timeout)?,
            Some(StdStream::Tcp(stream)) => stream,
            Some(_) => return Err(LdapError::MismatchedStreamType),
        };
        #[cfg(feature = "tls-native")]
        let upgrade: Option<Arc<dyn TlsUpgrade>> = match settings.tls_upgrade.take() {
            Some(upgrade) => Some(upgrade),
            None => Some(Arc::new(NativeTlsUpgrade::new(
                create_connector(&settings)?,
                hostname,
            ))),
        };
        #[cfg(not(feature = "tls-native"))]
        let upgrade = settings.tls_upgrade.take();
        let mut conn = Connection::new(Box::new(Framed::new(ConnType::Tcp(stream))));
        conn.tls_upgrade = upgrade;
        conn.instrument = settings.instrument.take();
        if url.scheme() == "ldaps" {
            conn.upgrade_tls()?;
        }
        Ok(conn)
    }

    #[cfg(unix)]
    fn open_unix(url: &Url, mut settings: LdapConnSettings) -> Result<Self> {
        let stream = match settings.std_stream.take() {
            None => {
                let path = url.host_str().unwrap_or("");
                if path.is_empty() {
                    return Err(LdapError::EmptyUnixPath);
                }
                if path.contains(':') || url.port().is_some() {
                    return Err(LdapError::PortInUnixPath);
                }
                let path = percent_decode(path.as_bytes()).decode_utf8_lossy();
                debug!("connecting to {}", path);
                UnixStream::connect(path.as_ref()).map_err(LdapError::connect)?
            }
            Some(StdStream::Unix(stream)) => stream,
            Some(_) => return Err(LdapError::MismatchedStreamType),
        };
        let mut conn = Connection::new(Box::new(Framed::new(ConnType::Unix(stream))));
        conn.instrument = settings.instrument.take();
        conn.tls_upgrade = settings.tls_upgrade.take();
        Ok(conn)
    }

    #[cfg(not(unix))]
    fn open_unix(_url: &Url, _settings: LdapConnSettings) -> Result<Self> {
        Err(LdapError::UnknownScheme("ldapi".to_owned()))
    }

    pub(crate) fn emit(&self, event: impl FnOnce() -> Event) {
        if let Some(ref instrument) = self.instrument {
            instrument.instrument(event());
        }
    }

    pub(crate) fn next_msgid(&mut self) -> Result<RequestId> {
        if self.socket.is_none() {
            return Err(LdapError::ConnectionClosed);
        }
        let id = self.next_id;
        if id == RequestId::MAX {
            return Err(LdapError::MessageIdExhausted);
        }
        self.next_id += 1;
        debug!("allocated message id {}", id);
        Ok(id)
    }

    /// Id of the most recent request, or 0 if nothing was sent yet.
    pub fn last_id(&self) -> RequestId {
        self.next_id - 1
    }

    /// Send a request under the next message id, returning the id and the
    /// length of the encoded frame.
    pub fn write(&mut self, req: Tag, controls: MaybeControls) -> Result<(RequestId, usize)> {
        let id = self.next_msgid()?;
        let len = self.write_with_id(id, req, controls)?;
        Ok((id, len))
    }

    /// Send a request under an id allocated earlier, as SASL bind rounds do.
    pub(crate) fn write_with_id(
        &mut self,
        id: RequestId,
        req: Tag,
        controls: MaybeControls,
    ) -> Result<usize> {
        let mut buf = BytesMut::new();
        self.codec.encode((id, req, controls), &mut buf)?;
        let content_length = buf.len();
        let socket = self.socket.as_mut().ok_or(LdapError::ConnectionClosed)?;
        let sent = socket.send(&buf);
        self.emit(|| Event::Write {
            message_id: id,
            content_length,
            result: step(&sent),
        });
        sent?;
        trace!("wrote message {}, {} bytes", id, content_length);
        Ok(content_length)
    }

    /// Return the next response for `id`, from its queue if anything is
    /// buffered, otherwise by reading the socket until one arrives.
    pub fn queued_read(&mut self, id: RequestId) -> Result<Pdu> {
        if let Some(pdu) = self.pop_queued(id) {
            trace!("message {} served from queue", id);
            return Ok(pdu);
        }
        loop {
            let socket = self.socket.as_mut().ok_or(LdapError::ConnectionClosed)?;
            let read = socket.read_unit();
            self.emit(|| Event::Read {
                unit: read.as_ref().ok().cloned(),
                result: step(&read),
            });
            let unit = read?;
            let message_id = unit.id;
            let decoded = Pdu::decode(unit);
            self.emit(|| Event::ParsePdu {
                message_id,
                app_tag: decoded.as_ref().ok().map(|pdu| pdu.app_tag),
                pdu: decoded.as_ref().ok().cloned(),
                result: step(&decoded),
            });
            let pdu = decoded?;
            if pdu.msgid == id {
                return Ok(pdu);
            }
            if pdu.msgid == 0 {
                warn!(
                    "unsolicited notification: rc={} text=\"{}\"",
                    pdu.rc, pdu.text
                );
            }
            debug!(
                "buffering {} for message {} while waiting for {}",
                pdu.app_tag, pdu.msgid, id
            );
            self.enqueue(pdu);
        }
    }

    fn pop_queued(&mut self, id: RequestId) -> Option<Pdu> {
        let queue = self.queues.get_mut(&id)?;
        let pdu = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(&id);
        }
        pdu
    }

    /// Append a PDU to the queue of its message id.
    pub fn enqueue(&mut self, pdu: Pdu) {
        self.queues.entry(pdu.msgid).or_default().push_back(pdu);
    }

    /// Number of buffered PDUs for `id`.
    pub fn pending(&self, id: RequestId) -> usize {
        self.queues.get(&id).map_or(0, VecDeque::len)
    }

    pub(crate) fn drop_queue(&mut self, id: RequestId) -> usize {
        self.queues.remove(&id).map_or(0, |q| q.len())
    }

    /// Verify that the socket can be wrapped with TLS, leaving it untouched.
    pub fn can_upgrade_tls(&self) -> Result<()> {
        if self.has_tls {
            return Err(LdapError::TlsActive);
        }
        let upgrade = self.tls_upgrade.as_ref().ok_or(LdapError::NoTlsUpgrade)?;
        let socket = self.socket.as_deref().ok_or(LdapError::ConnectionClosed)?;
        upgrade.check(socket)
    }

    /// Replace the socket with its TLS-wrapped version.
    ///
    /// Nothing changes if the socket can't be wrapped. If the wrapping itself
    /// fails, the connection is closed.
    pub fn upgrade_tls(&mut self) -> Result<()> {
        self.can_upgrade_tls()?;
        let upgrade = self.tls_upgrade.clone().ok_or(LdapError::NoTlsUpgrade)?;
        let socket = self.socket.take().ok_or(LdapError::ConnectionClosed)?;
        match upgrade.wrap(socket) {
            Ok(socket) => {
                self.socket = Some(socket);
                self.has_tls = true;
                Ok(())
            }
            Err(e) => {
                warn!("TLS upgrade failed, closing the connection: {}", e);
                self.queues.clear();
                Err(e)
            }
        }
    }

    pub fn has_tls(&self) -> bool {
        self.has_tls
    }

    /// Shut the socket down and discard every buffered PDU.
    pub fn close(&mut self) -> Result<()> {
        let dropped: usize = self.queues.drain().map(|(_, q)| q.len()).sum();
        if dropped > 0 {
            debug!("discarding {} buffered messages", dropped);
        }
        match self.socket.take() {
            Some(mut socket) => socket.shutdown(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    debug!("connecting to {}:{}", host, port);
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| LdapError::Connect { source })?;
    let mut last_err = None;
    for addr in addrs {
        let stream = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match stream {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(LdapError::connect(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
    })))
}

#[cfg(feature = "tls-native")]
fn create_connector(settings: &LdapConnSettings) -> Result<TlsConnector> {
    if let Some(ref connector) = settings.connector {
        return Ok(connector.clone());
    }
    let mut builder = TlsConnector::builder();
    if settings.no_tls_verify {
        builder.danger_accept_invalid_certs(true);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory socket and response builders.

    use std::any::Any;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::pdu::AppTag;
    use crate::protocol::{LdapCodec, RawUnit};
    use crate::result::Result;
    use crate::socket::Socket;
    use crate::RequestId;

    use bytes::BytesMut;
    use lber::common::TagClass;
    use lber::structure::{StructureTag, PL};
    use lber::structures::{ASNTag, Enumerated};
    use tokio_util::codec::Decoder;

    /// Socket which yields a fixed sequence of units and records what it is sent.
    pub(crate) struct ScriptedSocket {
        script: VecDeque<RawUnit>,
        rec: Recorder,
    }

    /// Shared view of a `ScriptedSocket` after it has been moved into a connection.
    #[derive(Clone, Default)]
    pub(crate) struct Recorder {
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        reads: Arc<AtomicUsize>,
    }

    impl ScriptedSocket {
        pub(crate) fn new(script: Vec<RawUnit>) -> (Box<ScriptedSocket>, Recorder) {
            let rec = Recorder::default();
            let socket = ScriptedSocket {
                script: script.into(),
                rec: rec.clone(),
            };
            (Box::new(socket), rec)
        }
    }

    impl Recorder {
        pub(crate) fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        pub(crate) fn frames(&self) -> Vec<Vec<u8>> {
            self.written.lock().unwrap().clone()
        }

        /// Message ids of the written frames, in order.
        pub(crate) fn written_ids(&self) -> Vec<RequestId> {
            self.frames()
                .into_iter()
                .map(|frame| {
                    let mut buf = BytesMut::from(&frame[..]);
                    LdapCodec.decode(&mut buf).unwrap().unwrap().id
                })
                .collect()
        }

        /// Protocol op of the `n`th written frame.
        pub(crate) fn written_op(&self, n: usize) -> StructureTag {
            let mut buf = BytesMut::from(&self.frames()[n][..]);
            LdapCodec.decode(&mut buf).unwrap().unwrap().op
        }
    }

    impl Socket for ScriptedSocket {
        fn send(&mut self, frame: &[u8]) -> Result<()> {
            self.rec.written.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        fn read_unit(&mut self) -> Result<RawUnit> {
            self.rec.reads.fetch_add(1, Ordering::SeqCst);
            self.script
                .pop_front()
                .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof).into())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
            self
        }
    }

    pub(crate) fn octets(bytes: &[u8]) -> StructureTag {
        StructureTag {
            class: TagClass::Universal,
            id: 4,
            payload: PL::P(bytes.to_vec()),
        }
    }

    fn constructed(class: TagClass, id: u64, inner: Vec<StructureTag>) -> StructureTag {
        StructureTag {
            class,
            id,
            payload: PL::C(inner),
        }
    }

    fn ldap_result(rc: u32, text: &str) -> Vec<StructureTag> {
        vec![
            Enumerated {
                inner: rc as i64,
                ..Default::default()
            }
            .into_structure(),
            octets(b""),
            octets(text.as_bytes()),
        ]
    }

    fn unit(id: RequestId, op: StructureTag) -> RawUnit {
        RawUnit {
            id,
            op,
            ctrls: vec![],
        }
    }

    /// Response carrying just an LDAPResult.
    pub(crate) fn response(id: RequestId, tag: AppTag, rc: u32, text: &str) -> RawUnit {
        unit(
            id,
            constructed(TagClass::Application, tag as u64, ldap_result(rc, text)),
        )
    }

    pub(crate) fn entry(id: RequestId, dn: &str, attrs: &[(&str, &[&str])]) -> RawUnit {
        let attrs = attrs
            .iter()
            .map(|(name, vals)| {
                constructed(
                    TagClass::Universal,
                    16,
                    vec![
                        octets(name.as_bytes()),
                        constructed(
                            TagClass::Universal,
                            17,
                            vals.iter().map(|v| octets(v.as_bytes())).collect(),
                        ),
                    ],
                )
            })
            .collect();
        unit(
            id,
            constructed(
                TagClass::Application,
                AppTag::SearchResultEntry as u64,
                vec![octets(dn.as_bytes()), constructed(TagClass::Universal, 16, attrs)],
            ),
        )
    }

    pub(crate) fn reference(id: RequestId, uris: &[&str]) -> RawUnit {
        unit(
            id,
            constructed(
                TagClass::Application,
                AppTag::SearchResultReference as u64,
                uris.iter().map(|u| octets(u.as_bytes())).collect(),
            ),
        )
    }

    pub(crate) fn extended_response(
        id: RequestId,
        rc: u32,
        name: Option<&str>,
        val: Option<&[u8]>,
    ) -> RawUnit {
        let mut inner = ldap_result(rc, "");
        if let Some(name) = name {
            inner.push(StructureTag {
                class: TagClass::Context,
                id: 10,
                payload: PL::P(name.as_bytes().to_vec()),
            });
        }
        if let Some(val) = val {
            inner.push(StructureTag {
                class: TagClass::Context,
                id: 11,
                payload: PL::P(val.to_vec()),
            });
        }
        unit(
            id,
            constructed(TagClass::Application, AppTag::ExtendedResponse as u64, inner),
        )
    }

    /// BindResponse with saslBindInProgress and server credentials.
    pub(crate) fn bind_in_progress(id: RequestId, creds: &[u8]) -> RawUnit {
        let mut inner = ldap_result(14, "");
        inner.push(StructureTag {
            class: TagClass::Context,
            id: 7,
            payload: PL::P(creds.to_vec()),
        });
        unit(
            id,
            constructed(TagClass::Application, AppTag::BindResponse as u64, inner),
        )
    }
}
