//! Byte transports under a [`Connection`](../conn/struct.Connection.html).
//!
//! The connection only needs to send a fully encoded frame and to read one
//! decoded envelope at a time; [`Socket`](trait.Socket.html) is that contract.
//! [`Framed`](struct.Framed.html) provides it for any blocking stream by running
//! the envelope codec over a read buffer.

use std::any::Any;
use std::io::{self, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::protocol::{LdapCodec, RawUnit};
use crate::result::{LdapError, Result};

use bytes::BytesMut;
#[cfg(feature = "tls-native")]
use native_tls::{HandshakeError, TlsConnector, TlsStream};
use tokio_util::codec::Decoder;

const READ_CHUNK: usize = 8192;

/// Transport of encoded frames and decoded envelopes.
pub trait Socket: Send {
    /// Write one complete frame.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Block until one complete envelope has been received and decode it.
    fn read_unit(&mut self) -> Result<RawUnit>;

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Look at the concrete type without giving up the socket.
    fn as_any(&self) -> &dyn Any;

    /// Recover the concrete type, for wrapping in another layer.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

/// Blocking stream with an envelope decoder and read buffer.
pub struct Framed<S> {
    io: S,
    codec: LdapCodec,
    rbuf: BytesMut,
}

impl<S: Read + Write> Framed<S> {
    pub fn new(io: S) -> Self {
        Framed {
            io,
            codec: LdapCodec,
            rbuf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.io
    }

    /// Return the stream, discarding any buffered bytes.
    pub fn into_inner(self) -> S {
        if !self.rbuf.is_empty() {
            warn!("discarding {} buffered bytes", self.rbuf.len());
        }
        self.io
    }
}

impl<S> Socket for Framed<S>
where
    S: Read + Write + Send + 'static,
{
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.io.write_all(frame)?;
        self.io.flush()?;
        Ok(())
    }

    fn read_unit(&mut self) -> Result<RawUnit> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(unit) = self.codec.decode(&mut self.rbuf)? {
                return Ok(unit);
            }
            match self.io.read(&mut chunk) {
                Ok(0) if self.rbuf.is_empty() => {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into())
                }
                Ok(0) => {
                    return Err(LdapError::decode(format!(
                        "connection closed with {} bytes of a partial message",
                        self.rbuf.len()
                    )))
                }
                Ok(n) => {
                    trace!("read {} bytes", n);
                    self.rbuf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.io.flush()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Stream types a connection can be opened over.
#[derive(Debug)]
pub enum ConnType {
    Tcp(TcpStream),
    #[cfg(feature = "tls-native")]
    Tls(TlsStream<TcpStream>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for ConnType {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ConnType::Tcp(ts) => ts.read(buf),
            #[cfg(feature = "tls-native")]
            ConnType::Tls(tls) => tls.read(buf),
            #[cfg(unix)]
            ConnType::Unix(us) => us.read(buf),
        }
    }
}

impl Write for ConnType {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ConnType::Tcp(ts) => ts.write(buf),
            #[cfg(feature = "tls-native")]
            ConnType::Tls(tls) => tls.write(buf),
            #[cfg(unix)]
            ConnType::Unix(us) => us.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ConnType::Tcp(ts) => ts.flush(),
            #[cfg(feature = "tls-native")]
            ConnType::Tls(tls) => tls.flush(),
            #[cfg(unix)]
            ConnType::Unix(us) => us.flush(),
        }
    }
}

/// Existing stream from which a connection can be created.
///
/// A connection may be created from a previously opened TCP or Unix
/// stream (the latter only if Unix domain sockets are supported) by
/// placing an instance of this structure in `LdapConnSettings`.
///
/// Since the stdlib streams can't be cloned, and `LdapConnSettings`
/// derives `Clone`, cloning the enum will produce the `Invalid`
/// variant.
#[derive(Debug)]
pub enum StdStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    Invalid,
}

impl Clone for StdStream {
    fn clone(&self) -> StdStream {
        StdStream::Invalid
    }
}

/// Hook which wraps a plain socket in a TLS layer after a successful StartTLS.
pub trait TlsUpgrade: Send + Sync {
    /// Tell whether `socket` can be wrapped, without touching it. Called
    /// before anything is sent to the server.
    fn check(&self, _socket: &dyn Socket) -> Result<()> {
        Ok(())
    }

    /// Wrap the socket. On failure the socket is gone, since a handshake
    /// which went wrong leaves the stream in an unknown state.
    fn wrap(&self, socket: Box<dyn Socket>) -> Result<Box<dyn Socket>>;
}

/// StartTLS wrapping with `native-tls`. Works on sockets opened by the library.
#[cfg(feature = "tls-native")]
pub struct NativeTlsUpgrade {
    connector: TlsConnector,
    domain: String,
}

#[cfg(feature = "tls-native")]
impl NativeTlsUpgrade {
    pub fn new(connector: TlsConnector, domain: &str) -> Self {
        NativeTlsUpgrade {
            connector,
            domain: domain.to_owned(),
        }
    }

    pub(crate) fn connect(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
        self.connector
            .connect(&self.domain, stream)
            .map_err(|e| match e {
                HandshakeError::Failure(e) => LdapError::from(e),
                HandshakeError::WouldBlock(_) => {
                    LdapError::from(io::Error::from(io::ErrorKind::WouldBlock))
                }
            })
    }
}

#[cfg(feature = "tls-native")]
impl TlsUpgrade for NativeTlsUpgrade {
    fn check(&self, socket: &dyn Socket) -> Result<()> {
        match socket.as_any().downcast_ref::<Framed<ConnType>>() {
            Some(framed) if matches!(framed.get_ref(), ConnType::Tcp(_)) => Ok(()),
            _ => Err(LdapError::MismatchedStreamType),
        }
    }

    fn wrap(&self, socket: Box<dyn Socket>) -> Result<Box<dyn Socket>> {
        let framed = socket
            .into_any()
            .downcast::<Framed<ConnType>>()
            .map_err(|_| LdapError::MismatchedStreamType)?;
        let tcp = match framed.into_inner() {
            ConnType::Tcp(tcp) => tcp,
            _ => return Err(LdapError::MismatchedStreamType),
        };
        debug!("TLS handshake with {}", self.domain);
        Ok(Box::new(Framed::new(ConnType::Tls(self.connect(tcp)?))))
    }
}
