//! The three command sockets and the datagram plumbing around them.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::{Path, PathBuf};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{UdpSocket, UnixDatagram};
use tracing::{debug, error, warn};

use super::access::Trust;
use crate::config::CommandConfig;
use crate::error::{CmdMonError, Result};
use crate::protocol::wire::Addr;

/// Receive buffer size; comfortably above the longest command length.
pub(super) const RX_BUFFER_LEN: usize = 1024;

/// Where a request came from; replies go back through the same socket.
pub(super) enum Origin {
    Udp4(SocketAddr),
    Udp6(SocketAddr),
    Local(tokio::net::unix::SocketAddr),
}

impl Origin {
    pub(super) fn trust(&self) -> Trust {
        match self {
            Origin::Udp4(addr) => {
                if addr.ip() == Ipv4Addr::LOCALHOST {
                    Trust::Loopback
                } else {
                    Trust::Remote
                }
            }
            Origin::Udp6(addr) => {
                if addr.ip() == Ipv6Addr::LOCALHOST {
                    Trust::Loopback
                } else {
                    Trust::Remote
                }
            }
            Origin::Local(_) => Trust::LocalSocket,
        }
    }

    /// The source address as the client log records it; local-socket
    /// callers have none.
    pub(super) fn wire_addr(&self) -> Addr {
        match self {
            Origin::Udp4(addr) | Origin::Udp6(addr) => Addr::from(addr.ip()),
            Origin::Local(_) => Addr::Unspec,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Udp4(addr) | Origin::Udp6(addr) => addr.fmt(f),
            Origin::Local(addr) => match addr.as_pathname() {
                Some(path) => write!(f, "{}", path.display()),
                None => write!(f, "[unnamed local socket]"),
            },
        }
    }
}

/// Address family of an IP command socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpFamily {
    V4,
    V6,
}

pub(super) struct Transport {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
    local: Option<UnixDatagram>,
    local_path: Option<PathBuf>,
    #[cfg(feature = "reply-drop-test")]
    reply_counter: std::cell::Cell<u32>,
}

impl Transport {
    /// Bind the IP sockets per the configuration. Creating the local
    /// socket is deferred to [`Transport::open_local`], which runs after
    /// the process has dropped privileges.
    pub(super) async fn bind(config: &CommandConfig) -> Result<Transport> {
        let mut v4 = None;
        let mut v6 = None;

        if config.port != 0 {
            v4 = match bind_ip(IpFamily::V4, config) {
                Ok(socket) => Some(socket),
                Err(e) => {
                    error!(error = %e, "could not open IPv4 command socket");
                    None
                }
            };
            v6 = match bind_ip(IpFamily::V6, config) {
                Ok(socket) => Some(socket),
                Err(e) => {
                    error!(error = %e, "could not open IPv6 command socket");
                    None
                }
            };
            if v4.is_none() && v6.is_none() {
                return Err(CmdMonError::NoCommandSocket);
            }
        }

        Ok(Transport {
            v4,
            v6,
            local: None,
            local_path: None,
            #[cfg(feature = "reply-drop-test")]
            reply_counter: std::cell::Cell::new(0),
        })
    }

    /// Create the filesystem-namespace socket, reclaiming a stale node
    /// first.
    pub(super) fn open_local(&mut self, path: &Path) -> Result<()> {
        if path.as_os_str().len() >= 108 {
            return Err(CmdMonError::Config(format!(
                "local socket path {} is too long",
                path.display()
            )));
        }
        let _ = std::fs::remove_file(path);
        let socket = UnixDatagram::bind(path)?;
        debug!(path = %path.display(), "listening on local command socket");
        self.local = Some(socket);
        self.local_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Wait until one of the sockets is readable and receive from it.
    /// `Ok(None)` means a would-block race; the caller just polls again.
    pub(super) async fn recv(&self, buf: &mut [u8]) -> io::Result<Option<(usize, Origin)>> {
        enum Readable {
            V4,
            V6,
            Local,
        }

        let ready = tokio::select! {
            r = readable(self.v4.as_ref()) => { r?; Readable::V4 }
            r = readable(self.v6.as_ref()) => { r?; Readable::V6 }
            r = readable_local(self.local.as_ref()) => { r?; Readable::Local }
        };

        let received = match ready {
            Readable::V4 => {
                let socket = self.v4.as_ref().expect("readable socket exists");
                match socket.try_recv_from(buf) {
                    Ok((len, from)) => Some((len, Origin::Udp4(from))),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                    Err(e) => return Err(e),
                }
            }
            Readable::V6 => {
                let socket = self.v6.as_ref().expect("readable socket exists");
                match socket.try_recv_from(buf) {
                    Ok((len, from)) => Some((len, Origin::Udp6(from))),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                    Err(e) => return Err(e),
                }
            }
            Readable::Local => {
                let socket = self.local.as_ref().expect("readable socket exists");
                match socket.try_recv_from(buf) {
                    Ok((len, from)) => Some((len, Origin::Local(from))),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                    Err(e) => return Err(e),
                }
            }
        };
        Ok(received)
    }

    /// Single non-blocking send back to the request's origin. Failures are
    /// logged and the reply is discarded; the client owns the retry.
    pub(super) fn send_reply(&self, bytes: &[u8], origin: &Origin) {
        #[cfg(feature = "reply-drop-test")]
        {
            let count = self.reply_counter.get();
            self.reply_counter.set(count + 1);
            if count % 3 == 2 {
                debug!(to = %origin, "dropping reply to exercise client retry");
                return;
            }
        }

        let sent = match origin {
            Origin::Udp4(addr) => match &self.v4 {
                Some(socket) => socket.try_send_to(bytes, *addr),
                None => return,
            },
            Origin::Udp6(addr) => match &self.v6 {
                Some(socket) => socket.try_send_to(bytes, *addr),
                None => return,
            },
            Origin::Local(addr) => {
                let Some(socket) = &self.local else { return };
                match addr.as_pathname() {
                    Some(path) => socket.try_send_to(bytes, path),
                    None => {
                        debug!("local caller has no return path, dropping reply");
                        return;
                    }
                }
            }
        };

        match sent {
            Ok(len) => debug!(bytes = len, to = %origin, "sent reply"),
            Err(e) => debug!(error = %e, to = %origin, "could not send reply"),
        }
    }

    /// Close everything down, removing the local socket node.
    pub(super) fn close(&mut self) {
        self.v4 = None;
        self.v6 = None;
        self.local = None;
        if let Some(path) = self.local_path.take() {
            let _ = std::fs::remove_file(&path);
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn readable(socket: Option<&UdpSocket>) -> io::Result<()> {
    match socket {
        Some(socket) => socket.readable().await,
        None => std::future::pending().await,
    }
}

async fn readable_local(socket: Option<&UnixDatagram>) -> io::Result<()> {
    match socket {
        Some(socket) => socket.readable().await,
        None => std::future::pending().await,
    }
}

/// The socket option dance, then conversion into a tokio socket.
fn bind_ip(family: IpFamily, config: &CommandConfig) -> Result<UdpSocket> {
    let domain = match family {
        IpFamily::V4 => Domain::IPV4,
        IpFamily::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_cloexec(true)?;

    // Survivable options: log and carry on, as the daemon always has.
    if let Err(e) = socket.set_reuse_address(true) {
        error!(error = %e, "could not set reuseaddr socket option");
    }
    #[cfg(target_os = "linux")]
    if let Err(e) = socket.set_freebind(true) {
        error!(error = %e, "could not set free bind socket option");
    }
    if family == IpFamily::V6 {
        if let Err(e) = socket.set_only_v6(true) {
            error!(error = %e, "could not request v6-only socket option");
        }
    }

    let bind_addr: SocketAddr = match family {
        IpFamily::V4 => {
            let ip = config.bind_address.unwrap_or(Ipv4Addr::LOCALHOST);
            SocketAddrV4::new(ip, config.port).into()
        }
        IpFamily::V6 => {
            let ip = config.bind_address6.unwrap_or(Ipv6Addr::LOCALHOST);
            SocketAddrV6::new(ip, config.port, 0, 0).into()
        }
    };
    socket.bind(&bind_addr.into()).map_err(|e| {
        warn!(address = %bind_addr, "could not bind command socket");
        CmdMonError::Io(e)
    })?;
    socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(socket.into())?;
    debug!(address = %bind_addr, "listening on command socket");
    Ok(socket)
}
