use crate::domain::model::Protocol;
use crate::domain::ports::HostPortProbe;
use crate::utils::error::{Result, StackError};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

/// Probes by trying to bind the port; `AddrInUse` means something holds it.
#[derive(Debug, Clone)]
pub struct SocketProbe {
    address: IpAddr,
}

impl SocketProbe {
    pub fn new(address: IpAddr) -> Self {
        Self { address }
    }
}

impl Default for SocketProbe {
    fn default() -> Self {
        // 0.0.0.0 同時涵蓋 loopback 與對外介面上的佔用
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

impl HostPortProbe for SocketProbe {
    fn is_bound(&self, port: u16, protocol: Protocol) -> Result<bool> {
        let addr = SocketAddr::new(self.address, port);
        let attempt = match protocol {
            Protocol::Tcp => TcpListener::bind(addr).map(drop),
            Protocol::Udp => UdpSocket::bind(addr).map(drop),
        };

        match attempt {
            Ok(()) => Ok(false),
            Err(e) if e.kind() == ErrorKind::AddrInUse => Ok(true),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                // 非 root 無法綁定低埠號，無從得知是否被佔用
                tracing::debug!("Cannot probe {}/{}: {}", port, protocol, e);
                Ok(false)
            }
            Err(e) => Err(StackError::collaborator(
                "port probe",
                format!("{}/{}", port, protocol),
                e,
            )),
        }
    }
}
