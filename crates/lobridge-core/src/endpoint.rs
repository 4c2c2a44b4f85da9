use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

/// Address of one engine instance.
///
/// The host is always loopback; the port is chosen by the caller and must be
/// unique per engine instance. Every string the supervisor and the bridge
/// derive from the endpoint (accept argument, connection string, fingerprint)
/// comes from here so they can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    port: u16,
}

impl EndpointAddress {
    pub const HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((Self::HOST, self.port))
    }

    /// `socket,host=127.0.0.1,port=<port>,tcpNoDelay=1`
    pub fn connection_string(&self) -> String {
        format!("socket,host={},port={},tcpNoDelay=1", Self::HOST, self.port)
    }

    /// Full UNO URL of the remote service manager
    pub fn uno_url(&self) -> String {
        format!("{};urp;StarOffice.ServiceManager", self.connection_string())
    }

    /// The `--accept=` launch argument; also the needle searched for in the
    /// process table.
    pub fn accept_argument(&self) -> String {
        format!("--accept={}", self.uno_url())
    }

    /// Unique instance fingerprint, used for the profile directory and the
    /// bridge name
    pub fn fingerprint(&self) -> String {
        format!("lobridge-socket-{}-{}-tcpNoDelay-1", Self::HOST, self.port)
    }

    pub fn bridge_name(&self) -> String {
        format!("DocumentConverterBridge({})", self.fingerprint())
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Self::HOST, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_strings() {
        let endpoint = EndpointAddress::new(2002);
        assert_eq!(
            endpoint.connection_string(),
            "socket,host=127.0.0.1,port=2002,tcpNoDelay=1"
        );
        assert_eq!(
            endpoint.accept_argument(),
            "--accept=socket,host=127.0.0.1,port=2002,tcpNoDelay=1;urp;StarOffice.ServiceManager"
        );
        assert_eq!(endpoint.socket_addr().port(), 2002);
        assert_eq!(endpoint.to_string(), "127.0.0.1:2002");
    }

    #[test]
    fn test_fingerprint_differs_per_port() {
        assert_ne!(
            EndpointAddress::new(2002).fingerprint(),
            EndpointAddress::new(2003).fingerprint()
        );
    }
}
