use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RfbConfig {
    /// Address to listen on. Loopback by default; there is no
    /// authentication.
    pub bind: SocketAddr,
    /// Desktop name sent in `ServerInit`.
    pub name: String,
}

impl Default for RfbConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5900)),
            name: "BBC Micro".to_string(),
        }
    }
}
