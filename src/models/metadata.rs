use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Transport of a routed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Udp,
}

/// Destination and origin of a connection being routed through a group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub network: Network,
    /// Requested hostname, empty when the client dialed an IP
    pub host: String,
    pub dst_ip: Option<IpAddr>,
    pub dst_port: u16,
    pub src_ip: Option<IpAddr>,
    pub src_port: u16,
}

impl Metadata {
    pub fn tcp(host: impl Into<String>, dst_port: u16) -> Self {
        Self {
            host: host.into(),
            dst_port,
            ..Default::default()
        }
    }

    pub fn with_src_ip(mut self, src_ip: IpAddr) -> Self {
        self.src_ip = Some(src_ip);
        self
    }

    pub fn with_dst_ip(mut self, dst_ip: IpAddr) -> Self {
        self.dst_ip = Some(dst_ip);
        self
    }

    /// Host if known, otherwise the destination IP
    pub fn remote_address(&self) -> String {
        let host = if !self.host.is_empty() {
            self.host.clone()
        } else {
            self.dst_ip.map(|ip| ip.to_string()).unwrap_or_default()
        };
        format!("{}:{}", host, self.dst_port)
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.remote_address())
    }
}
