use serde::{Deserialize, Serialize};

/// Kind of upstream adapter behind a proxy handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterType {
    Direct,
    Reject,
    RejectDrop,
    Compatible,
    Pass,
    Http,
    Socks5,
    Shadowsocks,
    Vmess,
    Vless,
    Trojan,
    Hysteria2,
    Tuic,
    WireGuard,
    Ssh,
}

impl AdapterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterType::Direct => "Direct",
            AdapterType::Reject => "Reject",
            AdapterType::RejectDrop => "RejectDrop",
            AdapterType::Compatible => "Compatible",
            AdapterType::Pass => "Pass",
            AdapterType::Http => "Http",
            AdapterType::Socks5 => "Socks5",
            AdapterType::Shadowsocks => "Shadowsocks",
            AdapterType::Vmess => "Vmess",
            AdapterType::Vless => "Vless",
            AdapterType::Trojan => "Trojan",
            AdapterType::Hysteria2 => "Hysteria2",
            AdapterType::Tuic => "Tuic",
            AdapterType::WireGuard => "WireGuard",
            AdapterType::Ssh => "Ssh",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "direct" => Some(AdapterType::Direct),
            "reject" => Some(AdapterType::Reject),
            "rejectdrop" | "reject-drop" => Some(AdapterType::RejectDrop),
            "compatible" => Some(AdapterType::Compatible),
            "pass" => Some(AdapterType::Pass),
            "http" => Some(AdapterType::Http),
            "socks5" => Some(AdapterType::Socks5),
            "ss" | "shadowsocks" => Some(AdapterType::Shadowsocks),
            "vmess" => Some(AdapterType::Vmess),
            "vless" => Some(AdapterType::Vless),
            "trojan" => Some(AdapterType::Trojan),
            "hysteria2" | "hy2" => Some(AdapterType::Hysteria2),
            "tuic" => Some(AdapterType::Tuic),
            "wireguard" => Some(AdapterType::WireGuard),
            "ssh" => Some(AdapterType::Ssh),
            _ => None,
        }
    }

    /// Adapters that never reach a remote server; dial failures through them
    /// say nothing about upstream health.
    pub fn is_passthrough(&self) -> bool {
        matches!(
            self,
            AdapterType::Direct
                | AdapterType::Compatible
                | AdapterType::Reject
                | AdapterType::Pass
                | AdapterType::RejectDrop
        )
    }
}

impl std::fmt::Display for AdapterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
