//! Hash keys derived from connection metadata

use std::collections::hash_map::DefaultHasher;
use std::env;
use std::fs;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::LazyLock;

use publicsuffix::{List, Psl};
use tracing::warn;

use crate::models::Metadata;

static PUBLIC_SUFFIX_LIST: LazyLock<Option<List>> = LazyLock::new(load_public_suffix_list);

/// Load the list named by `PUBLIC_SUFFIX_LIST`. `None` selects the built-in
/// list compiled into `psl`.
fn load_public_suffix_list() -> Option<List> {
    let path = env::var("PUBLIC_SUFFIX_LIST").ok()?;
    match fs::read(&path) {
        Ok(bytes) => match List::from_bytes(&bytes) {
            Ok(list) => return Some(list),
            Err(e) => warn!(path = %path, "Invalid public suffix list: {}", e),
        },
        Err(e) => warn!(path = %path, "Failed to read public suffix list: {}", e),
    }
    None
}

/// Registrable domain of `host`, e.g. `example.co.uk` for `www.example.co.uk`
pub fn etld_plus_one(host: &str) -> Option<String> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || host.split('.').any(str::is_empty) {
        return None;
    }

    let Some(list) = PUBLIC_SUFFIX_LIST.as_ref() else {
        return psl::domain_str(&host).map(str::to_string);
    };
    if let Some(domain) = list.domain(host.as_bytes()) {
        return std::str::from_utf8(domain.as_bytes()).ok().map(str::to_string);
    }

    // No rule in the loaded list matched: the last label is the suffix
    let mut labels = host.rsplitn(3, '.');
    let tld = labels.next()?;
    let sld = labels.next()?;
    Some(format!("{}.{}", sld, tld))
}

/// Destination key: literal IP host, else eTLD+1 of the host, else the
/// destination IP, else empty
pub fn destination_key(metadata: &Metadata) -> String {
    if !metadata.host.is_empty() {
        if metadata.host.parse::<IpAddr>().is_ok() {
            return metadata.host.clone();
        }
        if let Some(domain) = etld_plus_one(&metadata.host) {
            return domain;
        }
    }

    metadata
        .dst_ip
        .map(|ip| ip.to_string())
        .unwrap_or_default()
}

/// Source IP followed by the destination key
pub fn session_key(metadata: &Metadata) -> String {
    let src = metadata
        .src_ip
        .map(|ip| ip.to_string())
        .unwrap_or_default();
    format!("{}{}", src, destination_key(metadata))
}

pub fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_ip_host_is_used_verbatim() {
        let m = Metadata::tcp("10.0.0.1", 443);
        assert_eq!(destination_key(&m), "10.0.0.1");

        let m = Metadata::tcp("::1", 443);
        assert_eq!(destination_key(&m), "::1");
    }

    #[test]
    fn test_subdomains_share_a_key() {
        let www = Metadata::tcp("www.example.com", 443);
        let api = Metadata::tcp("api.example.com", 443);
        assert_eq!(destination_key(&www), "example.com");
        assert_eq!(destination_key(&www), destination_key(&api));
        assert_eq!(hash_key(&destination_key(&www)), hash_key(&destination_key(&api)));
    }

    #[test]
    fn test_multi_label_suffixes() {
        let example = Metadata::tcp("www.example.co.uk", 443);
        let other = Metadata::tcp("www.other.co.uk", 443);
        assert_eq!(destination_key(&example), "example.co.uk");
        assert_eq!(destination_key(&other), "other.co.uk");
        assert_ne!(hash_key(&destination_key(&example)), hash_key(&destination_key(&other)));

        assert_eq!(etld_plus_one("cdn.shop.com.cn"), Some("shop.com.cn".to_string()));
        assert_eq!(etld_plus_one("alice.github.io"), Some("alice.github.io".to_string()));
        assert_eq!(etld_plus_one("co.uk"), None);
    }

    #[test]
    fn test_falls_back_to_destination_ip() {
        let dst = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
        let m = Metadata::tcp("localhost", 53).with_dst_ip(dst);
        assert_eq!(destination_key(&m), "1.1.1.1");

        let m = Metadata::tcp("", 53);
        assert_eq!(destination_key(&m), "");
    }

    #[test]
    fn test_session_key_includes_source() {
        let src = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2));
        let m = Metadata::tcp("www.example.com", 443).with_src_ip(src);
        assert_eq!(session_key(&m), "192.168.1.2example.com");
        assert_eq!(session_key(&Metadata::tcp("example.com", 80)), "example.com");
    }

    #[test]
    fn test_malformed_hosts() {
        assert_eq!(etld_plus_one("com"), None);
        assert_eq!(etld_plus_one("a..com"), None);
        assert_eq!(etld_plus_one("WWW.Example.COM."), Some("example.com".to_string()));
    }
}
