//! Refuses to dial or resolve into private, loopback, link-local, or other
//! non-routable address space (C3). A compromised or malicious passage
//! cannot use this node as a stepping stone into its own LAN.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use ipnet::IpNet;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use crate::error::{JohnError, Result};

fn reserved_v4_nets() -> &'static [IpNet] {
    use std::sync::OnceLock;
    static NETS: OnceLock<Vec<IpNet>> = OnceLock::new();
    NETS.get_or_init(|| {
        [
            "0.0.0.0/8",
            "10.0.0.0/8",
            "100.64.0.0/10", // CGNAT
            "127.0.0.0/8",
            "169.254.0.0/16",
            "172.16.0.0/12",
            "192.0.0.0/24",
            "192.168.0.0/16",
            "198.18.0.0/15",
            "224.0.0.0/4", // multicast
            "240.0.0.0/4", // reserved + broadcast
        ]
        .iter()
        .map(|s| s.parse().expect("static CIDR literal"))
        .collect()
    })
    .as_slice()
}

fn reserved_v6_nets() -> &'static [IpNet] {
    use std::sync::OnceLock;
    static NETS: OnceLock<Vec<IpNet>> = OnceLock::new();
    NETS.get_or_init(|| {
        [
            "::1/128",   // loopback
            "::/128",    // unspecified
            "fc00::/7",  // unique local
            "fe80::/10", // link-local
            "ff00::/8",  // multicast
        ]
        .iter()
        .map(|s| s.parse().expect("static CIDR literal"))
        .collect()
    })
    .as_slice()
}

/// True if `ip` falls in a reserved/non-routable range and must not be
/// dialed on the target's behalf.
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => reserved_v4_nets().iter().any(|net| net.contains(&IpAddr::V4(v4))),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private(IpAddr::V4(mapped));
            }
            reserved_v6_nets().iter().any(|net| net.contains(&IpAddr::V6(v6)))
        }
    }
}

/// Resolves `host:port`, rejecting the whole lookup if any returned address
/// is private — mirroring a DNS-response scan rather than trusting the
/// first address alone (a multi-answer response could otherwise smuggle a
/// private address past a check that only inspected the first record).
pub async fn resolve_public(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| JohnError::Dial(format!("resolving {host}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(JohnError::Dial(format!("no addresses for {host}")));
    }
    if let Some(bad) = addrs.iter().find(|a| is_private(a.ip())) {
        return Err(JohnError::DialPrivateAddress(bad.ip().to_string()));
    }
    Ok(addrs)
}

/// Dials `addr` directly (no name resolution), refusing private targets and
/// bounding the attempt by `dial_timeout`.
pub async fn guarded_connect(addr: SocketAddr, dial_timeout: Duration) -> Result<TcpStream> {
    if is_private(addr.ip()) {
        return Err(JohnError::DialPrivateAddress(addr.ip().to_string()));
    }
    match timeout(dial_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(JohnError::Dial(e.to_string())),
        Err(_) => Err(JohnError::Dial(format!("connect to {addr} timed out"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn rejects_rfc1918_and_loopback() {
        for ip in ["10.1.2.3", "192.168.1.1", "172.20.0.5", "127.0.0.1", "169.254.1.1"] {
            assert!(is_private(IpAddr::from_str(ip).unwrap()), "{ip} should be private");
        }
    }

    #[test]
    fn rejects_cgnat_and_multicast() {
        assert!(is_private(IpAddr::from_str("100.64.5.5").unwrap()));
        assert!(is_private(IpAddr::from_str("224.0.0.1").unwrap()));
        assert!(is_private(IpAddr::from_str("0.0.0.0").unwrap()));
    }

    #[test]
    fn allows_public_v4() {
        for ip in ["8.8.8.8", "1.1.1.1", "93.184.216.34"] {
            assert!(!is_private(IpAddr::from_str(ip).unwrap()), "{ip} should be public");
        }
    }

    #[test]
    fn rejects_ipv6_reserved_ranges() {
        for ip in ["::1", "fe80::1", "fc00::1", "ff02::1", "::"] {
            assert!(is_private(IpAddr::from_str(ip).unwrap()), "{ip} should be private");
        }
    }

    #[test]
    fn allows_public_ipv6() {
        assert!(!is_private(IpAddr::from_str("2001:4860:4860::8888").unwrap()));
    }

    #[test]
    fn rejects_ipv4_mapped_private_ipv6() {
        assert!(is_private(IpAddr::from_str("::ffff:10.0.0.1").unwrap()));
    }
}
