//! Local address discovery

use magique_proto::PlatformName;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, warn};

/// Host a platform bound to `bound` announces when none is configured.
///
/// A specific bind address is announced as is; a wildcard bind announces
/// the address the machine's host name resolves to.
pub(crate) async fn announced_host(bound: SocketAddr) -> String {
    if !bound.ip().is_unspecified() {
        return bound.ip().to_string();
    }
    local_host_address().await.to_string()
}

/// Address the machine's host name resolves to, preferring non-loopback IPv4
pub(crate) async fn local_host_address() -> IpAddr {
    let fallback = IpAddr::V4(Ipv4Addr::LOCALHOST);

    let Some(hostname) = host_name().await else {
        warn!("Cannot read the host name, announcing {}", fallback);
        return fallback;
    };

    let resolved: Vec<IpAddr> = match lookup_host((hostname.as_str(), 0)).await {
        Ok(addrs) => addrs.map(|addr| addr.ip()).collect(),
        Err(e) => {
            warn!("Cannot resolve host name {}: {}, announcing {}", hostname, e, fallback);
            return fallback;
        }
    };

    resolved
        .iter()
        .copied()
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
        .or_else(|| resolved.iter().copied().find(|ip| !ip.is_loopback()))
        .or_else(|| resolved.first().copied())
        .unwrap_or(fallback)
}

async fn host_name() -> Option<String> {
    #[cfg(unix)]
    {
        let output = tokio::process::Command::new("hostname").output().await.ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8(output.stdout)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
    #[cfg(windows)]
    {
        std::env::var("COMPUTERNAME").ok()
    }
    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}

/// Whether connecting to `destination` would reach the listener bound to `bound`
pub(crate) async fn reaches_listener(destination: &PlatformName, bound: SocketAddr) -> bool {
    if destination.port() != bound.port() {
        return false;
    }

    let resolved = match lookup_host(destination.socket_addr()).await {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!("Cannot resolve {}: {}", destination, e);
            return false;
        }
    };

    for addr in resolved {
        if accepts_from(addr.ip(), bound.ip()).await {
            return true;
        }
    }
    false
}

async fn accepts_from(ip: IpAddr, bound: IpAddr) -> bool {
    if bound.is_unspecified() {
        // Binding succeeds only for addresses assigned to this machine
        return ip.is_unspecified() || ip.is_loopback() || UdpSocket::bind((ip, 0)).await.is_ok();
    }
    // Connecting to the wildcard address reaches loopback
    ip == bound || (ip.is_unspecified() && bound.is_loopback())
}
