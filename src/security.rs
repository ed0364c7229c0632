use anyhow::{Result, anyhow};
use ipnet::IpNet;
use std::net::IpAddr;

/// Allowlist of peers permitted to open a tunnel.
///
/// Entries are single addresses or CIDR subnets. An unset list lets every
/// peer through.
#[derive(Debug, Clone, Default)]
pub struct ClientFilter {
    allowed: Option<Vec<IpNet>>,
}

impl ClientFilter {
    pub fn parse(entries: Option<&[String]>) -> Result<Self> {
        let Some(entries) = entries else {
            return Ok(Self::default());
        };

        let allowed = entries
            .iter()
            .map(|entry| {
                if let Ok(addr) = entry.parse::<IpAddr>() {
                    let host_prefix = if addr.is_ipv4() { 32 } else { 128 };
                    return IpNet::new(addr, host_prefix).map_err(|e| anyhow!(e));
                }
                entry.parse::<IpNet>().map_err(|_| {
                    anyhow!("Invalid IP address or CIDR in allowed_client_ips: {entry}")
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            allowed: Some(allowed),
        })
    }

    #[must_use]
    pub fn allows(&self, peer: IpAddr) -> bool {
        let peer = match peer {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(peer, IpAddr::V4),
            IpAddr::V4(_) => peer,
        };
        self.allowed
            .as_ref()
            .is_none_or(|nets| nets.iter().any(|net| net.contains(&peer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(entries: &[&str]) -> ClientFilter {
        let entries: Vec<String> = entries.iter().map(ToString::to_string).collect();
        ClientFilter::parse(Some(&entries)).unwrap()
    }

    #[test]
    fn unset_list_allows_everyone() {
        let filter = ClientFilter::parse(None).unwrap();
        assert!(filter.allows("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn matches_single_addresses_and_subnets() {
        let filter = filter(&["192.0.2.7", "10.0.0.0/8", "2001:db8::/32"]);
        assert!(filter.allows("192.0.2.7".parse().unwrap()));
        assert!(filter.allows("10.20.30.40".parse().unwrap()));
        assert!(filter.allows("2001:db8::1".parse().unwrap()));
        assert!(!filter.allows("192.0.2.8".parse().unwrap()));
        assert!(!filter.allows("2001:db9::1".parse().unwrap()));
    }

    #[test]
    fn ipv4_mapped_peers_match_ipv4_entries() {
        let filter = filter(&["127.0.0.1"]);
        assert!(filter.allows("::ffff:127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn empty_list_allows_nobody() {
        let filter = filter(&[]);
        assert!(!filter.allows("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn invalid_entry_is_an_error() {
        let entries = vec!["10.0.0.0/33".to_string()];
        assert!(ClientFilter::parse(Some(&entries)).is_err());
    }
}
