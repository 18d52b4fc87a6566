//! Peer configuration parsing and validation

use anyhow::{anyhow, bail, Result};
use cosigner_core::{CosignerId, CosignerKey};
use std::str::FromStr;

/// `<id>@<url>`, e.g. `2@http://10.0.0.2:2222`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerArg {
    pub id: CosignerId,
    pub url: String,
}

impl FromStr for PeerArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (id, url) = s
            .split_once('@')
            .ok_or_else(|| anyhow!("peer must look like <id>@<url>, got {:?}", s))?;
        let id: CosignerId = id.trim().parse()?;
        let url = url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("peer {} url must be http(s): {}", id, url);
        }
        Ok(Self {
            id,
            url: url.to_string(),
        })
    }
}

/// Check peers against the cluster described by the key file.
///
/// Returns the cluster members no peer entry was given for.
pub fn validate_peers(key: &CosignerKey, peers: &[PeerArg]) -> Result<Vec<CosignerId>> {
    let mut seen = Vec::with_capacity(peers.len());
    for peer in peers {
        if peer.id == key.id {
            bail!("peer list contains this cosigner ({})", key.id);
        }
        if key.peer(peer.id).is_none() {
            bail!("peer {} is not a member of the cluster", peer.id);
        }
        if seen.contains(&peer.id) {
            bail!("peer {} listed twice", peer.id);
        }
        seen.push(peer.id);
    }

    if seen.len() + 1 < key.threshold {
        bail!(
            "{} peers configured, threshold {} can never be reached",
            seen.len(),
            key.threshold
        );
    }

    Ok(key
        .cluster
        .iter()
        .map(|member| member.id)
        .filter(|id| *id != key.id && !seen.contains(id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosigner_core::deal_key_shares;

    #[test]
    fn test_parse_peer() {
        let peer: PeerArg = "2@http://10.0.0.2:2222".parse().unwrap();
        assert_eq!(peer.id, 2);
        assert_eq!(peer.url, "http://10.0.0.2:2222");

        assert!("http://10.0.0.2:2222".parse::<PeerArg>().is_err());
        assert!("x@http://host".parse::<PeerArg>().is_err());
        assert!("2@tcp://host:1".parse::<PeerArg>().is_err());
    }

    #[test]
    fn test_validate_peers() {
        let key = deal_key_shares(2, 3).unwrap().remove(0);
        let peer = |id| PeerArg {
            id,
            url: "http://127.0.0.1:1".into(),
        };

        assert_eq!(validate_peers(&key, &[peer(2)]).unwrap(), vec![3]);
        assert!(validate_peers(&key, &[peer(2), peer(3)]).unwrap().is_empty());
        assert!(validate_peers(&key, &[peer(1)]).is_err());
        assert!(validate_peers(&key, &[peer(4)]).is_err());
        assert!(validate_peers(&key, &[peer(2), peer(2)]).is_err());
        assert!(validate_peers(&key, &[]).is_err());
    }
}
