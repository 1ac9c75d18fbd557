//! Composite ids for resources that model a link between two remote resources.
//!
//! The link itself has no remote id, so the local state keys it as
//! `<left id>-<right id>`, e.g. `123-456` for load balancer 123 attached to
//! network 456. Decoding resolves both halves against the API and fails with
//! [`InvalidId`] unless the relationship currently exists.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::api::CloudApi;
use crate::error::InvalidId;
use crate::models::{Id, LoadBalancer, LoadBalancerPrivateNet, Network};

/// A parsed `<left>-<right>` id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationshipId {
    /// Id of the owning side (e.g. the load balancer).
    pub left: Id,
    /// Id of the referenced side (e.g. the network).
    pub right: Id,
}

impl RelationshipId {
    /// Create an id from its two halves.
    pub fn new(left: Id, right: Id) -> Self {
        Self { left, right }
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.left, self.right)
    }
}

impl FromStr for RelationshipId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidId(s.to_string());

        let (left, right) = s.split_once('-').ok_or_else(invalid)?;
        if left.is_empty() || right.is_empty() {
            return Err(invalid());
        }

        let left = left.parse::<Id>().map_err(|_| invalid())?;
        let right = right.parse::<Id>().map_err(|_| invalid())?;
        Ok(Self { left, right })
    }
}

/// Encode two ids as a composite id.
pub fn encode_relationship_id(left: Id, right: Id) -> String {
    RelationshipId::new(left, right).to_string()
}

/// A load balancer's attachment to a private network, resolved remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerNetwork {
    /// The load balancer.
    pub load_balancer: LoadBalancer,
    /// The network.
    pub network: Network,
    /// The attachment record on the load balancer.
    pub private_net: LoadBalancerPrivateNet,
}

impl LoadBalancerNetwork {
    /// The composite id of this attachment.
    pub fn id(&self) -> RelationshipId {
        RelationshipId::new(self.load_balancer.id, self.network.id)
    }
}

/// Resolve a `<load balancer id>-<network id>` id.
///
/// Fails with [`InvalidId`] if the id is malformed, if either resource is
/// gone (or cannot be fetched), or if the load balancer is not attached to
/// the network.
pub async fn decode_load_balancer_network_id<C: CloudApi + ?Sized>(
    api: &C,
    id: &str,
) -> Result<LoadBalancerNetwork, InvalidId> {
    let invalid = || InvalidId(id.to_string());
    let parsed: RelationshipId = id.parse()?;

    let load_balancer = match api.get_load_balancer(parsed.left).await {
        Ok(Some(load_balancer)) => load_balancer,
        Ok(None) => return Err(invalid()),
        Err(err) => {
            debug!(id, error = %err, "Load balancer lookup failed");
            return Err(invalid());
        },
    };

    let network = match api.get_network(parsed.right).await {
        Ok(Some(network)) => network,
        Ok(None) => return Err(invalid()),
        Err(err) => {
            debug!(id, error = %err, "Network lookup failed");
            return Err(invalid());
        },
    };

    let private_net = load_balancer
        .private_net
        .iter()
        .find(|private_net| private_net.network == network.id)
        .cloned()
        .ok_or_else(invalid)?;

    Ok(LoadBalancerNetwork {
        load_balancer,
        network,
        private_net,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ErrorCode};
    use crate::testing::{load_balancer_fixture, network_fixture, FakeCloud};

    fn attached_fixture() -> FakeCloud {
        let fake = FakeCloud::new();
        let mut load_balancer = load_balancer_fixture(123);
        load_balancer.private_net.push(LoadBalancerPrivateNet {
            network: 456,
            ip: "10.0.1.5".parse().unwrap(),
        });
        fake.add_load_balancer(load_balancer);
        fake.add_network(network_fixture(456));
        fake.add_network(network_fixture(999));
        fake
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode_relationship_id(123, 456), "123-456");
    }

    #[test]
    fn test_parse_round_trip() {
        for (left, right) in [(1, 2), (123, 456), (9_000_000_001, 7)] {
            let parsed: RelationshipId = encode_relationship_id(left, right).parse().unwrap();
            assert_eq!(parsed, RelationshipId::new(left, right));
        }
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        for id in ["", "-", "123", "123-", "-456", "abc-456", "123-abc", "12 3-456", "1.5-2"] {
            assert_eq!(
                id.parse::<RelationshipId>(),
                Err(InvalidId(id.to_string())),
                "{:?} should be rejected",
                id
            );
        }
    }

    #[tokio::test]
    async fn test_decode_existing_attachment() {
        let fake = attached_fixture();

        let resolved = decode_load_balancer_network_id(&fake, "123-456").await.unwrap();
        assert_eq!(resolved.load_balancer.id, 123);
        assert_eq!(resolved.network.id, 456);
        assert_eq!(resolved.private_net.ip.to_string(), "10.0.1.5");
        assert_eq!(resolved.id().to_string(), "123-456");
    }

    #[tokio::test]
    async fn test_decode_missing_attachment() {
        let fake = attached_fixture();

        let err = decode_load_balancer_network_id(&fake, "123-999").await.unwrap_err();
        assert_eq!(err, InvalidId("123-999".to_string()));
    }

    #[tokio::test]
    async fn test_decode_missing_load_balancer() {
        let fake = attached_fixture();

        // Right half is valid, left one is gone.
        let err = decode_load_balancer_network_id(&fake, "77-456").await.unwrap_err();
        assert_eq!(err, InvalidId("77-456".to_string()));
        assert_eq!(fake.calls("get_network"), 0);
    }

    #[tokio::test]
    async fn test_decode_missing_network() {
        let fake = attached_fixture();

        let err = decode_load_balancer_network_id(&fake, "123-5").await.unwrap_err();
        assert_eq!(err, InvalidId("123-5".to_string()));
    }

    #[tokio::test]
    async fn test_decode_malformed_id_makes_no_calls() {
        let fake = attached_fixture();

        assert!(decode_load_balancer_network_id(&fake, "not-an-id").await.is_err());
        assert_eq!(fake.calls("get_load_balancer"), 0);
    }

    #[tokio::test]
    async fn test_lookup_errors_collapse_into_invalid_id() {
        let fake = attached_fixture();
        fake.fail_next(
            "get_load_balancer",
            ApiError::new(ErrorCode::ServiceError, "boom"),
        );

        let err = decode_load_balancer_network_id(&fake, "123-456").await.unwrap_err();
        assert_eq!(err, InvalidId("123-456".to_string()));
    }
}
