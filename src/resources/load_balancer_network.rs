//! `hcloud_load_balancer_network`: attaches a load balancer to a private
//! network.
//!
//! The attachment has no remote id of its own; it is keyed by the composite
//! `<load balancer id>-<network id>`. Every attribute forces replacement.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::action::wait_for_action;
use crate::api::CloudApi;
use crate::client::{Client, ResourceRef};
use crate::error::{ApiError, ProviderError};
use crate::models::{Id, LoadBalancerAttachToNetworkOpts};
use crate::relationship::{decode_load_balancer_network_id, encode_relationship_id};
use crate::resources::{from_state, to_state, vanished};
use crate::retry::{retry_on_transient, Completion, RetryPolicy};
use crate::schema::{Attribute, Schema};

/// Resource type name.
pub const TYPE_NAME: &str = "hcloud_load_balancer_network";

fn default_true() -> bool {
    true
}

/// State of one attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerNetworkState {
    /// Composite `<load balancer id>-<network id>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The load balancer to attach.
    #[serde(default)]
    pub load_balancer_id: Id,
    /// The network to attach to.
    #[serde(default)]
    pub network_id: Id,
    /// Private address of the load balancer in the network.
    #[serde(default)]
    pub ip: Option<String>,
    /// Whether the public interface stays enabled.
    #[serde(default = "default_true")]
    pub enable_public_interface: bool,
}

/// Schema of `hcloud_load_balancer_network`.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Attaches a load balancer to a private network")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "load_balancer_id",
            Attribute::required_int64().with_force_new(),
        )
        .with_attribute("network_id", Attribute::required_int64().with_force_new())
        .with_attribute(
            "ip",
            Attribute::optional_computed_string()
                .with_force_new()
                .with_description("Private IP of the load balancer, picked by the platform when unset"),
        )
        .with_attribute(
            "enable_public_interface",
            Attribute::optional_bool()
                .with_force_new()
                .with_default(json!(true)),
        )
}

fn requested_ip(state: &LoadBalancerNetworkState) -> Result<Option<IpAddr>, ProviderError> {
    match state.ip.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ProviderError::Validation(format!("invalid ip address {:?}", raw))),
    }
}

async fn set_public_interface<C: CloudApi + ?Sized>(
    client: &Client<C>,
    load_balancer: Id,
    enable: bool,
) -> Result<(), ApiError> {
    let action = if enable {
        client
            .api()
            .enable_load_balancer_public_interface(load_balancer)
            .await?
    } else {
        client
            .api()
            .disable_load_balancer_public_interface(load_balancer)
            .await?
    };
    wait_for_action(client, &action, ResourceRef::load_balancer(load_balancer)).await
}

/// Attach the load balancer and read the attachment back.
pub async fn create<C: CloudApi + ?Sized>(
    client: &Client<C>,
    planned: Value,
) -> Result<Value, ProviderError> {
    let planned: LoadBalancerNetworkState = from_state(planned)?;
    let load_balancer = planned.load_balancer_id;
    let network = planned.network_id;
    let opts = LoadBalancerAttachToNetworkOpts {
        network,
        ip: requested_ip(&planned)?,
    };

    let api = client.api();
    let policy = RetryPolicy::unbounded().already_attached_is_done();
    let attached = retry_on_transient(&policy, ResourceRef::network(network), || {
        api.attach_load_balancer_to_network(load_balancer, opts.clone())
    })
    .await?;

    match attached {
        Completion::Done(action) => {
            wait_for_action(client, &action, ResourceRef::network(network)).await?;
            set_public_interface(client, load_balancer, planned.enable_public_interface).await?;
        },
        Completion::AlreadySatisfied => {
            info!(
                load_balancer,
                network,
                "Load balancer ({}) already attached to network {}", load_balancer, network
            );
        },
    }

    let id = encode_relationship_id(load_balancer, network);
    let state = LoadBalancerNetworkState {
        id: Some(id.clone()),
        ..planned
    };
    read(client, to_state(&state)?)
        .await?
        .ok_or_else(|| vanished(TYPE_NAME, &id))
}

/// Refresh the attachment. Any id that does not resolve drops the state.
pub async fn read<C: CloudApi + ?Sized>(
    client: &Client<C>,
    current: Value,
) -> Result<Option<Value>, ProviderError> {
    let mut state: LoadBalancerNetworkState = from_state(current)?;
    let id = state.id.clone().unwrap_or_default();

    let resolved = match decode_load_balancer_network_id(client.api(), &id).await {
        Ok(resolved) => resolved,
        Err(err) => {
            warn!(id = %id, error = %err, "Invalid id ({}), removing from state", id);
            return Ok(None);
        },
    };

    state.id = Some(resolved.id().to_string());
    state.load_balancer_id = resolved.load_balancer.id;
    state.network_id = resolved.network.id;
    state.ip = Some(resolved.private_net.ip.to_string());
    Ok(Some(to_state(&state)?))
}

/// Every attribute forces replacement, so there is nothing to update.
pub async fn update<C: CloudApi + ?Sized>(
    _client: &Client<C>,
    _prior: Value,
    _planned: Value,
) -> Result<Option<Value>, ProviderError> {
    Err(ProviderError::Unimplemented(format!(
        "{} cannot be updated in place",
        TYPE_NAME
    )))
}

/// Detach the load balancer. Stale ids and missing attachments count as done.
pub async fn delete<C: CloudApi + ?Sized>(
    client: &Client<C>,
    current: Value,
) -> Result<(), ProviderError> {
    let state: LoadBalancerNetworkState = from_state(current)?;
    let id = state.id.unwrap_or_default();

    let resolved = match decode_load_balancer_network_id(client.api(), &id).await {
        Ok(resolved) => resolved,
        Err(err) => {
            warn!(id = %id, error = %err, "Invalid id ({}), removing from state", id);
            return Ok(());
        },
    };
    let load_balancer = resolved.load_balancer.id;
    let network = resolved.network.id;

    let api = client.api();
    let policy = RetryPolicy::unbounded().not_found_is_done();
    let detached = retry_on_transient(&policy, ResourceRef::network(network), || {
        api.detach_load_balancer_from_network(load_balancer, network)
    })
    .await?;

    if let Completion::Done(action) = detached {
        wait_for_action(client, &action, ResourceRef::network(network)).await?;
    }
    Ok(())
}

/// Import an attachment by its composite id.
pub async fn import<C: CloudApi + ?Sized>(
    client: &Client<C>,
    id: &str,
) -> Result<Value, ProviderError> {
    let resolved = decode_load_balancer_network_id(client.api(), id).await?;
    to_state(&LoadBalancerNetworkState {
        id: Some(resolved.id().to_string()),
        load_balancer_id: resolved.load_balancer.id,
        network_id: resolved.network.id,
        ip: Some(resolved.private_net.ip.to_string()),
        enable_public_interface: resolved.load_balancer.public_interface_enabled,
    })
}
