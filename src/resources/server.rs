//! `hcloud_server`: virtual machines.
//!
//! Besides the server itself this resource manages three toggles that are
//! separate API actions: automatic backups, a mounted ISO and the rescue
//! system. Changing the ISO or the rescue system resets the server.
//!
//! `user_data` is never stored verbatim. State holds a base64 SHA-256
//! fingerprint of the script and [`plan`] compares fingerprints.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::action::{wait_for_action, wait_for_actions};
use crate::api::CloudApi;
use crate::client::{Client, ResourceRef};
use crate::error::{ApiError, InvalidId, ProviderError};
use crate::models::{
    Id, Labels, Server, ServerChangeTypeOpts, ServerCreateOpts, ServerEnableRescueOpts,
    ServerStatus, ServerUpdateOpts,
};
use crate::resources::{from_state, parse_id, to_state, vanished};
use crate::retry::{retry_on_transient, RetryPolicy};
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::types::{plan_changes, PlanResult};
use crate::validation::validate;

/// Resource type name.
pub const TYPE_NAME: &str = "hcloud_server";

const KIND: &str = "server";

/// Attempts at enabling the rescue system before giving up.
const RESCUE_ATTEMPTS: u32 = 5;

/// State of one server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerState {
    /// Server id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Server name.
    pub name: String,
    /// Server type name.
    pub server_type: String,
    /// Image name, or its id for unnamed images.
    pub image: String,
    /// Location name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Datacenter name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    /// Raw script in a plan, fingerprint in state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    /// SSH key names or ids, used at creation only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<String>,
    /// Keep the disk size when changing the server type.
    pub keep_disk: bool,
    /// Backup window, set while backups are enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_window: Option<String>,
    /// Whether backups are enabled.
    pub backups: bool,
    /// Primary IPv4 address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_address: Option<String>,
    /// First address of the IPv6 block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6_address: Option<String>,
    /// IPv6 block in CIDR notation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6_network: Option<String>,
    /// Lifecycle status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// ISO name or id to mount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso: Option<String>,
    /// Rescue system to boot, e.g. `linux64`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rescue: Option<String>,
    /// User labels.
    #[serde(skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

impl ServerState {
    fn iso(&self) -> Option<&str> {
        self.iso.as_deref().filter(|iso| !iso.is_empty())
    }

    fn rescue(&self) -> Option<&str> {
        self.rescue.as_deref().filter(|rescue| !rescue.is_empty())
    }

    fn refresh(&mut self, server: &Server) {
        self.id = Some(server.id.to_string());
        self.name = server.name.clone();
        self.datacenter = Some(server.datacenter.name.clone());
        self.location = Some(server.datacenter.location.name.clone());
        self.status = Some(server.status.as_str().to_string());
        self.server_type = server.server_type.name.clone();
        self.ipv4_address = Some(server.public_net.ipv4.to_string());
        self.ipv6_address = Some(format!("{}1", server.public_net.ipv6_ip()));
        self.ipv6_network = Some(server.public_net.ipv6_network.clone());
        self.backup_window = server.backup_window.clone();
        self.backups = server.backup_window.is_some();
        self.labels = server.labels.clone();
        if let Some(image) = &server.image {
            self.image = image.name.clone().unwrap_or_else(|| image.id.to_string());
        }
    }
}

/// Schema of `hcloud_server`.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("A cloud server")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("name", Attribute::required_string())
        .with_attribute("server_type", Attribute::required_string())
        .with_attribute(
            "image",
            Attribute::required_string()
                .with_force_new()
                .with_description("Image id or name to boot from"),
        )
        .with_attribute(
            "location",
            Attribute::optional_computed_string().with_force_new(),
        )
        .with_attribute(
            "datacenter",
            Attribute::optional_computed_string().with_force_new(),
        )
        .with_attribute(
            "user_data",
            Attribute::optional_computed_string()
                .with_force_new()
                .with_description("Cloud-init script, stored as a fingerprint"),
        )
        .with_attribute("ssh_keys", Attribute::string_list().with_force_new())
        .with_attribute(
            "keep_disk",
            Attribute::optional_bool()
                .with_default(json!(false))
                .with_description("Keep the disk size when changing the server type"),
        )
        .with_attribute(
            "backup_window",
            Attribute::computed_string()
                .deprecated("You should remove this property from your terraform configuration."),
        )
        .with_attribute(
            "backups",
            Attribute::optional_bool().with_default(json!(false)),
        )
        .with_attribute("ipv4_address", Attribute::computed_string())
        .with_attribute("ipv6_address", Attribute::computed_string())
        .with_attribute("ipv6_network", Attribute::computed_string())
        .with_attribute("status", Attribute::computed_string())
        .with_attribute("iso", Attribute::optional_string())
        .with_attribute(
            "rescue",
            Attribute::optional_string().with_description("Rescue system to boot, e.g. linux64"),
        )
        .with_attribute("labels", Attribute::string_map())
}

/// Schema validation plus the checks the schema cannot express.
pub fn validate_config(config: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = validate(&schema(), config);
    if config.get("image").and_then(Value::as_str) == Some("") {
        diagnostics.push(
            Diagnostic::error(
                "\"image\" must have more then 0 characters. Have you set the name instead of an ID?",
            )
            .with_attribute("image"),
        );
    }
    diagnostics
}

/// Fingerprint of a cloud-init script as kept in state.
pub fn user_data_fingerprint(user_data: &str) -> String {
    STANDARD.encode(Sha256::digest(user_data.as_bytes()))
}

/// Whether the stored value already describes the proposed script.
///
/// Older state may hold the raw script instead of its fingerprint. Such a
/// value is not valid base64 and is fingerprinted before comparing.
fn user_data_unchanged(stored: &str, proposed: &str) -> bool {
    let fingerprint = user_data_fingerprint(proposed);
    if STANDARD.decode(stored).is_err() {
        return user_data_fingerprint(stored) == fingerprint;
    }
    stored.trim() == fingerprint.trim()
}

/// Diff a proposed config against prior state, comparing `user_data` by
/// fingerprint.
pub fn plan(prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let schema = schema();
    let mut plan = plan_changes(&schema, prior, proposed);

    let stored = prior
        .and_then(|prior| prior.get("user_data"))
        .and_then(Value::as_str);
    let wanted = proposed
        .get("user_data")
        .and_then(Value::as_str)
        .filter(|user_data| !user_data.is_empty());

    match (stored, wanted) {
        (Some(stored), Some(wanted)) if user_data_unchanged(stored, wanted) => {
            plan.changes.retain(|change| change.path != "user_data");
            if let Some(planned) = plan.planned_state.as_object_mut() {
                planned.insert("user_data".to_string(), json!(stored));
            }
        },
        (_, Some(wanted)) => {
            if let Some(change) = plan
                .changes
                .iter_mut()
                .find(|change| change.path == "user_data")
            {
                change.after = Some(json!(user_data_fingerprint(wanted)));
            }
        },
        _ => {},
    }

    plan.requires_replace = prior.is_some()
        && plan.changes.iter().any(|change| {
            schema
                .attribute(&change.path)
                .is_some_and(|attr| attr.force_new)
        });
    plan
}

async fn resolve_ssh_keys<C: CloudApi + ?Sized>(
    client: &Client<C>,
    ssh_keys: &[String],
) -> Result<Vec<Id>, ProviderError> {
    let mut ids = Vec::with_capacity(ssh_keys.len());
    for key in ssh_keys {
        match client.api().find_ssh_key(key).await? {
            Some(ssh_key) => ids.push(ssh_key.id),
            None => return Err(ProviderError::NotFound(format!("SSH key not found: {}", key))),
        }
    }
    Ok(ids)
}

/// Create a server, then apply backups, ISO and rescue settings.
pub async fn create<C: CloudApi + ?Sized>(
    client: &Client<C>,
    planned: Value,
) -> Result<Value, ProviderError> {
    let mut planned: ServerState = from_state(planned)?;

    let image = client
        .api()
        .find_image(&planned.image)
        .await?
        .ok_or_else(|| ProviderError::NotFound(format!("image not found: {}", planned.image)))?;
    let ssh_keys = resolve_ssh_keys(client, &planned.ssh_keys).await?;

    let opts = ServerCreateOpts {
        name: planned.name.clone(),
        server_type: planned.server_type.clone(),
        image: image.id,
        ssh_keys: ssh_keys.clone(),
        location: planned.location.clone(),
        datacenter: planned.datacenter.clone(),
        user_data: planned.user_data.clone(),
        labels: planned.labels.clone(),
    };
    let created = client.api().create_server(opts).await?;
    let server = created.resource;
    let owner = ResourceRef::server(server.id);
    info!(id = server.id, name = %server.name, "Created server ({})", server.id);
    wait_for_actions(client, &created.action, &created.next_actions, owner).await?;

    set_backups(client, &server, planned.backups).await?;
    if let Some(iso) = planned.iso() {
        set_iso(client, &server, Some(iso)).await?;
    }
    if let Some(rescue) = planned.rescue() {
        set_rescue(client, &server, Some(rescue), &ssh_keys).await?;
    }

    planned.id = Some(server.id.to_string());
    planned.user_data = planned.user_data.as_deref().map(user_data_fingerprint);
    read(client, to_state(&planned)?)
        .await?
        .ok_or_else(|| vanished(KIND, &server.id.to_string()))
}

/// Refresh state from the server. `None` when it no longer exists.
pub async fn read<C: CloudApi + ?Sized>(
    client: &Client<C>,
    current: Value,
) -> Result<Option<Value>, ProviderError> {
    let mut state: ServerState = from_state(current)?;
    let Some(id) = parse_id(KIND, state.id.as_deref()) else {
        return Ok(None);
    };

    let Some(server) = client.api().get_server(id).await? else {
        warn!(id, "Server ({}) not found, removing from state", id);
        return Ok(None);
    };

    state.refresh(&server);
    Ok(Some(to_state(&state)?))
}

/// Apply changed attributes. A server that disappears midway is dropped
/// from state.
pub async fn update<C: CloudApi + ?Sized>(
    client: &Client<C>,
    prior: Value,
    planned: Value,
) -> Result<Option<Value>, ProviderError> {
    let prior: ServerState = from_state(prior)?;
    let planned: ServerState = from_state(planned)?;
    let Some(id) = parse_id(KIND, prior.id.as_deref()) else {
        return Ok(None);
    };

    let Some(server) = client.api().get_server(id).await? else {
        warn!(id, "Server ({}) not found, removing from state", id);
        return Ok(None);
    };

    match apply_changes(client, &server, &prior, &planned).await {
        Ok(()) => {},
        Err(ProviderError::Api(err)) if err.is_not_found() => {
            warn!(id, "Server ({}) not found, removing from state", id);
            return Ok(None);
        },
        Err(err) => return Err(err),
    }

    let state = ServerState {
        id: Some(id.to_string()),
        ..planned
    };
    read(client, to_state(&state)?).await
}

async fn apply_changes<C: CloudApi + ?Sized>(
    client: &Client<C>,
    server: &Server,
    prior: &ServerState,
    planned: &ServerState,
) -> Result<(), ProviderError> {
    let api = client.api();
    let id = server.id;
    let owner = ResourceRef::server(id);

    if planned.name != prior.name {
        api.update_server(
            id,
            ServerUpdateOpts {
                name: Some(planned.name.clone()),
                ..Default::default()
            },
        )
        .await?;
    }

    if planned.labels != prior.labels {
        api.update_server(
            id,
            ServerUpdateOpts {
                labels: Some(planned.labels.clone()),
                ..Default::default()
            },
        )
        .await?;
    }

    if planned.server_type != prior.server_type {
        if server.status == ServerStatus::Running {
            let action = api.power_off_server(id).await?;
            wait_for_action(client, &action, owner).await?;
        }
        let action = api
            .change_server_type(
                id,
                ServerChangeTypeOpts {
                    server_type: planned.server_type.clone(),
                    upgrade_disk: !planned.keep_disk,
                },
            )
            .await?;
        wait_for_action(client, &action, owner).await?;
    }

    if planned.backups != prior.backups {
        set_backups(client, server, planned.backups).await?;
    }

    if planned.iso() != prior.iso() {
        set_iso(client, server, planned.iso()).await?;
    }

    if planned.rescue() != prior.rescue() {
        let ssh_keys = resolve_ssh_keys(client, &planned.ssh_keys).await?;
        set_rescue(client, server, planned.rescue(), &ssh_keys).await?;
    }

    Ok(())
}

/// Delete the server. A server that is already gone counts as deleted.
pub async fn delete<C: CloudApi + ?Sized>(
    client: &Client<C>,
    current: Value,
) -> Result<(), ProviderError> {
    let state: ServerState = from_state(current)?;
    let Some(id) = parse_id(KIND, state.id.as_deref()) else {
        return Ok(());
    };

    let api = client.api();
    let policy = RetryPolicy::unbounded().not_found_is_done();
    retry_on_transient(&policy, ResourceRef::server(id), || api.delete_server(id)).await?;
    Ok(())
}

/// Import a server by its numeric id.
pub async fn import<C: CloudApi + ?Sized>(
    client: &Client<C>,
    id: &str,
) -> Result<Value, ProviderError> {
    if id.parse::<Id>().is_err() {
        return Err(InvalidId(id.to_string()).into());
    }
    let state = ServerState {
        id: Some(id.to_string()),
        ..Default::default()
    };
    read(client, to_state(&state)?)
        .await?
        .ok_or_else(|| ProviderError::NotFound(format!("server {}", id)))
}

/// Enable or disable automatic backups to match `backups`.
async fn set_backups<C: CloudApi + ?Sized>(
    client: &Client<C>,
    server: &Server,
    backups: bool,
) -> Result<(), ApiError> {
    let api = client.api();
    let id = server.id;
    let owner = ResourceRef::server(id);
    let policy = RetryPolicy::unbounded();

    let action = match (server.backup_window.is_some(), backups) {
        (true, false) => retry_on_transient(&policy, owner, || api.disable_server_backup(id)).await?,
        (false, true) => retry_on_transient(&policy, owner, || api.enable_server_backup(id)).await?,
        _ => return Ok(()),
    };
    if let Some(action) = action.done() {
        wait_for_action(client, &action, owner).await?;
    }
    Ok(())
}

/// Swap the mounted ISO and reset the server if anything changed.
async fn set_iso<C: CloudApi + ?Sized>(
    client: &Client<C>,
    server: &Server,
    iso: Option<&str>,
) -> Result<(), ProviderError> {
    let api = client.api();
    let id = server.id;
    let owner = ResourceRef::server(id);
    let mut changed = false;

    if server.iso.is_some() {
        changed = true;
        let action = api.detach_server_iso(id).await?;
        wait_for_action(client, &action, owner).await?;
    }

    if let Some(wanted) = iso {
        changed = true;
        let found = api
            .find_iso(wanted)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("ISO not found: {}", wanted)))?;
        let action = api.attach_server_iso(id, found.id).await?;
        wait_for_action(client, &action, owner).await?;
    }

    if changed {
        reset(client, id).await?;
    }
    Ok(())
}

/// Switch the rescue system and reset the server if anything changed.
///
/// Enabling is retried as a whole, including the wait, because the action
/// may fail while the server is still settling.
async fn set_rescue<C: CloudApi + ?Sized>(
    client: &Client<C>,
    server: &Server,
    rescue: Option<&str>,
    ssh_keys: &[Id],
) -> Result<(), ApiError> {
    let api = client.api();
    let id = server.id;
    let owner = ResourceRef::server(id);
    let mut changed = false;

    if server.rescue_enabled {
        changed = true;
        let action = api.disable_server_rescue(id).await?;
        wait_for_action(client, &action, owner).await?;
    }

    if let Some(rescue_type) = rescue {
        changed = true;
        let opts = ServerEnableRescueOpts {
            rescue_type: rescue_type.to_string(),
            ssh_keys: ssh_keys.to_vec(),
        };
        let policy = RetryPolicy::capped(RESCUE_ATTEMPTS).retry_failed_actions();
        retry_on_transient(&policy, owner, || {
            let opts = opts.clone();
            async move {
                let enabled = api.enable_server_rescue(id, opts).await?;
                wait_for_action(client, &enabled.action, owner).await?;
                Ok::<(), ApiError>(())
            }
        })
        .await?;
    }

    if changed {
        reset(client, id).await?;
    }
    Ok(())
}

async fn reset<C: CloudApi + ?Sized>(client: &Client<C>, id: Id) -> Result<(), ApiError> {
    let action = client.api().reset_server(id).await?;
    wait_for_action(client, &action, ResourceRef::server(id)).await
}
