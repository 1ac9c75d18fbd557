//! `hcloud_volume`: block storage volumes, optionally attached to a server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::action::{wait_for_action, wait_for_actions};
use crate::api::CloudApi;
use crate::client::{Client, ResourceRef};
use crate::error::{ApiError, InvalidId, ProviderError};
use crate::models::{Id, Labels, Volume, VolumeCreateOpts, VolumeUpdateOpts};
use crate::resources::{from_state, gone_if_not_found, parse_id, to_state, vanished};
use crate::retry::{retry_on_transient, Completion, RetryPolicy};
use crate::schema::{Attribute, Schema};

/// Resource type name.
pub const TYPE_NAME: &str = "hcloud_volume";

const KIND: &str = "volume";

/// State of one volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeState {
    /// Volume id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Volume name.
    pub name: String,
    /// Size in GB.
    pub size: u32,
    /// Location name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// `0` or unset means detached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<Id>,
    /// User labels.
    #[serde(skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    /// Device path inside the attached server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux_device: Option<String>,
    /// Mount the volume after attaching. Used at creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automount: Option<bool>,
    /// Filesystem to format with. Used at creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl VolumeState {
    fn attached_to(&self) -> Option<Id> {
        self.server_id.filter(|id| *id != 0)
    }

    fn refresh(&mut self, volume: &Volume) {
        self.id = Some(volume.id.to_string());
        self.name = volume.name.clone();
        self.size = volume.size;
        self.location = Some(volume.location.name.clone());
        self.server_id = volume.server;
        self.labels = volume.labels.clone();
        self.linux_device = Some(volume.linux_device.clone());
    }
}

/// Schema of `hcloud_volume`.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("A block storage volume")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("name", Attribute::required_string())
        .with_attribute(
            "size",
            Attribute::required_int64().with_description("Size of the volume in GB"),
        )
        .with_attribute(
            "location",
            Attribute::optional_computed_string().with_force_new(),
        )
        .with_attribute(
            "server_id",
            Attribute::optional_computed_int64()
                .with_description("Server the volume is attached to"),
        )
        .with_attribute("labels", Attribute::string_map())
        .with_attribute("linux_device", Attribute::computed_string())
        .with_attribute("automount", Attribute::optional_bool())
        .with_attribute(
            "format",
            Attribute::optional_string().with_description("Filesystem to format the volume with"),
        )
}

/// Create a volume and wait until it is ready (and attached, if requested).
pub async fn create<C: CloudApi + ?Sized>(
    client: &Client<C>,
    planned: Value,
) -> Result<Value, ProviderError> {
    let planned: VolumeState = from_state(planned)?;
    let opts = VolumeCreateOpts {
        name: planned.name.clone(),
        size: planned.size,
        server: planned.attached_to(),
        location: planned.location.clone(),
        labels: planned.labels.clone(),
        automount: planned.automount,
        format: planned.format.clone(),
    };

    let created = client.api().create_volume(opts).await?;
    let id = created.resource.id;
    info!(id, name = %planned.name, "Created volume ({})", id);
    wait_for_actions(
        client,
        &created.action,
        &created.next_actions,
        ResourceRef::volume(id),
    )
    .await?;

    let state = VolumeState {
        id: Some(id.to_string()),
        ..planned
    };
    read(client, to_state(&state)?)
        .await?
        .ok_or_else(|| vanished(KIND, &id.to_string()))
}

/// Refresh state from the volume. `None` when it no longer exists.
pub async fn read<C: CloudApi + ?Sized>(
    client: &Client<C>,
    current: Value,
) -> Result<Option<Value>, ProviderError> {
    let mut state: VolumeState = from_state(current)?;
    let Some(id) = parse_id(KIND, state.id.as_deref()) else {
        return Ok(None);
    };

    let Some(volume) = client.api().get_volume(id).await? else {
        warn!(id, "Volume ({}) not found, removing from state", id);
        return Ok(None);
    };

    state.refresh(&volume);
    Ok(Some(to_state(&state)?))
}

/// Apply changed attributes one by one. A volume that disappears midway is
/// dropped from state.
pub async fn update<C: CloudApi + ?Sized>(
    client: &Client<C>,
    prior: Value,
    planned: Value,
) -> Result<Option<Value>, ProviderError> {
    let prior: VolumeState = from_state(prior)?;
    let planned: VolumeState = from_state(planned)?;
    let Some(id) = parse_id(KIND, prior.id.as_deref()) else {
        return Ok(None);
    };

    let Some(volume) = client.api().get_volume(id).await? else {
        warn!(id, "Volume ({}) not found, removing from state", id);
        return Ok(None);
    };

    let applied = apply_changes(client, &volume, &prior, &planned).await;
    if gone_if_not_found(KIND, id, applied)?.is_none() {
        return Ok(None);
    }

    let state = VolumeState {
        id: Some(id.to_string()),
        ..planned
    };
    read(client, to_state(&state)?).await
}

async fn apply_changes<C: CloudApi + ?Sized>(
    client: &Client<C>,
    volume: &Volume,
    prior: &VolumeState,
    planned: &VolumeState,
) -> Result<(), ApiError> {
    let api = client.api();
    let id = volume.id;
    let owner = ResourceRef::volume(id);

    if planned.name != prior.name {
        api.update_volume(
            id,
            VolumeUpdateOpts {
                name: Some(planned.name.clone()),
                ..Default::default()
            },
        )
        .await?;
    }

    if planned.attached_to() != prior.attached_to() {
        let policy = RetryPolicy::unbounded();
        if volume.server.is_some() {
            let action = retry_on_transient(&policy, owner, || api.detach_volume(id)).await?;
            if let Completion::Done(action) = action {
                wait_for_action(client, &action, owner).await?;
            }
        }
        if let Some(server) = planned.attached_to() {
            let action =
                retry_on_transient(&policy, owner, || api.attach_volume(id, server)).await?;
            if let Completion::Done(action) = action {
                wait_for_action(client, &action, owner).await?;
            }
        }
    }

    if planned.size != prior.size {
        let action = api.resize_volume(id, planned.size).await?;
        wait_for_action(client, &action, owner).await?;
    }

    if planned.labels != prior.labels {
        api.update_volume(
            id,
            VolumeUpdateOpts {
                labels: Some(planned.labels.clone()),
                ..Default::default()
            },
        )
        .await?;
    }

    Ok(())
}

/// Detach the volume if needed, then delete it. Missing volumes count as
/// deleted.
pub async fn delete<C: CloudApi + ?Sized>(
    client: &Client<C>,
    current: Value,
) -> Result<(), ProviderError> {
    let state: VolumeState = from_state(current)?;
    let Some(id) = parse_id(KIND, state.id.as_deref()) else {
        return Ok(());
    };

    let api = client.api();
    let Some(volume) = api.get_volume(id).await? else {
        return Ok(());
    };

    let owner = ResourceRef::volume(id);
    let policy = RetryPolicy::unbounded().not_found_is_done();
    if volume.server.is_some() {
        if let Completion::Done(action) =
            retry_on_transient(&policy, owner, || api.detach_volume(id)).await?
        {
            wait_for_action(client, &action, owner).await?;
        }
    }

    retry_on_transient(&policy, owner, || api.delete_volume(id)).await?;
    Ok(())
}

/// Import a volume by its numeric id.
pub async fn import<C: CloudApi + ?Sized>(
    client: &Client<C>,
    id: &str,
) -> Result<Value, ProviderError> {
    if id.parse::<Id>().is_err() {
        return Err(InvalidId(id.to_string()).into());
    }
    let state = VolumeState {
        id: Some(id.to_string()),
        ..Default::default()
    };
    read(client, to_state(&state)?)
        .await?
        .ok_or_else(|| ProviderError::NotFound(format!("volume {}", id)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::ErrorCode;
    use crate::testing::{server_fixture, volume_fixture, FakeCloud};

    fn setup() -> (Arc<FakeCloud>, Client<FakeCloud>) {
        let fake = Arc::new(FakeCloud::new());
        fake.add_server(server_fixture(1));
        fake.add_server(server_fixture(2));
        let client = Client::new(Arc::clone(&fake));
        (fake, client)
    }

    fn attached_volume(fake: &FakeCloud, id: Id, server: Id) {
        let mut volume = volume_fixture(id);
        volume.server = Some(server);
        fake.add_volume(volume);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_in_location() {
        let (fake, client) = setup();

        let state = create(
            &client,
            json!({"name": "data", "size": 10, "location": "nbg1", "labels": {"env": "prod"}}),
        )
        .await
        .unwrap();

        assert_eq!(state["id"], "1000");
        assert_eq!(state["location"], "nbg1");
        assert_eq!(state["labels"]["env"], "prod");
        assert_eq!(state["linux_device"], "/dev/disk/by-id/scsi-0HC_Volume_1000");
        assert!(state.get("server_id").is_none());
        assert_eq!(fake.action_commands(), vec!["create_volume"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_attached_waits_for_all_actions() {
        let (fake, client) = setup();

        let state = create(
            &client,
            json!({"name": "data", "size": 10, "server_id": 2, "automount": true, "format": "ext4"}),
        )
        .await
        .unwrap();

        assert_eq!(state["server_id"], 2);
        assert_eq!(state["location"], "fsn1");
        assert_eq!(state["automount"], true);
        assert_eq!(state["format"], "ext4");
        assert_eq!(fake.action_commands(), vec!["create_volume", "attach_volume"]);
        assert_eq!(fake.action_polls(1), 1);
        assert_eq!(fake.action_polls(2), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_surfaces_failed_attach() {
        let (fake, client) = setup();
        fake.fail_action(
            "attach_volume",
            ErrorCode::Other("action_failed".into()),
            "server is busy",
        );

        let err = create(&client, json!({"name": "data", "size": 10, "server_id": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "server is busy");
    }

    #[tokio::test]
    async fn test_read_drift() {
        let (fake, client) = setup();
        fake.add_volume(volume_fixture(7));

        let state = read(&client, json!({"id": "7", "automount": false}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["name"], "volume-7");
        assert_eq!(state["size"], 10);
        assert_eq!(state["automount"], false);

        fake.remove_volume(7);
        assert_eq!(read(&client, json!({"id": "7"})).await.unwrap(), None);
        assert_eq!(read(&client, json!({"id": "seven"})).await.unwrap(), None);
        assert_eq!(fake.calls("get_volume"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_name_size_and_labels() {
        let (fake, client) = setup();
        fake.add_volume(volume_fixture(7));
        let prior = read(&client, json!({"id": "7"})).await.unwrap().unwrap();

        let mut planned = prior.clone();
        planned["name"] = json!("renamed");
        planned["size"] = json!(20);
        planned["labels"] = json!({"tier": "db"});

        let state = update(&client, prior, planned).await.unwrap().unwrap();
        assert_eq!(state["name"], "renamed");
        assert_eq!(state["size"], 20);
        assert_eq!(state["labels"], json!({"tier": "db"}));
        assert_eq!(fake.calls("update_volume"), 2);
        assert_eq!(fake.action_commands(), vec!["resize_volume"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_moves_volume_between_servers() {
        let (fake, client) = setup();
        attached_volume(&fake, 7, 1);
        let prior = read(&client, json!({"id": "7"})).await.unwrap().unwrap();

        let mut planned = prior.clone();
        planned["server_id"] = json!(2);

        let state = update(&client, prior, planned).await.unwrap().unwrap();
        assert_eq!(state["server_id"], 2);
        assert_eq!(fake.action_commands(), vec!["detach_volume", "attach_volume"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_detaches_when_server_cleared() {
        let (fake, client) = setup();
        attached_volume(&fake, 7, 1);
        let prior = read(&client, json!({"id": "7"})).await.unwrap().unwrap();

        let mut planned = prior.clone();
        planned["server_id"] = json!(0);

        let state = update(&client, prior, planned).await.unwrap().unwrap();
        assert!(state.get("server_id").is_none());
        assert_eq!(fake.volume(7).unwrap().server, None);
        assert_eq!(fake.action_commands(), vec!["detach_volume"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_retries_locked_attach() {
        let (fake, client) = setup();
        fake.add_volume(volume_fixture(7));
        fake.fail_next("attach_volume", ApiError::new(ErrorCode::Locked, "locked"));
        let prior = read(&client, json!({"id": "7"})).await.unwrap().unwrap();

        let mut planned = prior.clone();
        planned["server_id"] = json!(1);

        let state = update(&client, prior, planned).await.unwrap().unwrap();
        assert_eq!(state["server_id"], 1);
        assert_eq!(fake.calls("attach_volume"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_clears_state_when_volume_vanishes() {
        let (fake, client) = setup();
        fake.add_volume(volume_fixture(7));
        fake.fail_next("resize_volume", ApiError::not_found("volume not found"));
        let prior = read(&client, json!({"id": "7"})).await.unwrap().unwrap();

        let mut planned = prior.clone();
        planned["size"] = json!(50);

        assert_eq!(update(&client, prior, planned).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_propagates_other_errors() {
        let (fake, client) = setup();
        fake.add_volume(volume_fixture(7));
        let prior = read(&client, json!({"id": "7"})).await.unwrap().unwrap();

        let mut planned = prior.clone();
        planned["size"] = json!(5);

        let err = update(&client, prior, planned).await.unwrap_err();
        assert_eq!(err.message(), "volumes can only be grown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_attached_volume() {
        let (fake, client) = setup();
        attached_volume(&fake, 7, 1);

        delete(&client, json!({"id": "7"})).await.unwrap();
        assert!(fake.volume(7).is_none());
        assert_eq!(fake.action_commands(), vec!["detach_volume"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_retries_while_locked() {
        let (fake, client) = setup();
        fake.add_volume(volume_fixture(7));
        fake.fail_next("delete_volume", ApiError::new(ErrorCode::Locked, "locked"));

        delete(&client, json!({"id": "7"})).await.unwrap();
        assert_eq!(fake.calls("delete_volume"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_missing_volume() {
        let (fake, client) = setup();

        delete(&client, json!({"id": "7"})).await.unwrap();
        delete(&client, json!({"id": "nope"})).await.unwrap();
        assert_eq!(fake.calls("delete_volume"), 0);

        fake.add_volume(volume_fixture(8));
        fake.fail_next("delete_volume", ApiError::not_found("already gone"));
        delete(&client, json!({"id": "8"})).await.unwrap();
        assert_eq!(fake.calls("delete_volume"), 1);
    }

    #[tokio::test]
    async fn test_import() {
        let (fake, client) = setup();
        fake.add_volume(volume_fixture(7));

        let state = import(&client, "7").await.unwrap();
        assert_eq!(state["name"], "volume-7");

        assert!(matches!(
            import(&client, "vol-7").await.unwrap_err(),
            ProviderError::InvalidId(_)
        ));
        assert!(matches!(
            import(&client, "8").await.unwrap_err(),
            ProviderError::NotFound(_)
        ));
    }
}
