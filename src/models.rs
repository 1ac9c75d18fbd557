//! Data types mirrored from the cloud API.
//!
//! These are the shapes the [`CloudApi`](crate::api::CloudApi) seam speaks. The
//! provider only holds copies of them; the platform owns the real state.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Platform-assigned resource id.
pub type Id = i64;

/// Labels attached to a resource.
pub type Labels = HashMap<String, String>;

/// Status of an asynchronous action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The action is still in progress.
    Running,
    /// The action finished successfully.
    Success,
    /// The action failed.
    Error,
}

/// Failure details of an action with status `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionError {
    /// Error code reported for the action.
    pub code: ErrorCode,
    /// Error message reported for the action.
    pub message: String,
}

/// Handle to an asynchronous state transition on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Action id.
    pub id: Id,
    /// Command name, e.g. `attach_volume`.
    pub command: String,
    /// Current status.
    pub status: ActionStatus,
    /// Progress in percent.
    pub progress: u8,
    /// Set when `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl Action {
    /// Create a running action.
    pub fn running(id: Id, command: impl Into<String>) -> Self {
        Self {
            id,
            command: command.into(),
            status: ActionStatus::Running,
            progress: 0,
            error: None,
        }
    }

    /// Whether the action reached `success` or `error`.
    pub fn is_finished(&self) -> bool {
        self.status != ActionStatus::Running
    }
}

/// Result of a create call that spawns several actions.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateResult<T> {
    /// The created resource.
    pub resource: T,
    /// The primary action.
    pub action: Action,
    /// Follow-up actions to await in order after the primary one.
    pub next_actions: Vec<Action>,
}

/// A location, e.g. `fsn1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Location id.
    pub id: Id,
    /// Location name.
    pub name: String,
}

/// A datacenter inside a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datacenter {
    /// Datacenter id.
    pub id: Id,
    /// Datacenter name, e.g. `fsn1-dc14`.
    pub name: String,
    /// The location the datacenter belongs to.
    pub location: Location,
}

/// A server plan, e.g. `cx11`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerType {
    /// Server type id.
    pub id: Id,
    /// Server type name.
    pub name: String,
}

/// Lifecycle status of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Being provisioned.
    Initializing,
    /// Booting.
    Starting,
    /// Powered on.
    Running,
    /// Shutting down.
    Stopping,
    /// Powered off.
    Off,
    /// Being deleted.
    Deleting,
    /// Being rebuilt from an image.
    Rebuilding,
    /// Moving to another host.
    Migrating,
    /// Any status this crate does not know.
    Unknown,
}

impl ServerStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Off => "off",
            Self::Deleting => "deleting",
            Self::Rebuilding => "rebuilding",
            Self::Migrating => "migrating",
            Self::Unknown => "unknown",
        }
    }
}

/// Public addressing of a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPublicNet {
    /// Primary IPv4 address.
    pub ipv4: Ipv4Addr,
    /// IPv6 network in CIDR notation, e.g. `2001:db8::/64`.
    pub ipv6_network: String,
}

impl ServerPublicNet {
    /// The network address of the IPv6 block, without the prefix length.
    pub fn ipv6_ip(&self) -> &str {
        self.ipv6_network
            .split_once('/')
            .map_or(self.ipv6_network.as_str(), |(ip, _)| ip)
    }
}

/// An ISO image that can be mounted into a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iso {
    /// ISO id.
    pub id: Id,
    /// ISO name.
    pub name: String,
}

/// A stored SSH public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    /// Key id.
    pub id: Id,
    /// Key name.
    pub name: String,
    /// MD5 fingerprint of the public key.
    pub fingerprint: String,
}

/// Availability of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Ready to boot from.
    Available,
    /// Still being written, e.g. a snapshot in progress.
    Creating,
}

/// A system image, snapshot, backup or app image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image id.
    pub id: Id,
    /// Snapshots and backups carry no name.
    pub name: Option<String>,
    /// `system`, `snapshot`, `backup` or `app`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Availability.
    pub status: ImageStatus,
    /// Free-form description.
    pub description: String,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Operating system family, e.g. `ubuntu`.
    pub os_flavor: String,
    /// Operating system version, if known.
    pub os_version: Option<String>,
    /// Whether the image boots from the rapid deploy cache.
    pub rapid_deploy: bool,
    /// Deprecation time, if the image is deprecated.
    pub deprecated: Option<DateTime<Utc>>,
    /// User labels.
    #[serde(default)]
    pub labels: Labels,
}

/// A server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Server id.
    pub id: Id,
    /// Server name.
    pub name: String,
    /// Lifecycle status.
    pub status: ServerStatus,
    /// Current plan.
    pub server_type: ServerType,
    /// Datacenter the server runs in.
    pub datacenter: Datacenter,
    /// The image the server was created from, if it still exists.
    pub image: Option<Image>,
    /// Public addresses.
    pub public_net: ServerPublicNet,
    /// Set while backups are enabled.
    pub backup_window: Option<String>,
    /// Whether the next boot goes into the rescue system.
    pub rescue_enabled: bool,
    /// Mounted ISO, if any.
    pub iso: Option<Iso>,
    /// User labels.
    #[serde(default)]
    pub labels: Labels,
}

/// A block storage volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume id.
    pub id: Id,
    /// Volume name.
    pub name: String,
    /// Size in GB.
    pub size: u32,
    /// Location the volume lives in.
    pub location: Location,
    /// Id of the server the volume is attached to.
    pub server: Option<Id>,
    /// Device path inside the attached server.
    pub linux_device: String,
    /// User labels.
    #[serde(default)]
    pub labels: Labels,
}

/// A private network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network id.
    pub id: Id,
    /// Network name.
    pub name: String,
    /// Address range in CIDR notation.
    pub ip_range: String,
}

/// Attachment record of a load balancer to a private network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerPrivateNet {
    /// The attached network.
    pub network: Id,
    /// Address of the load balancer inside the network.
    pub ip: IpAddr,
}

/// A load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    /// Load balancer id.
    pub id: Id,
    /// Load balancer name.
    pub name: String,
    /// Whether the public interface accepts traffic.
    pub public_interface_enabled: bool,
    /// Private network attachments.
    #[serde(default)]
    pub private_net: Vec<LoadBalancerPrivateNet>,
}

/// Parameters of a server create call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerCreateOpts {
    /// Server name.
    pub name: String,
    /// Server type name.
    pub server_type: String,
    /// Image to boot from.
    pub image: Id,
    /// SSH keys to install for root.
    pub ssh_keys: Vec<Id>,
    /// Location name. Mutually exclusive with `datacenter`.
    pub location: Option<String>,
    /// Datacenter name.
    pub datacenter: Option<String>,
    /// Cloud-init script.
    pub user_data: Option<String>,
    /// User labels.
    pub labels: Labels,
}

/// Fields left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerUpdateOpts {
    /// New name.
    pub name: Option<String>,
    /// Replacement label set.
    pub labels: Option<Labels>,
}

/// Parameters of a server type change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerChangeTypeOpts {
    /// Target server type name.
    pub server_type: String,
    /// Grow the disk to the new plan's size. Prevents downgrades later.
    pub upgrade_disk: bool,
}

/// Parameters of a rescue enable call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEnableRescueOpts {
    /// Rescue system flavour, e.g. `linux64`.
    pub rescue_type: String,
    /// SSH keys to install in the rescue system.
    pub ssh_keys: Vec<Id>,
}

/// Result of a rescue enable call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableRescueResult {
    /// Root password of the rescue system.
    pub root_password: String,
    /// The enable action.
    pub action: Action,
}

/// Parameters of a volume create call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeCreateOpts {
    /// Volume name.
    pub name: String,
    /// Size in GB.
    pub size: u32,
    /// Server to attach to right away.
    pub server: Option<Id>,
    /// Location name, required without `server`.
    pub location: Option<String>,
    /// User labels.
    pub labels: Labels,
    /// Mount the volume in the attached server.
    pub automount: Option<bool>,
    /// Filesystem to format the volume with, e.g. `ext4`.
    pub format: Option<String>,
}

/// Fields left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeUpdateOpts {
    /// New name.
    pub name: Option<String>,
    /// Replacement label set.
    pub labels: Option<Labels>,
}

/// Parameters of a load balancer network attach call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerAttachToNetworkOpts {
    /// Network to attach to.
    pub network: Id,
    /// Let the platform pick an address when unset.
    pub ip: Option<IpAddr>,
}

/// Filters of an image list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageListOpts {
    /// Label selector, e.g. `role=web`.
    pub label_selector: String,
    /// Only return images in one of these states. Empty means any.
    pub statuses: Vec<ImageStatus>,
}
