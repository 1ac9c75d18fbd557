//! The seam between resource adapters and the cloud API client.
//!
//! The HTTP client itself lives outside this crate. Anything implementing
//! [`CloudApi`] can back the provider; [`FakeCloud`](crate::testing::FakeCloud)
//! is the in-memory implementation used by the tests.
//!
//! Lookups return `Ok(None)` when the resource does not exist. Mutating calls
//! return the remote [`Action`] so callers can wait for it.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{
    Action, CreateResult, EnableRescueResult, Id, Image, ImageListOpts, Iso, LoadBalancer,
    LoadBalancerAttachToNetworkOpts, Network, Server, ServerChangeTypeOpts, ServerCreateOpts,
    ServerEnableRescueOpts, ServerUpdateOpts, SshKey, Volume, VolumeCreateOpts, VolumeUpdateOpts,
};

/// Operations the provider needs from the cloud API.
#[async_trait]
pub trait CloudApi: Send + Sync + 'static {
    // =========================================================================
    // Actions
    // =========================================================================

    /// Fetch the current state of an action.
    async fn get_action(&self, id: Id) -> Result<Option<Action>, ApiError>;

    // =========================================================================
    // Servers
    // =========================================================================

    /// Fetch a server.
    async fn get_server(&self, id: Id) -> Result<Option<Server>, ApiError>;

    /// Create a server. The follow-up actions boot it.
    async fn create_server(&self, opts: ServerCreateOpts)
        -> Result<CreateResult<Server>, ApiError>;

    /// Rename or relabel a server.
    async fn update_server(&self, id: Id, opts: ServerUpdateOpts) -> Result<Server, ApiError>;

    /// Delete a server.
    async fn delete_server(&self, id: Id) -> Result<(), ApiError>;

    /// Cut power to a server.
    async fn power_off_server(&self, id: Id) -> Result<Action, ApiError>;

    /// Hard-reset a server.
    async fn reset_server(&self, id: Id) -> Result<Action, ApiError>;

    /// Move a powered-off server to another plan.
    async fn change_server_type(
        &self,
        id: Id,
        opts: ServerChangeTypeOpts,
    ) -> Result<Action, ApiError>;

    /// Enable daily backups.
    async fn enable_server_backup(&self, id: Id) -> Result<Action, ApiError>;

    /// Disable backups and delete existing ones.
    async fn disable_server_backup(&self, id: Id) -> Result<Action, ApiError>;

    /// Mount an ISO. Takes effect on the next boot.
    async fn attach_server_iso(&self, id: Id, iso: Id) -> Result<Action, ApiError>;

    /// Unmount the ISO, if any.
    async fn detach_server_iso(&self, id: Id) -> Result<Action, ApiError>;

    /// Boot into the rescue system on the next reset.
    async fn enable_server_rescue(
        &self,
        id: Id,
        opts: ServerEnableRescueOpts,
    ) -> Result<EnableRescueResult, ApiError>;

    /// Boot from disk again on the next reset.
    async fn disable_server_rescue(&self, id: Id) -> Result<Action, ApiError>;

    // =========================================================================
    // Volumes
    // =========================================================================

    /// Fetch a volume.
    async fn get_volume(&self, id: Id) -> Result<Option<Volume>, ApiError>;

    /// Create a volume, attaching it if a server is given.
    async fn create_volume(&self, opts: VolumeCreateOpts)
        -> Result<CreateResult<Volume>, ApiError>;

    /// Rename or relabel a volume.
    async fn update_volume(&self, id: Id, opts: VolumeUpdateOpts) -> Result<Volume, ApiError>;

    /// Delete a detached volume.
    async fn delete_volume(&self, id: Id) -> Result<(), ApiError>;

    /// Attach a volume to a server.
    async fn attach_volume(&self, id: Id, server: Id) -> Result<Action, ApiError>;

    /// Detach a volume from its server.
    async fn detach_volume(&self, id: Id) -> Result<Action, ApiError>;

    /// Grow a volume to `size` GB.
    async fn resize_volume(&self, id: Id, size: u32) -> Result<Action, ApiError>;

    // =========================================================================
    // Load balancers & networks
    // =========================================================================

    /// Fetch a load balancer.
    async fn get_load_balancer(&self, id: Id) -> Result<Option<LoadBalancer>, ApiError>;

    /// Attach a load balancer to a private network.
    async fn attach_load_balancer_to_network(
        &self,
        id: Id,
        opts: LoadBalancerAttachToNetworkOpts,
    ) -> Result<Action, ApiError>;

    /// Detach a load balancer from a private network.
    async fn detach_load_balancer_from_network(
        &self,
        id: Id,
        network: Id,
    ) -> Result<Action, ApiError>;

    /// Accept traffic on the public interface.
    async fn enable_load_balancer_public_interface(&self, id: Id) -> Result<Action, ApiError>;

    /// Stop accepting traffic on the public interface.
    async fn disable_load_balancer_public_interface(&self, id: Id) -> Result<Action, ApiError>;

    /// Fetch a network.
    async fn get_network(&self, id: Id) -> Result<Option<Network>, ApiError>;

    // =========================================================================
    // Images, ISOs, SSH keys
    // =========================================================================

    /// Fetch an image by id.
    async fn get_image(&self, id: Id) -> Result<Option<Image>, ApiError>;

    /// Fetch an image by name.
    async fn get_image_by_name(&self, name: &str) -> Result<Option<Image>, ApiError>;

    /// List images matching a label selector.
    async fn list_images(&self, opts: ImageListOpts) -> Result<Vec<Image>, ApiError>;

    /// Fetch an ISO by id.
    async fn get_iso(&self, id: Id) -> Result<Option<Iso>, ApiError>;

    /// Fetch an ISO by name.
    async fn get_iso_by_name(&self, name: &str) -> Result<Option<Iso>, ApiError>;

    /// Fetch an SSH key by id.
    async fn get_ssh_key(&self, id: Id) -> Result<Option<SshKey>, ApiError>;

    /// Fetch an SSH key by name.
    async fn get_ssh_key_by_name(&self, name: &str) -> Result<Option<SshKey>, ApiError>;

    /// Look up an image by id, falling back to its name.
    async fn find_image(&self, id_or_name: &str) -> Result<Option<Image>, ApiError> {
        match id_or_name.parse::<Id>() {
            Ok(id) => self.get_image(id).await,
            Err(_) => self.get_image_by_name(id_or_name).await,
        }
    }

    /// Look up an ISO by id, falling back to its name.
    async fn find_iso(&self, id_or_name: &str) -> Result<Option<Iso>, ApiError> {
        match id_or_name.parse::<Id>() {
            Ok(id) => self.get_iso(id).await,
            Err(_) => self.get_iso_by_name(id_or_name).await,
        }
    }

    /// Look up an SSH key by id, falling back to its name.
    async fn find_ssh_key(&self, id_or_name: &str) -> Result<Option<SshKey>, ApiError> {
        match id_or_name.parse::<Id>() {
            Ok(id) => self.get_ssh_key(id).await,
            Err(_) => self.get_ssh_key_by_name(id_or_name).await,
        }
    }
}
