//! Testing utilities.
//!
//! [`FakeCloud`] is an in-memory [`CloudApi`] with scripted failures and
//! call counters. [`ProviderTester`] drives a [`ProviderService`] through
//! plan/apply lifecycles without a plugin host.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hcloud_provider::testing::{FakeCloud, ProviderTester, network_fixture};
//! use hcloud_provider::HcloudProvider;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_attach() {
//!     let fake = Arc::new(FakeCloud::new());
//!     fake.add_network(network_fixture(456));
//!     let tester = ProviderTester::new(HcloudProvider::new(fake.clone()));
//!     tester.configure(json!({"token": "a".repeat(64)})).await.unwrap();
//!     // ...
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::api::CloudApi;
use crate::error::{ApiError, ErrorCode, ProviderError};
use crate::models::{
    Action, ActionError, ActionStatus, CreateResult, Datacenter, EnableRescueResult, Id, Image,
    ImageListOpts, ImageStatus, Iso, Labels, LoadBalancer, LoadBalancerAttachToNetworkOpts,
    LoadBalancerPrivateNet, Location, Network, Server, ServerChangeTypeOpts, ServerCreateOpts,
    ServerEnableRescueOpts, ServerPublicNet, ServerStatus, ServerType, ServerUpdateOpts, SshKey,
    Volume, VolumeCreateOpts, VolumeUpdateOpts,
};
use crate::provider::ProviderService;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::types::{ImportedResource, PlanResult};

// =========================================================================
// FakeCloud
// =========================================================================

#[derive(Debug)]
struct FakeAction {
    action: Action,
    polls: usize,
    polls_until_done: usize,
    failure: Option<ActionError>,
}

#[derive(Debug)]
struct ScriptedActionFailure {
    remaining: Option<usize>,
    error: ActionError,
}

#[derive(Debug)]
struct FakeState {
    next_id: Id,
    next_action_id: Id,
    action_polls: usize,
    actions: HashMap<Id, FakeAction>,
    action_failures: HashMap<String, ScriptedActionFailure>,
    scripted_errors: HashMap<String, VecDeque<ApiError>>,
    crashes: HashSet<String>,
    calls: HashMap<String, usize>,
    last_change_type: Option<ServerChangeTypeOpts>,
    servers: BTreeMap<Id, Server>,
    volumes: BTreeMap<Id, Volume>,
    load_balancers: BTreeMap<Id, LoadBalancer>,
    networks: BTreeMap<Id, Network>,
    images: BTreeMap<Id, Image>,
    isos: BTreeMap<Id, Iso>,
    ssh_keys: BTreeMap<Id, SshKey>,
}

impl FakeState {
    fn allocate_id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register a new action. Returns it together with whether it is
    /// scripted to fail, in which case the caller skips the state change.
    fn start_action(&mut self, command: &str) -> (Action, bool) {
        let id = self.next_action_id;
        self.next_action_id += 1;

        let failure = match self.action_failures.get_mut(command) {
            Some(scripted) => match scripted.remaining.as_mut() {
                Some(0) => None,
                Some(remaining) => {
                    *remaining -= 1;
                    Some(scripted.error.clone())
                },
                None => Some(scripted.error.clone()),
            },
            None => None,
        };
        let failing = failure.is_some();

        let action = Action::running(id, command);
        self.actions.insert(
            id,
            FakeAction {
                action: action.clone(),
                polls: 0,
                polls_until_done: self.action_polls,
                failure,
            },
        );
        (action, failing)
    }

    fn server_mut(&mut self, id: Id) -> Result<&mut Server, ApiError> {
        self.servers
            .get_mut(&id)
            .ok_or_else(|| ApiError::not_found(format!("server with ID '{}' not found", id)))
    }

    fn volume_mut(&mut self, id: Id) -> Result<&mut Volume, ApiError> {
        self.volumes
            .get_mut(&id)
            .ok_or_else(|| ApiError::not_found(format!("volume with ID '{}' not found", id)))
    }

    fn load_balancer_mut(&mut self, id: Id) -> Result<&mut LoadBalancer, ApiError> {
        self.load_balancers.get_mut(&id).ok_or_else(|| {
            ApiError::not_found(format!("load balancer with ID '{}' not found", id))
        })
    }
}

/// In-memory cloud with scripted failures.
///
/// State changes are applied when a mutating call is made; the returned
/// action then only reports completion. Actions scripted to fail leave the
/// state untouched.
#[derive(Debug)]
pub struct FakeCloud {
    state: Mutex<FakeState>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    /// An empty cloud whose actions finish on the first poll.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: 1000,
                next_action_id: 1,
                action_polls: 1,
                actions: HashMap::new(),
                action_failures: HashMap::new(),
                scripted_errors: HashMap::new(),
                crashes: HashSet::new(),
                calls: HashMap::new(),
                last_change_type: None,
                servers: BTreeMap::new(),
                volumes: BTreeMap::new(),
                load_balancers: BTreeMap::new(),
                networks: BTreeMap::new(),
                images: BTreeMap::new(),
                isos: BTreeMap::new(),
                ssh_keys: BTreeMap::new(),
            }),
        }
    }

    /// Number of polls an action takes to reach a terminal state.
    pub fn with_action_polls(self, polls: usize) -> Self {
        self.lock().action_polls = polls.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and return a scripted error, if one is queued.
    fn enter(&self, op: &str) -> Result<MutexGuard<'_, FakeState>, ApiError> {
        let mut state = self.lock();
        *state.calls.entry(op.to_string()).or_default() += 1;
        if state.crashes.remove(op) {
            drop(state);
            panic!("scripted crash in {}", op);
        }
        if let Some(err) = state.scripted_errors.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }

    // -- scripting ----------------------------------------------------------

    /// Make the next call of `op` (a [`CloudApi`] method name) fail with
    /// `err`. Queued errors are returned in order.
    pub fn fail_next(&self, op: &str, err: ApiError) {
        self.lock()
            .scripted_errors
            .entry(op.to_string())
            .or_default()
            .push_back(err);
    }

    /// Make the next call of `op` panic, like a client bug would.
    pub fn crash_next(&self, op: &str) {
        self.lock().crashes.insert(op.to_string());
    }

    /// Make every action with the given command end in `error`.
    pub fn fail_action(&self, command: &str, code: ErrorCode, message: &str) {
        self.script_action_failure(command, None, code, message);
    }

    /// Make the next `times` actions with the given command end in `error`.
    pub fn fail_action_times(&self, command: &str, times: usize, code: ErrorCode, message: &str) {
        self.script_action_failure(command, Some(times), code, message);
    }

    fn script_action_failure(
        &self,
        command: &str,
        remaining: Option<usize>,
        code: ErrorCode,
        message: &str,
    ) {
        self.lock().action_failures.insert(
            command.to_string(),
            ScriptedActionFailure {
                remaining,
                error: ActionError {
                    code,
                    message: message.to_string(),
                },
            },
        );
    }

    /// Start an action directly, without any state change.
    pub fn start_action(&self, command: &str) -> Action {
        self.lock().start_action(command).0
    }

    // -- inspection ---------------------------------------------------------

    /// How often `op` was called.
    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// How often the given action was polled.
    pub fn action_polls(&self, id: Id) -> usize {
        self.lock().actions.get(&id).map_or(0, |action| action.polls)
    }

    /// Commands of all actions started so far, in order.
    pub fn action_commands(&self) -> Vec<String> {
        let state = self.lock();
        let mut actions: Vec<_> = state.actions.values().map(|a| &a.action).collect();
        actions.sort_by_key(|action| action.id);
        actions.iter().map(|action| action.command.clone()).collect()
    }

    /// Options of the last server type change.
    pub fn last_change_type(&self) -> Option<ServerChangeTypeOpts> {
        self.lock().last_change_type.clone()
    }

    /// Current copy of a server.
    pub fn server(&self, id: Id) -> Option<Server> {
        self.lock().servers.get(&id).cloned()
    }

    /// Current copy of a volume.
    pub fn volume(&self, id: Id) -> Option<Volume> {
        self.lock().volumes.get(&id).cloned()
    }

    /// Current copy of a load balancer.
    pub fn load_balancer(&self, id: Id) -> Option<LoadBalancer> {
        self.lock().load_balancers.get(&id).cloned()
    }

    // -- seeding ------------------------------------------------------------

    /// Seed a server.
    pub fn add_server(&self, server: Server) {
        self.lock().servers.insert(server.id, server);
    }

    /// Seed a volume.
    pub fn add_volume(&self, volume: Volume) {
        self.lock().volumes.insert(volume.id, volume);
    }

    /// Seed a load balancer.
    pub fn add_load_balancer(&self, load_balancer: LoadBalancer) {
        self.lock()
            .load_balancers
            .insert(load_balancer.id, load_balancer);
    }

    /// Seed a network.
    pub fn add_network(&self, network: Network) {
        self.lock().networks.insert(network.id, network);
    }

    /// Seed an image.
    pub fn add_image(&self, image: Image) {
        self.lock().images.insert(image.id, image);
    }

    /// Seed an ISO.
    pub fn add_iso(&self, iso: Iso) {
        self.lock().isos.insert(iso.id, iso);
    }

    /// Seed an SSH key.
    pub fn add_ssh_key(&self, ssh_key: SshKey) {
        self.lock().ssh_keys.insert(ssh_key.id, ssh_key);
    }

    /// Remove a server behind the provider's back.
    pub fn remove_server(&self, id: Id) {
        self.lock().servers.remove(&id);
    }

    /// Remove a volume behind the provider's back.
    pub fn remove_volume(&self, id: Id) {
        self.lock().volumes.remove(&id);
    }
}

fn matches_label_selector(labels: &Labels, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn get_action(&self, id: Id) -> Result<Option<Action>, ApiError> {
        let mut state = self.enter("get_action")?;
        let Some(fake) = state.actions.get_mut(&id) else {
            return Ok(None);
        };

        fake.polls += 1;
        if fake.polls >= fake.polls_until_done {
            fake.action.progress = 100;
            match &fake.failure {
                Some(error) => {
                    fake.action.status = ActionStatus::Error;
                    fake.action.error = Some(error.clone());
                },
                None => fake.action.status = ActionStatus::Success,
            }
        } else {
            fake.action.progress = (fake.polls * 100 / fake.polls_until_done) as u8;
        }
        Ok(Some(fake.action.clone()))
    }

    // -- servers ------------------------------------------------------------

    async fn get_server(&self, id: Id) -> Result<Option<Server>, ApiError> {
        Ok(self.enter("get_server")?.servers.get(&id).cloned())
    }

    async fn create_server(
        &self,
        opts: ServerCreateOpts,
    ) -> Result<CreateResult<Server>, ApiError> {
        let mut state = self.enter("create_server")?;
        let image = state
            .images
            .get(&opts.image)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("image {} not found", opts.image)))?;

        let id = state.allocate_id();
        let location = opts.location.clone().unwrap_or_else(|| "fsn1".to_string());
        let datacenter = opts
            .datacenter
            .clone()
            .unwrap_or_else(|| format!("{}-dc14", location));
        let server = Server {
            id,
            name: opts.name,
            status: ServerStatus::Running,
            server_type: ServerType {
                id: 1,
                name: opts.server_type,
            },
            datacenter: Datacenter {
                id: 14,
                name: datacenter,
                location: Location { id: 1, name: location },
            },
            image: Some(image),
            public_net: ServerPublicNet {
                ipv4: Ipv4Addr::new(192, 0, 2, (id % 250) as u8 + 1),
                ipv6_network: format!("2001:db8:{:x}::/64", id),
            },
            backup_window: None,
            rescue_enabled: false,
            iso: None,
            labels: opts.labels,
        };

        let (action, _) = state.start_action("create_server");
        let (start, _) = state.start_action("start_server");
        state.servers.insert(id, server.clone());
        Ok(CreateResult {
            resource: server,
            action,
            next_actions: vec![start],
        })
    }

    async fn update_server(&self, id: Id, opts: ServerUpdateOpts) -> Result<Server, ApiError> {
        let mut state = self.enter("update_server")?;
        let server = state.server_mut(id)?;
        if let Some(name) = opts.name {
            server.name = name;
        }
        if let Some(labels) = opts.labels {
            server.labels = labels;
        }
        Ok(server.clone())
    }

    async fn delete_server(&self, id: Id) -> Result<(), ApiError> {
        let mut state = self.enter("delete_server")?;
        state.server_mut(id)?;
        state.servers.remove(&id);
        for volume in state.volumes.values_mut() {
            if volume.server == Some(id) {
                volume.server = None;
            }
        }
        Ok(())
    }

    async fn power_off_server(&self, id: Id) -> Result<Action, ApiError> {
        let mut state = self.enter("power_off_server")?;
        state.server_mut(id)?;
        let (action, failing) = state.start_action("stop_server");
        if !failing {
            state.server_mut(id)?.status = ServerStatus::Off;
        }
        Ok(action)
    }

    async fn reset_server(&self, id: Id) -> Result<Action, ApiError> {
        let mut state = self.enter("reset_server")?;
        state.server_mut(id)?;
        Ok(state.start_action("reset_server").0)
    }

    async fn change_server_type(
        &self,
        id: Id,
        opts: ServerChangeTypeOpts,
    ) -> Result<Action, ApiError> {
        let mut state = self.enter("change_server_type")?;
        if state.server_mut(id)?.status != ServerStatus::Off {
            return Err(ApiError::new(
                ErrorCode::Other("server_not_stopped".to_string()),
                "server must be stopped before changing its type",
            ));
        }
        state.last_change_type = Some(opts.clone());
        let (action, failing) = state.start_action("change_server_type");
        if !failing {
            state.server_mut(id)?.server_type.name = opts.server_type;
        }
        Ok(action)
    }

    async fn enable_server_backup(&self, id: Id) -> Result<Action, ApiError> {
        let mut state = self.enter("enable_server_backup")?;
        state.server_mut(id)?;
        let (action, failing) = state.start_action("enable_backup");
        if !failing {
            state.server_mut(id)?.backup_window = Some("22-02".to_string());
        }
        Ok(action)
    }

    async fn disable_server_backup(&self, id: Id) -> Result<Action, ApiError> {
        let mut state = self.enter("disable_server_backup")?;
        state.server_mut(id)?;
        let (action, failing) = state.start_action("disable_backup");
        if !failing {
            state.server_mut(id)?.backup_window = None;
        }
        Ok(action)
    }

    async fn attach_server_iso(&self, id: Id, iso: Id) -> Result<Action, ApiError> {
        let mut state = self.enter("attach_server_iso")?;
        state.server_mut(id)?;
        let iso = state
            .isos
            .get(&iso)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("iso {} not found", iso)))?;
        let (action, failing) = state.start_action("attach_iso");
        if !failing {
            state.server_mut(id)?.iso = Some(iso);
        }
        Ok(action)
    }

    async fn detach_server_iso(&self, id: Id) -> Result<Action, ApiError> {
        let mut state = self.enter("detach_server_iso")?;
        state.server_mut(id)?;
        let (action, failing) = state.start_action("detach_iso");
        if !failing {
            state.server_mut(id)?.iso = None;
        }
        Ok(action)
    }

    async fn enable_server_rescue(
        &self,
        id: Id,
        _opts: ServerEnableRescueOpts,
    ) -> Result<EnableRescueResult, ApiError> {
        let mut state = self.enter("enable_server_rescue")?;
        state.server_mut(id)?;
        let (action, failing) = state.start_action("enable_rescue");
        if !failing {
            state.server_mut(id)?.rescue_enabled = true;
        }
        Ok(EnableRescueResult {
            root_password: format!("rescue-{}", action.id),
            action,
        })
    }

    async fn disable_server_rescue(&self, id: Id) -> Result<Action, ApiError> {
        let mut state = self.enter("disable_server_rescue")?;
        state.server_mut(id)?;
        let (action, failing) = state.start_action("disable_rescue");
        if !failing {
            state.server_mut(id)?.rescue_enabled = false;
        }
        Ok(action)
    }

    // -- volumes ------------------------------------------------------------

    async fn get_volume(&self, id: Id) -> Result<Option<Volume>, ApiError> {
        Ok(self.enter("get_volume")?.volumes.get(&id).cloned())
    }

    async fn create_volume(
        &self,
        opts: VolumeCreateOpts,
    ) -> Result<CreateResult<Volume>, ApiError> {
        let mut state = self.enter("create_volume")?;
        let location = match (opts.server, opts.location) {
            (Some(server), _) => state.server_mut(server)?.datacenter.location.clone(),
            (None, Some(name)) => Location { id: 1, name },
            (None, None) => {
                return Err(ApiError::new(
                    ErrorCode::Other("invalid_input".to_string()),
                    "either location or server must be given",
                ))
            },
        };

        let id = state.allocate_id();
        let (action, _) = state.start_action("create_volume");
        let mut next_actions = Vec::new();
        let mut server = None;
        if let Some(server_id) = opts.server {
            let (attach, failing) = state.start_action("attach_volume");
            if !failing {
                server = Some(server_id);
            }
            next_actions.push(attach);
        }

        let volume = Volume {
            id,
            name: opts.name,
            size: opts.size,
            location,
            server,
            linux_device: format!("/dev/disk/by-id/scsi-0HC_Volume_{}", id),
            labels: opts.labels,
        };
        state.volumes.insert(id, volume.clone());
        Ok(CreateResult {
            resource: volume,
            action,
            next_actions,
        })
    }

    async fn update_volume(&self, id: Id, opts: VolumeUpdateOpts) -> Result<Volume, ApiError> {
        let mut state = self.enter("update_volume")?;
        let volume = state.volume_mut(id)?;
        if let Some(name) = opts.name {
            volume.name = name;
        }
        if let Some(labels) = opts.labels {
            volume.labels = labels;
        }
        Ok(volume.clone())
    }

    async fn delete_volume(&self, id: Id) -> Result<(), ApiError> {
        let mut state = self.enter("delete_volume")?;
        if state.volume_mut(id)?.server.is_some() {
            return Err(ApiError::new(
                ErrorCode::Locked,
                "volume is still attached to a server",
            ));
        }
        state.volumes.remove(&id);
        Ok(())
    }

    async fn attach_volume(&self, id: Id, server: Id) -> Result<Action, ApiError> {
        let mut state = self.enter("attach_volume")?;
        state.server_mut(server)?;
        if let Some(current) = state.volume_mut(id)?.server {
            return Err(ApiError::new(
                ErrorCode::Other("volume_already_attached".to_string()),
                format!("volume is already attached to server {}", current),
            ));
        }
        let (action, failing) = state.start_action("attach_volume");
        if !failing {
            state.volume_mut(id)?.server = Some(server);
        }
        Ok(action)
    }

    async fn detach_volume(&self, id: Id) -> Result<Action, ApiError> {
        let mut state = self.enter("detach_volume")?;
        state.volume_mut(id)?;
        let (action, failing) = state.start_action("detach_volume");
        if !failing {
            state.volume_mut(id)?.server = None;
        }
        Ok(action)
    }

    async fn resize_volume(&self, id: Id, size: u32) -> Result<Action, ApiError> {
        let mut state = self.enter("resize_volume")?;
        if size < state.volume_mut(id)?.size {
            return Err(ApiError::new(
                ErrorCode::Other("invalid_input".to_string()),
                "volumes can only be grown",
            ));
        }
        let (action, failing) = state.start_action("resize_volume");
        if !failing {
            state.volume_mut(id)?.size = size;
        }
        Ok(action)
    }

    // -- load balancers & networks -----------------------------------------

    async fn get_load_balancer(&self, id: Id) -> Result<Option<LoadBalancer>, ApiError> {
        Ok(self.enter("get_load_balancer")?.load_balancers.get(&id).cloned())
    }

    async fn attach_load_balancer_to_network(
        &self,
        id: Id,
        opts: LoadBalancerAttachToNetworkOpts,
    ) -> Result<Action, ApiError> {
        let mut state = self.enter("attach_load_balancer_to_network")?;
        if !state.networks.contains_key(&opts.network) {
            return Err(ApiError::not_found(format!(
                "network with ID '{}' not found",
                opts.network
            )));
        }

        let load_balancer = state.load_balancer_mut(id)?;
        if load_balancer
            .private_net
            .iter()
            .any(|private_net| private_net.network == opts.network)
        {
            return Err(ApiError::new(
                ErrorCode::LoadBalancerAlreadyAttached,
                "load balancer is already attached to this network",
            ));
        }
        let ip = opts.ip.unwrap_or_else(|| {
            IpAddr::V4(Ipv4Addr::new(
                10,
                0,
                0,
                2 + load_balancer.private_net.len() as u8,
            ))
        });

        let (action, failing) = state.start_action("attach_to_network");
        if !failing {
            state.load_balancer_mut(id)?.private_net.push(LoadBalancerPrivateNet {
                network: opts.network,
                ip,
            });
        }
        Ok(action)
    }

    async fn detach_load_balancer_from_network(
        &self,
        id: Id,
        network: Id,
    ) -> Result<Action, ApiError> {
        let mut state = self.enter("detach_load_balancer_from_network")?;
        let load_balancer = state.load_balancer_mut(id)?;
        if !load_balancer
            .private_net
            .iter()
            .any(|private_net| private_net.network == network)
        {
            return Err(ApiError::not_found(format!(
                "load balancer {} is not attached to network {}",
                id, network
            )));
        }

        let (action, failing) = state.start_action("detach_from_network");
        if !failing {
            state
                .load_balancer_mut(id)?
                .private_net
                .retain(|private_net| private_net.network != network);
        }
        Ok(action)
    }

    async fn enable_load_balancer_public_interface(&self, id: Id) -> Result<Action, ApiError> {
        let mut state = self.enter("enable_load_balancer_public_interface")?;
        state.load_balancer_mut(id)?;
        let (action, failing) = state.start_action("enable_public_interface");
        if !failing {
            state.load_balancer_mut(id)?.public_interface_enabled = true;
        }
        Ok(action)
    }

    async fn disable_load_balancer_public_interface(&self, id: Id) -> Result<Action, ApiError> {
        let mut state = self.enter("disable_load_balancer_public_interface")?;
        state.load_balancer_mut(id)?;
        let (action, failing) = state.start_action("disable_public_interface");
        if !failing {
            state.load_balancer_mut(id)?.public_interface_enabled = false;
        }
        Ok(action)
    }

    async fn get_network(&self, id: Id) -> Result<Option<Network>, ApiError> {
        Ok(self.enter("get_network")?.networks.get(&id).cloned())
    }

    // -- images, isos, ssh keys --------------------------------------------

    async fn get_image(&self, id: Id) -> Result<Option<Image>, ApiError> {
        Ok(self.enter("get_image")?.images.get(&id).cloned())
    }

    async fn get_image_by_name(&self, name: &str) -> Result<Option<Image>, ApiError> {
        let state = self.enter("get_image_by_name")?;
        Ok(state
            .images
            .values()
            .find(|image| image.name.as_deref() == Some(name))
            .cloned())
    }

    async fn list_images(&self, opts: ImageListOpts) -> Result<Vec<Image>, ApiError> {
        let state = self.enter("list_images")?;
        Ok(state
            .images
            .values()
            .filter(|image| matches_label_selector(&image.labels, &opts.label_selector))
            .filter(|image| opts.statuses.is_empty() || opts.statuses.contains(&image.status))
            .cloned()
            .collect())
    }

    async fn get_iso(&self, id: Id) -> Result<Option<Iso>, ApiError> {
        Ok(self.enter("get_iso")?.isos.get(&id).cloned())
    }

    async fn get_iso_by_name(&self, name: &str) -> Result<Option<Iso>, ApiError> {
        let state = self.enter("get_iso_by_name")?;
        Ok(state.isos.values().find(|iso| iso.name == name).cloned())
    }

    async fn get_ssh_key(&self, id: Id) -> Result<Option<SshKey>, ApiError> {
        Ok(self.enter("get_ssh_key")?.ssh_keys.get(&id).cloned())
    }

    async fn get_ssh_key_by_name(&self, name: &str) -> Result<Option<SshKey>, ApiError> {
        let state = self.enter("get_ssh_key_by_name")?;
        Ok(state.ssh_keys.values().find(|key| key.name == name).cloned())
    }
}

// =========================================================================
// Fixtures
// =========================================================================

fn fixture_time(offset_days: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200 + offset_days * 86_400, 0).unwrap_or_default()
}

/// A load balancer with its public interface enabled and no networks.
pub fn load_balancer_fixture(id: Id) -> LoadBalancer {
    LoadBalancer {
        id,
        name: format!("lb-{}", id),
        public_interface_enabled: true,
        private_net: Vec::new(),
    }
}

/// A `10.0.0.0/16` network.
pub fn network_fixture(id: Id) -> Network {
    Network {
        id,
        name: format!("network-{}", id),
        ip_range: "10.0.0.0/16".to_string(),
    }
}

/// An available system image. Later ids are created later.
pub fn image_fixture(id: Id, name: &str) -> Image {
    Image {
        id,
        name: Some(name.to_string()),
        kind: "system".to_string(),
        status: ImageStatus::Available,
        description: format!("{} image", name),
        created: fixture_time(id),
        os_flavor: "ubuntu".to_string(),
        os_version: Some("22.04".to_string()),
        rapid_deploy: true,
        deprecated: None,
        labels: Labels::new(),
    }
}

/// A running `cx11` server in `fsn1` booted from [`image_fixture`].
pub fn server_fixture(id: Id) -> Server {
    Server {
        id,
        name: format!("server-{}", id),
        status: ServerStatus::Running,
        server_type: ServerType {
            id: 1,
            name: "cx11".to_string(),
        },
        datacenter: Datacenter {
            id: 14,
            name: "fsn1-dc14".to_string(),
            location: Location {
                id: 1,
                name: "fsn1".to_string(),
            },
        },
        image: Some(image_fixture(1, "ubuntu-22.04")),
        public_net: ServerPublicNet {
            ipv4: Ipv4Addr::new(192, 0, 2, 10),
            ipv6_network: "2001:db8:1::/64".to_string(),
        },
        backup_window: None,
        rescue_enabled: false,
        iso: None,
        labels: Labels::new(),
    }
}

/// A detached 10 GB volume in `fsn1`.
pub fn volume_fixture(id: Id) -> Volume {
    Volume {
        id,
        name: format!("volume-{}", id),
        size: 10,
        location: Location {
            id: 1,
            name: "fsn1".to_string(),
        },
        server: None,
        linux_device: format!("/dev/disk/by-id/scsi-0HC_Volume_{}", id),
        labels: Labels::new(),
    }
}

/// An ISO with the given name.
pub fn iso_fixture(id: Id, name: &str) -> Iso {
    Iso {
        id,
        name: name.to_string(),
    }
}

/// An SSH key with a fingerprint derived from its id.
pub fn ssh_key_fixture(id: Id, name: &str) -> SshKey {
    SshKey {
        id,
        name: name.to_string(),
        fingerprint: format!("b7:2f:30:a0:2f:6c:58:6c:21:04:58:61:ba:06:3b:{:02x}", id % 256),
    }
}

// =========================================================================
// ProviderTester
// =========================================================================

/// A test harness around a [`ProviderService`].
///
/// ```ignore
/// let tester = ProviderTester::new(HcloudProvider::new(fake));
/// tester.configure(json!({"token": token})).await.unwrap();
/// let state = tester.lifecycle_create("hcloud_volume", json!({"name": "data", "size": 10, "location": "fsn1"})).await.unwrap();
/// ```
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Get the provider schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Get the data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Validate the provider configuration, failing on error diagnostics.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider, failing on error diagnostics.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// Validate a resource config, failing on error diagnostics.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider.plan(resource_type, None, config).await
    }

    /// Plan an update of existing state.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), config)
            .await
    }

    /// Create a resource from planned state.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read a resource; `None` means it is gone.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update a resource from planned state.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import a resource by id.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Validate a data source config, failing on error diagnostics.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Read a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    /// Plan, create and read back a resource.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created)
            .await?
            .ok_or_else(|| gone_after(resource_type, "create"))
    }

    /// Plan, update and read back a resource.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?
            .ok_or_else(|| gone_after(resource_type, "update"))?;
        self.read(resource_type, updated)
            .await?
            .ok_or_else(|| gone_after(resource_type, "update"))
    }

    /// Create, update and delete a resource. Returns the updated state.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, created, updated_config)
            .await?;
        self.delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }
}

fn gone_after(resource_type: &str, step: &str) -> ProviderError {
    ProviderError::NotFound(format!("{} disappeared after {}", resource_type, step))
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation returned error diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan changes nothing.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan replaces the resource.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan updates the resource in place.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(plan.has_changes(), "Expected plan to have changes");
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan changes the given attribute.
///
/// # Panics
///
/// Panics if the attribute is not changed.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.change(path).is_some(),
        "Expected plan to change attribute '{}'. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan leaves the given attribute alone.
///
/// # Panics
///
/// Panics if the attribute is changed.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.change(path).is_none(),
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that some error diagnostic's summary contains `substring`.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.is_error() && d.summary.contains(substring)),
        "Expected an error containing '{}'. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}
