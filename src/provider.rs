//! The provider surface.
//!
//! [`ProviderService`] is the interface a plugin host drives: schema
//! discovery, configuration, plan, CRUD, import and data source reads, all
//! over JSON documents. [`HcloudProvider`] implements it by dispatching on the
//! resource type name to the adapters in [`resources`](crate::resources) and
//! [`data_sources`](crate::data_sources).

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::api::CloudApi;
use crate::client::Client;
use crate::config::ProviderConfig;
use crate::data_sources::image;
use crate::error::ProviderError;
use crate::resources::{load_balancer_network, server, volume};
use crate::schema::{Diagnostic, ProviderSchema, Schema};
use crate::types::{plan_changes, ImportedResource, PlanResult, ProviderMetadata};
use crate::validation::validate;

/// Trait that provider implementations must implement.
///
/// # Example
///
/// ```ignore
/// use hcloud_provider::{ProviderService, ProviderError, PlanResult};
/// use hcloud_provider::schema::{Attribute, Diagnostic, ProviderSchema, Schema};
///
/// struct MyProvider;
///
/// #[async_trait::async_trait]
/// impl ProviderService for MyProvider {
///     fn schema(&self) -> ProviderSchema {
///         ProviderSchema::new()
///             .with_resource("example_resource", Schema::v0()
///                 .with_attribute("name", Attribute::required_string()))
///     }
///
///     async fn configure(&self, config: serde_json::Value) -> Result<Vec<Diagnostic>, ProviderError> {
///         Ok(vec![])
///     }
///
///     // ... implement other methods
/// }
/// ```
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider's schema including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Resource and data source type names. By default, derived from the
    /// schema.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    /// By default, checks it against the provider schema.
    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&self.schema().provider, &config))
    }

    /// Configure the provider with credentials and settings.
    /// Returns diagnostics (errors and warnings).
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Plan changes for a resource. `prior_state` is `None` for a create.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value)
        -> Result<Value, ProviderError>;

    /// Read the current state of a resource. `None` means it no longer
    /// exists and should be dropped from state.
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError>;

    /// Update an existing resource. `None` means it vanished during the
    /// update.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Option<Value>, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value)
        -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        _id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read data from an external source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        _config: Value,
    ) -> Result<Value, ProviderError> {
        Err(ProviderError::UnknownResource(format!(
            "Unknown data source type: {}",
            data_source_type
        )))
    }
}

/// Hetzner Cloud provider over any [`CloudApi`] implementation.
pub struct HcloudProvider<C: CloudApi + ?Sized> {
    api: Arc<C>,
    config: RwLock<Option<ProviderConfig>>,
}

impl<C: CloudApi + ?Sized> HcloudProvider<C> {
    /// Create an unconfigured provider backed by `api`.
    pub fn new(api: Arc<C>) -> Self {
        Self {
            api,
            config: RwLock::new(None),
        }
    }

    /// The active configuration, if `configure` succeeded.
    pub async fn config(&self) -> Option<ProviderConfig> {
        self.config.read().await.clone()
    }

    async fn client(&self) -> Result<Client<C>, ProviderError> {
        let config = self.config.read().await;
        let config = config.as_ref().ok_or_else(|| {
            ProviderError::Configuration("provider is not configured".to_string())
        })?;
        Ok(Client::new(Arc::clone(&self.api)).with_poll_interval(config.poll_interval))
    }
}

fn resource_schema(resource_type: &str) -> Result<Schema, ProviderError> {
    match resource_type {
        server::TYPE_NAME => Ok(server::schema()),
        volume::TYPE_NAME => Ok(volume::schema()),
        load_balancer_network::TYPE_NAME => Ok(load_balancer_network::schema()),
        other => Err(ProviderError::UnknownResource(other.to_string())),
    }
}

fn log_outcome<T>(operation: &str, resource_type: &str, result: &Result<T, ProviderError>) {
    match result {
        Ok(_) => info!(resource_type, "{} completed successfully", operation),
        Err(e) => error!(resource_type, error = %e, "{} failed", operation),
    }
}

#[async_trait::async_trait]
impl<C: CloudApi + ?Sized> ProviderService for HcloudProvider<C> {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(ProviderConfig::schema())
            .with_resource(server::TYPE_NAME, server::schema())
            .with_resource(volume::TYPE_NAME, volume::schema())
            .with_resource(
                load_balancer_network::TYPE_NAME,
                load_balancer_network::schema(),
            )
            .with_data_source(image::TYPE_NAME, image::schema())
    }

    #[instrument(skip(self, config), name = "provider.configure")]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        debug!("Configure called");
        match ProviderConfig::from_value(config) {
            Ok(config) => {
                info!(
                    endpoint = %config.endpoint,
                    poll_interval = ?config.poll_interval,
                    "Configure completed successfully"
                );
                *self.config.write().await = Some(config);
                Ok(vec![])
            },
            Err(e) => {
                warn!(error = %e, "Configure completed with errors");
                Ok(vec![e.to_diagnostic()])
            },
        }
    }

    #[instrument(skip(self), name = "provider.stop")]
    async fn stop(&self) -> Result<(), ProviderError> {
        info!("Stop called");
        *self.config.write().await = None;
        Ok(())
    }

    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        debug!(resource_type, "ValidateResourceConfig called");
        let diagnostics = match resource_type {
            server::TYPE_NAME => server::validate_config(&config),
            other => validate(&resource_schema(other)?, &config),
        };
        if diagnostics.iter().any(Diagnostic::is_error) {
            warn!(
                resource_type,
                diagnostics = diagnostics.len(),
                "ValidateResourceConfig completed with errors"
            );
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, prior_state, config), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        debug!(resource_type, is_create = prior_state.is_none(), "Plan called");
        let plan = match resource_type {
            server::TYPE_NAME => server::plan(prior_state.as_ref(), &config),
            other => plan_changes(&resource_schema(other)?, prior_state.as_ref(), &config),
        };
        info!(
            resource_type,
            changes = plan.changes.len(),
            requires_replace = plan.requires_replace,
            "Plan completed"
        );
        Ok(plan)
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        info!(resource_type, "Create called");
        let client = self.client().await?;
        let result = match resource_type {
            server::TYPE_NAME => server::create(&client, planned_state).await,
            volume::TYPE_NAME => volume::create(&client, planned_state).await,
            load_balancer_network::TYPE_NAME => {
                load_balancer_network::create(&client, planned_state).await
            },
            other => Err(ProviderError::UnknownResource(other.to_string())),
        };
        log_outcome("Create", resource_type, &result);
        result
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        debug!(resource_type, "Read called");
        let client = self.client().await?;
        let result = match resource_type {
            server::TYPE_NAME => server::read(&client, current_state).await,
            volume::TYPE_NAME => volume::read(&client, current_state).await,
            load_balancer_network::TYPE_NAME => {
                load_balancer_network::read(&client, current_state).await
            },
            other => Err(ProviderError::UnknownResource(other.to_string())),
        };
        if let Ok(None) = result {
            info!(resource_type, "Resource no longer exists");
        }
        result
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        info!(resource_type, "Update called");
        let client = self.client().await?;
        let result = match resource_type {
            server::TYPE_NAME => server::update(&client, prior_state, planned_state).await,
            volume::TYPE_NAME => volume::update(&client, prior_state, planned_state).await,
            load_balancer_network::TYPE_NAME => {
                load_balancer_network::update(&client, prior_state, planned_state).await
            },
            other => Err(ProviderError::UnknownResource(other.to_string())),
        };
        log_outcome("Update", resource_type, &result);
        result
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        info!(resource_type, "Delete called");
        let client = self.client().await?;
        let result = match resource_type {
            server::TYPE_NAME => server::delete(&client, current_state).await,
            volume::TYPE_NAME => volume::delete(&client, current_state).await,
            load_balancer_network::TYPE_NAME => {
                load_balancer_network::delete(&client, current_state).await
            },
            other => Err(ProviderError::UnknownResource(other.to_string())),
        };
        log_outcome("Delete", resource_type, &result);
        result
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        info!(resource_type, id, "ImportResource called");
        let client = self.client().await?;
        let state = match resource_type {
            server::TYPE_NAME => server::import(&client, id).await,
            volume::TYPE_NAME => volume::import(&client, id).await,
            load_balancer_network::TYPE_NAME => load_balancer_network::import(&client, id).await,
            other => Err(ProviderError::UnknownResource(other.to_string())),
        };
        log_outcome("ImportResource", resource_type, &state);
        Ok(vec![ImportedResource::new(resource_type, state?)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match data_source_type {
            image::TYPE_NAME => Ok(validate(&image::schema(), &config)),
            other => Err(ProviderError::UnknownResource(other.to_string())),
        }
    }

    #[instrument(skip(self, config), name = "provider.read_data_source")]
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        debug!(data_source_type, "ReadDataSource called");
        let client = self.client().await?;
        match data_source_type {
            image::TYPE_NAME => image::read(&client, config).await,
            other => Err(ProviderError::UnknownResource(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::models::LoadBalancerPrivateNet;
    use crate::testing::{
        assert_error_contains, assert_plan_changes_attribute, assert_plan_does_not_change_attribute,
        assert_plan_no_changes, assert_plan_replaces, assert_plan_updates_in_place,
        image_fixture, load_balancer_fixture, network_fixture, ssh_key_fixture, FakeCloud,
        ProviderTester, TestError,
    };

    fn token() -> String {
        "a".repeat(64)
    }

    async fn configured(fake: &Arc<FakeCloud>) -> ProviderTester<HcloudProvider<FakeCloud>> {
        let tester = ProviderTester::new(HcloudProvider::new(Arc::clone(fake)));
        tester
            .configure(json!({"token": token(), "poll_interval": "1s"}))
            .await
            .unwrap();
        tester
    }

    #[test]
    fn test_schema_and_metadata() {
        let provider = HcloudProvider::new(Arc::new(FakeCloud::new()));
        let schema = provider.schema();
        assert!(schema.provider.attribute("token").is_some());

        let metadata = provider.metadata();
        assert_eq!(
            metadata.resources,
            vec!["hcloud_load_balancer_network", "hcloud_server", "hcloud_volume"]
        );
        assert_eq!(metadata.data_sources, vec!["hcloud_image"]);
    }

    #[tokio::test]
    async fn test_operations_require_configure() {
        let tester = ProviderTester::new(HcloudProvider::new(Arc::new(FakeCloud::new())));

        let err = tester
            .create("hcloud_volume", json!({"name": "data", "size": 10}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));

        tester.configure(json!({"token": token()})).await.unwrap();
        assert!(tester.provider().config().await.is_some());

        tester.stop().await.unwrap();
        assert!(tester.provider().config().await.is_none());
    }

    #[tokio::test]
    async fn test_configure_reports_bad_token() {
        let tester = ProviderTester::new(HcloudProvider::new(Arc::new(FakeCloud::new())));

        match tester.configure(json!({"token": "short"})).await {
            Err(TestError::Diagnostics(diagnostics)) => {
                assert_error_contains(&diagnostics, "must be exactly 64 characters long");
            },
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(tester.provider().config().await.is_none());
    }

    #[tokio::test]
    async fn test_validate_provider_config() {
        let tester = ProviderTester::new(HcloudProvider::new(Arc::new(FakeCloud::new())));

        tester
            .validate_provider_config(json!({"token": token(), "poll_interval": "2s"}))
            .await
            .unwrap();
        assert!(tester
            .validate_provider_config(json!({"region": "eu"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_types() {
        let fake = Arc::new(FakeCloud::new());
        let tester = configured(&fake).await;

        let err = tester.create("hcloud_floating_ip", json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        let err = tester.plan_create("hcloud_floating_ip", json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        let err = tester
            .read_data_source("hcloud_location", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let fake = Arc::new(FakeCloud::new());
        let tester = configured(&fake).await;

        tester
            .validate_resource_config("hcloud_volume", json!({"name": "data", "size": 10}))
            .await
            .unwrap();

        match tester
            .validate_resource_config(
                "hcloud_server",
                json!({"name": "web", "server_type": "cx11", "image": ""}),
            )
            .await
        {
            Err(TestError::Diagnostics(diagnostics)) => {
                assert_error_contains(&diagnostics, "must have more then 0 characters");
            },
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_lifecycle() {
        let fake = Arc::new(FakeCloud::new());
        let tester = configured(&fake).await;

        let updated = tester
            .lifecycle_crud(
                "hcloud_volume",
                json!({"name": "data", "size": 10, "location": "fsn1"}),
                json!({"name": "data", "size": 20, "location": "fsn1"}),
            )
            .await
            .unwrap();

        assert_eq!(updated["size"], 20);
        assert!(fake.volume(1000).is_none());
        assert_eq!(
            fake.action_commands(),
            vec!["create_volume", "resize_volume"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_interval_comes_from_config() {
        let fake = Arc::new(FakeCloud::new().with_action_polls(3));
        let tester = ProviderTester::new(HcloudProvider::new(Arc::clone(&fake)));
        tester
            .configure(json!({"token": token(), "poll_interval": "2s"}))
            .await
            .unwrap();

        let start = tokio::time::Instant::now();
        tester
            .create("hcloud_volume", json!({"name": "data", "size": 10, "location": "fsn1"}))
            .await
            .unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_plans() {
        let fake = Arc::new(FakeCloud::new());
        fake.add_image(image_fixture(1, "ubuntu-22.04"));
        fake.add_ssh_key(ssh_key_fixture(10, "deploy"));
        let tester = configured(&fake).await;

        let config = json!({
            "name": "web",
            "server_type": "cx11",
            "image": "ubuntu-22.04",
            "ssh_keys": ["deploy"],
            "user_data": "#cloud-config\npackages: [nginx]\n",
            "labels": {"role": "web"}
        });
        let state = tester
            .lifecycle_create("hcloud_server", config.clone())
            .await
            .unwrap();

        let plan = tester
            .plan_update("hcloud_server", state.clone(), config.clone())
            .await
            .unwrap();
        assert_plan_no_changes(&plan);

        let mut resized = config.clone();
        resized["server_type"] = json!("cx21");
        let plan = tester
            .plan_update("hcloud_server", state.clone(), resized)
            .await
            .unwrap();
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "server_type");
        assert_plan_does_not_change_attribute(&plan, "user_data");

        let mut rebuilt = config;
        rebuilt["image"] = json!("debian-12");
        let plan = tester
            .plan_update("hcloud_server", state, rebuilt)
            .await
            .unwrap();
        assert_plan_replaces(&plan);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_balancer_network_lifecycle() {
        let fake = Arc::new(FakeCloud::new());
        fake.add_load_balancer(load_balancer_fixture(123));
        fake.add_network(network_fixture(456));
        let tester = configured(&fake).await;

        let state = tester
            .lifecycle_create(
                "hcloud_load_balancer_network",
                json!({"load_balancer_id": 123, "network_id": 456}),
            )
            .await
            .unwrap();
        assert_eq!(state["id"], "123-456");
        assert_eq!(state["enable_public_interface"], true);

        let imported = tester
            .import_resource("hcloud_load_balancer_network", "123-456")
            .await
            .unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, "hcloud_load_balancer_network");
        assert_eq!(imported[0].state["ip"], "10.0.0.2");

        let plan = tester
            .plan_update(
                "hcloud_load_balancer_network",
                state.clone(),
                json!({"load_balancer_id": 123, "network_id": 456, "ip": "10.0.0.9"}),
            )
            .await
            .unwrap();
        assert_plan_replaces(&plan);

        tester
            .delete("hcloud_load_balancer_network", state.clone())
            .await
            .unwrap();
        assert!(fake.load_balancer(123).unwrap().private_net.is_empty());
        assert_eq!(
            tester
                .read("hcloud_load_balancer_network", state)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_drops_stale_load_balancer_network() {
        let fake = Arc::new(FakeCloud::new());
        let mut load_balancer = load_balancer_fixture(123);
        load_balancer.private_net.push(LoadBalancerPrivateNet {
            network: 456,
            ip: "10.0.1.5".parse().unwrap(),
        });
        fake.add_load_balancer(load_balancer);
        fake.add_network(network_fixture(456));
        let tester = configured(&fake).await;

        let current = tester
            .read("hcloud_load_balancer_network", json!({"id": "123-456"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current["ip"], "10.0.1.5");

        let stale = tester
            .read("hcloud_load_balancer_network", json!({"id": "123-999"}))
            .await
            .unwrap();
        assert_eq!(stale, None);
    }

    #[tokio::test]
    async fn test_image_data_source() {
        let fake = Arc::new(FakeCloud::new());
        fake.add_image(image_fixture(1, "ubuntu-22.04"));
        let tester = configured(&fake).await;

        tester
            .validate_data_source_config("hcloud_image", json!({"name": "ubuntu-22.04"}))
            .await
            .unwrap();

        let state = tester
            .read_data_source("hcloud_image", json!({"name": "ubuntu-22.04"}))
            .await
            .unwrap();
        assert_eq!(state["id"], 1);
        assert_eq!(state["os_flavor"], "ubuntu");
    }
}
