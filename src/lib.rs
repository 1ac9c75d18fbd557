//! Hetzner Cloud provider
//!
//! This crate implements the resource and data source logic of a Hetzner
//! Cloud infrastructure-as-code provider: servers, volumes, load balancer
//! network attachments and the image lookup.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **ProviderService trait**: The plan/CRUD/import surface a plugin host drives
//! - **HcloudProvider**: The implementation, generic over the [`CloudApi`] seam
//! - **Action waiting**: Polling of asynchronous platform actions with progress updates
//! - **Retry**: Retrying of conflict and lock errors, with optional idempotence rules
//! - **Schema types**: Attribute schemas, validation and plan diffing
//! - **Error types**: API errors with classification, and provider errors
//! - **Logging**: Integration with `tracing` for structured logging
//! - **Testing**: An in-memory cloud and a lifecycle test harness
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hcloud_provider::{HcloudProvider, ProviderService};
//!
//! let provider = HcloudProvider::new(Arc::new(my_api_client));
//! provider.configure(serde_json::json!({"token": token})).await?;
//!
//! let plan = provider
//!     .plan("hcloud_volume", None, serde_json::json!({"name": "data", "size": 10, "location": "fsn1"}))
//!     .await?;
//! let state = provider.create("hcloud_volume", plan.planned_state).await?;
//! ```
//!
//! # Resources
//!
//! - **hcloud_server**: Servers, including backups, ISO and rescue handling
//! - **hcloud_volume**: Block volumes with attach, resize and relabel
//! - **hcloud_load_balancer_network**: Attachment of a load balancer to a private network
//!
//! # Data Sources
//!
//! - **hcloud_image**: Image lookup by id, name or label selector

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod api;
pub mod client;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod logging;
pub mod models;
pub mod provider;
pub mod relationship;
pub mod resources;
pub mod retry;
pub mod schema;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use api::CloudApi;
pub use client::{Client, ResourceRef};
pub use config::ProviderConfig;
pub use error::{ApiError, ErrorCode, InvalidId, ProviderError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{HcloudProvider, ProviderService};
pub use retry::{retry_on_transient, Completion, RetryPolicy};
pub use schema::ProviderSchema;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
