//! `hcloud_image`: look up an image by id, name or label selector.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::api::CloudApi;
use crate::client::Client;
use crate::error::ProviderError;
use crate::models::{Id, Image, ImageListOpts, ImageStatus};
use crate::resources::from_state;
use crate::schema::{Attribute, Schema};

/// Data source type name.
pub const TYPE_NAME: &str = "hcloud_image";

/// Lookup criteria. The first one set wins, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImageQuery {
    /// Image id.
    pub id: Option<Id>,
    /// Image name.
    pub name: Option<String>,
    /// Label selector.
    pub with_selector: Option<String>,
    /// Older spelling of `with_selector`.
    pub selector: Option<String>,
    /// Statuses to accept, e.g. `available`.
    pub with_status: Vec<String>,
    /// Pick the newest image when the selector matches several.
    pub most_recent: bool,
}

impl ImageQuery {
    fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }

    fn selector(&self) -> Option<&str> {
        self.with_selector
            .as_deref()
            .filter(|selector| !selector.is_empty())
            .or_else(|| self.selector.as_deref().filter(|selector| !selector.is_empty()))
    }

    fn statuses(&self) -> Result<Vec<ImageStatus>, ProviderError> {
        self.with_status
            .iter()
            .map(|status| match status.as_str() {
                "available" => Ok(ImageStatus::Available),
                "creating" => Ok(ImageStatus::Creating),
                other => Err(ProviderError::Validation(format!(
                    "unknown image status {:?}",
                    other
                ))),
            })
            .collect()
    }
}

/// Schema of `hcloud_image`.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Look up a system image, snapshot or backup")
        .with_attribute("id", Attribute::optional_computed_int64())
        .with_attribute("name", Attribute::optional_computed_string())
        .with_attribute(
            "with_selector",
            Attribute::optional_string()
                .with_description("Label selector the image must match")
                .conflicts_with("selector"),
        )
        .with_attribute(
            "selector",
            Attribute::optional_string()
                .deprecated("Please use the with_selector property instead.")
                .conflicts_with("with_selector"),
        )
        .with_attribute("with_status", Attribute::string_list())
        .with_attribute(
            "most_recent",
            Attribute::optional_bool()
                .with_description("Pick the newest image when a selector matches several"),
        )
        .with_attribute("type", Attribute::computed_string())
        .with_attribute("description", Attribute::computed_string())
        .with_attribute("created", Attribute::computed_string())
        .with_attribute("os_flavor", Attribute::computed_string())
        .with_attribute("os_version", Attribute::computed_string())
        .with_attribute("rapid_deploy", Attribute::computed_bool())
        .with_attribute("deprecated", Attribute::computed_string())
        .with_attribute(
            "labels",
            Attribute::string_map().with_description("Labels of the image"),
        )
}

/// Find the image the query describes.
pub async fn find<C: CloudApi + ?Sized>(
    client: &Client<C>,
    query: &ImageQuery,
) -> Result<Image, ProviderError> {
    let api = client.api();

    if let Some(id) = query.id {
        return api
            .get_image(id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("no image found with id {}", id)));
    }

    if let Some(name) = query.name() {
        return api
            .get_image_by_name(name)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("no image found with name {}", name)));
    }

    let Some(selector) = query.selector() else {
        return Err(ProviderError::Validation(
            "please specify an id, a name or a selector to lookup the image".to_string(),
        ));
    };

    let opts = ImageListOpts {
        label_selector: selector.to_string(),
        statuses: query.statuses()?,
    };
    let mut images = api.list_images(opts).await?;
    debug!(selector, count = images.len(), "Listed images");

    if images.len() > 1 {
        if !query.most_recent {
            return Err(ProviderError::Validation(format!(
                "more than one image found for selector {:?}",
                selector
            )));
        }
        images.sort_by(|a, b| b.created.cmp(&a.created));
        info!(
            selector,
            count = images.len(),
            id = images[0].id,
            "{} images found for selector {:?}, using {} as the most recent one",
            images.len(),
            selector,
            images[0].id
        );
    }

    images.into_iter().next().ok_or_else(|| {
        ProviderError::NotFound(format!("no image found for selector {:?}", selector))
    })
}

/// Resolve the query in `config` and return it with the image attributes
/// filled in.
pub async fn read<C: CloudApi + ?Sized>(
    client: &Client<C>,
    config: Value,
) -> Result<Value, ProviderError> {
    let query: ImageQuery = from_state(config.clone())?;
    let image = find(client, &query).await?;

    let mut state: Map<String, Value> = config.as_object().cloned().unwrap_or_default();
    state.insert("id".to_string(), json!(image.id));
    state.insert("name".to_string(), json!(image.name.unwrap_or_default()));
    state.insert("type".to_string(), json!(image.kind));
    state.insert("description".to_string(), json!(image.description));
    state.insert("created".to_string(), json!(image.created.to_rfc3339()));
    state.insert("os_flavor".to_string(), json!(image.os_flavor));
    state.insert(
        "os_version".to_string(),
        json!(image.os_version.unwrap_or_default()),
    );
    state.insert("rapid_deploy".to_string(), json!(image.rapid_deploy));
    state.insert(
        "deprecated".to_string(),
        json!(image
            .deprecated
            .map(|deprecated| deprecated.to_rfc3339())
            .unwrap_or_default()),
    );
    state.insert("labels".to_string(), json!(image.labels));
    Ok(Value::Object(state))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{image_fixture, FakeCloud};

    fn labeled(id: Id, name: &str, labels: &[(&str, &str)]) -> Image {
        let mut image = image_fixture(id, name);
        image.kind = "snapshot".to_string();
        image.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        image
    }

    fn setup() -> (Arc<FakeCloud>, Client<FakeCloud>) {
        let fake = Arc::new(FakeCloud::new());
        fake.add_image(image_fixture(1, "ubuntu-22.04"));
        fake.add_image(labeled(2, "web-2024-01", &[("role", "web")]));
        fake.add_image(labeled(3, "web-2024-02", &[("role", "web")]));
        fake.add_image(labeled(4, "db-2024-01", &[("role", "db")]));
        let client = Client::new(Arc::clone(&fake));
        (fake, client)
    }

    #[tokio::test]
    async fn test_lookup_by_id() {
        let (_fake, client) = setup();

        let state = read(&client, json!({"id": 1})).await.unwrap();
        assert_eq!(state["name"], "ubuntu-22.04");
        assert_eq!(state["type"], "system");
        assert_eq!(state["os_version"], "22.04");
        assert_eq!(state["created"], "2024-01-02T00:00:00+00:00");
        assert_eq!(state["deprecated"], "");

        let err = read(&client, json!({"id": 99})).await.unwrap_err();
        assert_eq!(err.message(), "no image found with id 99");
    }

    #[tokio::test]
    async fn test_id_takes_precedence_over_name() {
        let (fake, client) = setup();

        let state = read(&client, json!({"id": 1, "name": "db-2024-01"}))
            .await
            .unwrap();
        assert_eq!(state["id"], 1);
        assert_eq!(fake.calls("get_image_by_name"), 0);
    }

    #[tokio::test]
    async fn test_lookup_by_name() {
        let (_fake, client) = setup();

        let state = read(&client, json!({"name": "db-2024-01"})).await.unwrap();
        assert_eq!(state["id"], 4);
        assert_eq!(state["labels"], json!({"role": "db"}));

        let err = read(&client, json!({"name": "arch"})).await.unwrap_err();
        assert_eq!(err.message(), "no image found with name arch");
    }

    #[tokio::test]
    async fn test_lookup_by_selector() {
        let (_fake, client) = setup();

        let state = read(&client, json!({"with_selector": "role=db"}))
            .await
            .unwrap();
        assert_eq!(state["id"], 4);

        let state = read(&client, json!({"selector": "role=db"})).await.unwrap();
        assert_eq!(state["id"], 4);

        let err = read(&client, json!({"with_selector": "role=cache"}))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "no image found for selector \"role=cache\"");
    }

    #[tokio::test]
    async fn test_ambiguous_selector() {
        let (_fake, client) = setup();

        let err = read(&client, json!({"with_selector": "role=web"}))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "more than one image found for selector \"role=web\"");

        let state = read(&client, json!({"with_selector": "role=web", "most_recent": true}))
            .await
            .unwrap();
        assert_eq!(state["id"], 3);
        assert_eq!(state["name"], "web-2024-02");
    }

    #[tokio::test]
    async fn test_status_filter() {
        let (fake, client) = setup();
        let mut creating = labeled(5, "web-2024-03", &[("role", "web")]);
        creating.status = ImageStatus::Creating;
        fake.add_image(creating);

        let state = read(
            &client,
            json!({"with_selector": "role=web", "with_status": ["creating"]}),
        )
        .await
        .unwrap();
        assert_eq!(state["id"], 5);

        let err = read(
            &client,
            json!({"with_selector": "role=web", "with_status": ["deleted"]}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_no_criteria() {
        let (fake, client) = setup();

        let err = read(&client, json!({})).await.unwrap_err();
        assert_eq!(
            err.message(),
            "please specify an id, a name or a selector to lookup the image"
        );
        assert_eq!(fake.calls("list_images"), 0);
    }
}
