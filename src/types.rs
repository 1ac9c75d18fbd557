//! Plan, import and metadata types of the provider surface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::Schema;

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The attribute that changed.
    pub path: String,
    /// The value before the change, `None` if unset.
    pub before: Option<Value>,
    /// The value after the change, `None` if unset.
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// An attribute that becomes set.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// An attribute that becomes unset.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// An attribute whose value changes.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: Value,
    /// The attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource has to be destroyed and created again.
    pub requires_replace: bool,
}

impl PlanResult {
    /// A plan with no changes.
    pub fn no_change(state: Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// A plan with changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether applying this plan does anything.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// The change to the given attribute, if any.
    pub fn change(&self, path: &str) -> Option<&AttributeChange> {
        self.changes.iter().find(|change| change.path == path)
    }
}

/// Diff a proposed config against the prior state.
///
/// Unset attributes with a default take the default. Computed attributes the
/// proposal leaves unset keep their prior value. A change to a force-new
/// attribute of an existing resource requires replacement.
pub fn plan_changes(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let mut planned: Map<String, Value> = proposed.as_object().cloned().unwrap_or_default();
    let prior_obj = prior.and_then(Value::as_object);

    let mut changes = Vec::new();
    let mut requires_replace = false;

    for (name, attr) in &schema.attributes {
        let before = prior_obj
            .and_then(|obj| obj.get(name))
            .filter(|v| !v.is_null())
            .cloned();

        let mut after = planned.get(name).filter(|v| !v.is_null()).cloned();
        if after.is_none() {
            if attr.flags.computed {
                after = before.clone();
            } else if let Some(default) = &attr.default {
                after = Some(default.clone());
            }
            match &after {
                Some(value) => {
                    planned.insert(name.clone(), value.clone());
                },
                None => {
                    planned.remove(name);
                },
            }
        }

        if attr.flags.is_computed_only() || before == after {
            continue;
        }

        if prior_obj.is_some() && attr.force_new {
            requires_replace = true;
        }
        changes.push(AttributeChange::new(name.clone(), before, after));
    }

    PlanResult::with_changes(Value::Object(planned), changes, requires_replace)
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Resource and data source type names offered by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Resource type names.
    pub resources: Vec<String>,
    /// Data source type names.
    pub data_sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("size", Attribute::required_int64())
            .with_attribute(
                "location",
                Attribute::optional_computed_string().with_force_new(),
            )
            .with_attribute("automount", Attribute::optional_bool().with_default(json!(false)))
            .with_attribute("linux_device", Attribute::computed_string())
    }

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("name", json!("data"));
        assert!(added.before.is_none());

        let removed = AttributeChange::removed("server_id", json!(4));
        assert!(removed.after.is_none());

        let modified = AttributeChange::modified("size", json!(10), json!(20));
        assert_eq!(modified.before, Some(json!(10)));
        assert_eq!(modified.after, Some(json!(20)));
    }

    #[test]
    fn test_plan_create() {
        let plan = plan_changes(&schema(), None, &json!({"name": "data", "size": 10}));

        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["automount"], json!(false));
        assert_eq!(plan.change("name"), Some(&AttributeChange::added("name", json!("data"))));
        assert!(plan.change("linux_device").is_none());
    }

    #[test]
    fn test_plan_no_change_keeps_computed_values() {
        let prior = json!({
            "id": "7",
            "name": "data",
            "size": 10,
            "location": "fsn1",
            "automount": false,
            "linux_device": "/dev/disk/by-id/scsi-0HC_Volume_7"
        });
        let plan = plan_changes(&schema(), Some(&prior), &json!({"name": "data", "size": 10}));

        assert!(!plan.has_changes(), "{:?}", plan.changes);
        assert_eq!(plan.planned_state["location"], json!("fsn1"));
        assert_eq!(
            plan.planned_state["linux_device"],
            json!("/dev/disk/by-id/scsi-0HC_Volume_7")
        );
    }

    #[test]
    fn test_plan_in_place_update() {
        let prior = json!({"name": "data", "size": 10, "location": "fsn1", "automount": false});
        let plan = plan_changes(&schema(), Some(&prior), &json!({"name": "data", "size": 20}));

        assert!(!plan.requires_replace);
        assert_eq!(
            plan.changes,
            vec![AttributeChange::modified("size", json!(10), json!(20))]
        );
    }

    #[test]
    fn test_plan_force_new_requires_replace() {
        let prior = json!({"name": "data", "size": 10, "location": "fsn1", "automount": false});
        let plan = plan_changes(
            &schema(),
            Some(&prior),
            &json!({"name": "data", "size": 10, "location": "nbg1"}),
        );

        assert!(plan.requires_replace);
        assert_eq!(
            plan.change("location"),
            Some(&AttributeChange::modified("location", json!("fsn1"), json!("nbg1")))
        );
    }

    #[test]
    fn test_imported_resource() {
        let imported = ImportedResource::new("hcloud_volume", json!({"id": "7"}));
        assert_eq!(imported.resource_type, "hcloud_volume");
        assert_eq!(imported.state["id"], "7");
    }
}
