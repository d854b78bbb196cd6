//! `config` and `resource` commands.

use serde::Serialize;
use tracing::info;

use super::{Context, Output};
use crate::config::{SETTING_KEYS, SettingEntry, ValueSource, save_settings};
use crate::remote::resource::{RESOURCE_FIELDS, Resource, ResourceRegistry};
use crate::{ValidatedOutput, errors};

/// `config ls`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettingList {
    pub settings: Vec<SettingEntry>,
}

impl Output for SettingList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let width = self.settings.iter().map(|e| e.key.len()).max().unwrap_or(0);
        self.settings
            .iter()
            .map(|e| {
                let origin = match e.source {
                    ValueSource::Default => " (default)",
                    ValueSource::File => "",
                };
                format!("{:<width$}  {}{}", e.key, e.value, origin, width = width)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// `config get` and `config set`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettingValue {
    pub key: String,
    pub value: String,
}

impl Output for SettingValue {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        self.value.clone()
    }
}

pub fn config_list(ctx: &Context) -> ValidatedOutput<SettingList> {
    ValidatedOutput::ok(SettingList {
        settings: ctx.settings.entries(&ctx.file_settings),
    })
}

pub fn config_get(ctx: &Context, key: &str) -> ValidatedOutput<SettingValue> {
    match ctx.settings.value_of(key) {
        Some(value) => ValidatedOutput::ok(SettingValue {
            key: key.to_string(),
            value,
        }),
        None => ValidatedOutput::failed(errors::invalid_setting(
            key,
            &format!("known settings: {}", SETTING_KEYS.join(", ")),
        )),
    }
}

/// Validate and store one setting in `settings.kdl`.
pub fn config_set(ctx: &Context, key: &str, raw: &str) -> ValidatedOutput<SettingValue> {
    let mut file = ctx.file_settings.clone();
    if let Err(details) = file.set(key, raw) {
        return ValidatedOutput::failed(errors::invalid_setting(key, &details));
    }
    if let Err(e) = save_settings(&ctx.paths, &file) {
        return ValidatedOutput::from_error(e);
    }
    info!(key, value = raw, "setting saved");
    ValidatedOutput::ok(SettingValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

/// `resource ls`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceList {
    pub resources: Vec<NamedResource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedResource {
    pub name: String,
    #[serde(flatten)]
    pub resource: Resource,
}

impl Output for ResourceList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.resources.is_empty() {
            return "No resources.".to_string();
        }
        self.resources
            .iter()
            .map(|r| {
                let res = &r.resource;
                let mut line = format!(
                    "{}: {}@{} storage={}",
                    r.name, res.username, res.address, res.storage_dir
                );
                if let Some(key) = &res.key {
                    line.push_str(&format!(" key={}", key));
                }
                if !res.enabled {
                    line.push_str(" (disabled)");
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn registry(ctx: &Context) -> ValidatedOutput<ResourceRegistry> {
    ResourceRegistry::load(&ctx.paths.config_dir)
}

/// Register a resource; an existing one with the same name is replaced.
pub fn resource_add(ctx: &Context, name: &str, resource: Resource) -> ValidatedOutput<()> {
    let mut loaded = registry(ctx);
    if !loaded.success {
        return loaded.with_value(());
    }
    if name.trim().is_empty() {
        return ValidatedOutput::failed(errors::invalid_resource(name, "name must not be blank"));
    }
    let mut result = ValidatedOutput::ok(());
    if loaded.value.contains(name) {
        result.push_warning(format!("Replacing resource '{}'.", name));
    }
    let set = loaded.value.set(name, resource);
    result.absorb(&set);
    if !set.success {
        return result;
    }
    result.absorb(&loaded.value.save());
    result
}

/// Change one field of a registered resource.
pub fn resource_set(ctx: &Context, name: &str, field: &str, value: &str) -> ValidatedOutput<()> {
    let mut loaded = registry(ctx);
    if !loaded.success {
        return loaded.with_value(());
    }
    let found = loaded.value.require(name);
    if !found.success {
        return found.with_value(());
    }
    let mut resource = found.value;
    if let Err(details) = resource.set_field(field, value) {
        let details = if RESOURCE_FIELDS.contains(&field) {
            details
        } else {
            format!("{} (fields: {})", details, RESOURCE_FIELDS.join(", "))
        };
        return ValidatedOutput::failed(errors::invalid_resource(name, &details));
    }
    let set = loaded.value.set(name, resource);
    if !set.success {
        return set;
    }
    loaded.value.save()
}

pub fn resource_remove(ctx: &Context, name: &str) -> ValidatedOutput<()> {
    let mut loaded = registry(ctx);
    if !loaded.success {
        return loaded.with_value(());
    }
    if loaded.value.remove(name).is_none() {
        return ValidatedOutput::failed(errors::unknown_resource(name));
    }
    loaded.value.save()
}

pub fn resource_list(ctx: &Context) -> ValidatedOutput<ResourceList> {
    registry(ctx).map(|registry| ResourceList {
        resources: registry
            .iter()
            .map(|(name, resource)| NamedResource {
                name: name.clone(),
                resource: resource.clone(),
            })
            .collect(),
    })
}
