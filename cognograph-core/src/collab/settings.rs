//! Opaque settings blobs.
//!
//! These settings change in whole-object bursts, so each is stored as a single
//! JSON string entry in the flat `settings` map rather than field by field.
//! Decoding is per key: a corrupt or missing blob leaves only that field unset.

use log::warn;
use yrs::{Any, Map, MapRef, Out, ReadTxn, TransactionMut};

use crate::WorkspaceSnapshot;

/// Keys of the `settings` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    PropertySchema,
    ThemeSettings,
    WorkspacePreferences,
    Layers,
    Areas,
}

impl SettingKey {
    pub const ALL: [SettingKey; 5] = [
        SettingKey::PropertySchema,
        SettingKey::ThemeSettings,
        SettingKey::WorkspacePreferences,
        SettingKey::Layers,
        SettingKey::Areas,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::PropertySchema => "propertySchema",
            SettingKey::ThemeSettings => "themeSettings",
            SettingKey::WorkspacePreferences => "workspacePreferences",
            SettingKey::Layers => "layers",
            SettingKey::Areas => "areas",
        }
    }

    pub fn get(self, snapshot: &WorkspaceSnapshot) -> Option<&serde_json::Value> {
        match self {
            SettingKey::PropertySchema => snapshot.property_schema.as_ref(),
            SettingKey::ThemeSettings => snapshot.theme_settings.as_ref(),
            SettingKey::WorkspacePreferences => snapshot.workspace_preferences.as_ref(),
            SettingKey::Layers => snapshot.layers.as_ref(),
            SettingKey::Areas => snapshot.areas.as_ref(),
        }
    }

    pub fn set(self, snapshot: &mut WorkspaceSnapshot, value: Option<serde_json::Value>) {
        let slot = match self {
            SettingKey::PropertySchema => &mut snapshot.property_schema,
            SettingKey::ThemeSettings => &mut snapshot.theme_settings,
            SettingKey::WorkspacePreferences => &mut snapshot.workspace_preferences,
            SettingKey::Layers => &mut snapshot.layers,
            SettingKey::Areas => &mut snapshot.areas,
        };
        *slot = value;
    }
}

/// Stores `value` as a JSON string, or removes the entry when `None`.
///
/// Returns false when the stored string is already identical.
pub(crate) fn write_setting(
    txn: &mut TransactionMut,
    settings: &MapRef,
    key: SettingKey,
    value: Option<&serde_json::Value>,
) -> bool {
    match value {
        Some(value) => {
            let encoded = value.to_string();
            if let Some(Out::Any(Any::String(current))) = settings.get(&*txn, key.as_str()) {
                if *current == *encoded {
                    return false;
                }
            }
            settings.insert(txn, key.as_str(), Any::String(encoded.into()));
            true
        }
        None => settings.remove(txn, key.as_str()).is_some(),
    }
}

/// Parses one blob; any failure yields `None` for this key alone.
pub(crate) fn read_setting<T: ReadTxn>(
    txn: &T,
    settings: &MapRef,
    key: SettingKey,
) -> Option<serde_json::Value> {
    match settings.get(txn, key.as_str())? {
        Out::Any(Any::String(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("dropping corrupt `{}` setting: {e}", key.as_str());
                None
            }
        },
        Out::Any(Any::Null) => None,
        _ => {
            warn!("dropping `{}` setting: not a JSON string", key.as_str());
            None
        }
    }
}
