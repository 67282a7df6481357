//! Process-wide registry of storage-info hooks.
//!
//! Backends register a hook under a key derived from the target map;
//! the planner looks the hook up by rebuilding the same key. A missing
//! hook is not an error: the planner then falls back to the default
//! `"global"` scope for every tensor.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tessera_ir::Function;

use crate::{DeviceMap, StorageInfoMap, TargetMap};

/// Computes per-node storage scopes for a function.
///
/// The returned map holds, for each covered node, one scope string per
/// produced tensor.
pub type StorageInfoHook =
    Arc<dyn Fn(&Function, &DeviceMap, &TargetMap) -> StorageInfoMap + Send + Sync>;

static STORAGE_INFO_HOOKS: Lazy<RwLock<HashMap<String, StorageInfoHook>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers (or replaces) a storage-info hook under `key`.
pub fn register_storage_info(key: impl Into<String>, hook: StorageInfoHook) {
    STORAGE_INFO_HOOKS
        .write()
        .expect("storage info registry poisoned")
        .insert(key.into(), hook);
}

/// Looks up a registered hook by its exact key.
pub fn storage_info_hook(key: &str) -> Option<StorageInfoHook> {
    STORAGE_INFO_HOOKS
        .read()
        .expect("storage info registry poisoned")
        .get(key)
        .cloned()
}

/// Builds the hook key for a target map.
///
/// The key is `"relay.backend"` followed by each target's kind name and
/// optional device attribute, in ascending device-id order, then
/// `"._CollectStorageInfo"`.
pub fn storage_hook_key(targets: &TargetMap) -> String {
    let mut key = String::from("relay.backend");
    for target in targets.values() {
        key.push('.');
        key.push_str(&target.kind);
        if let Some(device) = &target.device {
            key.push('.');
            key.push_str(device);
        }
    }
    key.push_str("._CollectStorageInfo");
    key
}

/// Collects target-specific storage scopes for each node of `func`.
///
/// Returns an empty map when no hook is registered for the target map.
pub fn collect_storage_info(
    func: &Function,
    device_map: &DeviceMap,
    targets: &TargetMap,
) -> StorageInfoMap {
    let key = storage_hook_key(targets);
    match storage_info_hook(&key) {
        Some(hook) => hook(func, device_map, targets),
        None => {
            log::debug!("no storage info hook registered under {key}");
            StorageInfoMap::new()
        }
    }
}
