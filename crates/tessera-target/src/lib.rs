//! Target descriptions and per-target planner hooks.
//!
//! A [`TargetMap`] tells the planner which compilation target serves
//! each device id. Targets contribute storage-scope information through
//! named hooks in a process-wide [registry](crate::registry); device
//! placement comes from annotations carried on the function itself.

mod registry;

use std::collections::{BTreeMap, HashMap};

use tessera_ir::{DeviceType, Expr, Function, Handle};

pub use registry::{
    collect_storage_info, register_storage_info, storage_hook_key, storage_info_hook,
    StorageInfoHook,
};

/// A compilation target: a backend kind plus an optional device attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// Backend kind name, e.g. `"opencl"` or `"llvm"`.
    pub kind: String,
    /// Optional device attribute, e.g. `"adreno"`.
    pub device: Option<String>,
}

impl Target {
    /// Creates a target with no device attribute.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            device: None,
        }
    }

    /// Creates a target with a device attribute.
    pub fn with_device(kind: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            device: Some(device.into()),
        }
    }
}

/// Targets keyed by device id; iteration order is ascending device id.
pub type TargetMap = BTreeMap<DeviceType, Target>;

/// Device placement per expression node.
pub type DeviceMap = HashMap<Handle<Expr>, DeviceType>;

/// Storage scopes per expression node, one entry per produced tensor.
pub type StorageInfoMap = HashMap<Handle<Expr>, Vec<String>>;

/// Gathers the device placement of every annotated node in a function.
///
/// Nodes without an annotation are simply absent; consumers treat that
/// as "unannotated" (device 0).
pub fn collect_device_info(func: &Function) -> DeviceMap {
    func.device_annotations.clone()
}
