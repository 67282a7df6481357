//! Graph memory planner for the tessera graph runtime backend.
//!
//! Given a function whose body is a tree of tensor-producing
//! expressions, [`plan_memory`] assigns every producer a storage id and
//! a device/scope annotation, reusing buffers whenever liveness permits.
//! Downstream code generation and runtime allocation then only need
//! constant-time lookups into the resulting [`GraphMemoryPlan`].
//!
//! Planning is two sequential walks over the body in identical order: a
//! liveness pass that creates prototype tokens and counts consumers,
//! and an assignment pass that materialises them through a two-level
//! allocator (linear byte buffers and 2d image buffers).

mod alloc;
mod assign;
mod error;
mod liveness;
mod texture;
mod token;
mod visit;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tessera_ir::{Arena, Expr, Function, Handle};
use tessera_target::TargetMap;

pub use error::PlanError;
pub use texture::{
    apply_texture_flattening, is_texture_storage, texture_layout_separator, Texture2dShape,
};
pub use token::{StorageToken, UNASSIGNED};

/// Planned storage for one producing node, one entry per produced tensor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageInfo {
    /// Assigned buffer ids.
    pub storage_ids: Vec<i64>,
    /// Device placement per tensor; 0 means unannotated.
    pub device_types: Vec<i32>,
    /// Backing-storage tag per tensor.
    pub storage_scopes: Vec<String>,
}

/// The result of planning a function.
///
/// Covers every producing node (parameters, constants, calls); pure
/// aliasing nodes (tuples, projections, lets, variables) carry no
/// independent storage and are not listed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphMemoryPlan {
    /// Storage assignment per producing node.
    pub storage_map: HashMap<Handle<Expr>, StorageInfo>,
    /// Total bytes allocated across linear buffers.
    pub total_alloc_bytes: u64,
}

impl GraphMemoryPlan {
    /// Number of distinct storage ids in the plan.
    pub fn num_storages(&self) -> usize {
        self.storage_map
            .values()
            .flat_map(|info| info.storage_ids.iter().copied())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

impl fmt::Display for GraphMemoryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<_> = self.storage_map.iter().collect();
        nodes.sort_by_key(|(expr, _)| **expr);
        for (expr, info) in nodes {
            write!(f, "{expr:?}: ids={:?} devices=[", info.storage_ids)?;
            for (i, device) in info.device_types.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{device}")?;
            }
            write!(f, "] scopes=[")?;
            for (i, scope) in info.storage_scopes.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{scope}")?;
            }
            writeln!(f, "]")?;
        }
        write!(
            f,
            "{} nodes, {} storages, {} bytes of linear buffers",
            self.storage_map.len(),
            self.num_storages(),
            self.total_alloc_bytes
        )
    }
}

/// Plans storage for `func` under the given target map.
///
/// Runs the liveness pass, then the assignment pass, and serializes the
/// result. Either every produced tensor carries a device annotation or
/// none does; a mix aborts planning.
pub fn plan_memory(func: &Function, targets: &TargetMap) -> Result<GraphMemoryPlan, PlanError> {
    let mut tokens = Arena::new();
    let prototype = liveness::build_prototype(func, &mut tokens, targets)?;
    let assignment = assign::assign_storage(func, &mut tokens, &prototype)?;

    let mut storage_map = HashMap::with_capacity(assignment.producers.len());
    let mut annotated = 0usize;
    let mut total = 0usize;
    for expr in assignment.producers {
        let toks = assignment
            .token_map
            .get(&expr)
            .ok_or(PlanError::MissingToken { expr })?;
        let mut info = StorageInfo {
            storage_ids: Vec::with_capacity(toks.len()),
            device_types: Vec::with_capacity(toks.len()),
            storage_scopes: Vec::with_capacity(toks.len()),
        };
        for &tok in toks {
            let token = &tokens[tok];
            if token.device_type.is_annotated() {
                annotated += 1;
            }
            total += 1;
            info.storage_ids.push(token.storage_id);
            info.device_types.push(token.device_type.0);
            info.storage_scopes.push(token.storage_scope.clone());
        }
        storage_map.insert(expr, info);
    }

    if annotated != 0 && annotated != total {
        return Err(PlanError::MixedDeviceAnnotation { annotated, total });
    }

    let plan = GraphMemoryPlan {
        storage_map,
        total_alloc_bytes: assignment.total_alloc_bytes,
    };
    log::debug!(
        "planned {} nodes into {} storages ({} bytes of linear buffers)",
        plan.storage_map.len(),
        plan.num_storages(),
        plan.total_alloc_bytes
    );
    Ok(plan)
}
