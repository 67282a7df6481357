//! Assignment pass: storage-id assignment and buffer reuse.
//!
//! The second walk visits nodes in the same order as the liveness pass
//! and materialises each prototype: call results may take over released
//! buffers, parameters and constants always get fresh, pinned ones.
//! Argument tokens are released as their last consumer is processed.

use tessera_ir::{Arena, Expr, Function, Handle};

use crate::alloc::TokenAllocator;
use crate::error::PlanError;
use crate::token::StorageToken;
use crate::visit::{StoragePass, TokenMap, Traversal};

/// Outcome of the assignment pass.
pub(crate) struct Assignment {
    /// Final token list per node.
    pub token_map: TokenMap,
    /// The producing nodes (parameters, constants, calls), in visit order.
    pub producers: Vec<Handle<Expr>>,
    /// Bytes allocated across linear buffers.
    pub total_alloc_bytes: u64,
}

/// Assigns storage to every prototype token of `func`.
pub(crate) fn assign_storage(
    func: &Function,
    tokens: &mut Arena<StorageToken>,
    prototype: &TokenMap,
) -> Result<Assignment, PlanError> {
    let mut traversal = Traversal::new(
        func,
        tokens,
        StorageAssigner {
            prototype,
            allocator: TokenAllocator::default(),
            producers: Vec::new(),
        },
    );
    traversal.run()?;
    let total_alloc_bytes = traversal.pass.allocator.total_alloc_bytes(traversal.tokens);
    Ok(Assignment {
        token_map: traversal.token_map,
        producers: traversal.pass.producers,
        total_alloc_bytes,
    })
}

struct StorageAssigner<'p> {
    prototype: &'p TokenMap,
    allocator: TokenAllocator,
    producers: Vec<Handle<Expr>>,
}

impl StoragePass for StorageAssigner<'_> {
    fn create_token(
        t: &mut Traversal<'_, Self>,
        expr: Handle<Expr>,
        can_realloc: bool,
    ) -> Result<(), PlanError> {
        if t.token_map.contains_key(&expr) {
            return Err(PlanError::TokenAlreadyAssigned { expr });
        }
        let protos = t
            .pass
            .prototype
            .get(&expr)
            .ok_or(PlanError::MissingToken { expr })?
            .clone();

        let mut toks = Vec::with_capacity(protos.len());
        for proto in protos {
            // Of the 1d scopes only plain "global" may search the free
            // list; texture tokens always try the 2d pool's reuse path.
            let reusable =
                t.tokens[proto].storage_scope == "global" || t.tokens[proto].is_texture();
            let tok = if can_realloc && reusable {
                t.pass.allocator.request(t.tokens, proto)?
            } else {
                let tok = t.pass.allocator.alloc(t.tokens, proto)?;
                // parameters, constants, and opaque scopes are never
                // handed back for reuse
                t.tokens[tok].ref_counter += 1;
                tok
            };
            toks.push(tok);
        }
        t.pass.producers.push(expr);
        t.token_map.insert(expr, toks);
        Ok(())
    }

    fn visit_call(t: &mut Traversal<'_, Self>, expr: Handle<Expr>) -> Result<(), PlanError> {
        let args = match &t.func.expressions[expr] {
            Expr::Call { args, .. } => args.clone(),
            _ => unreachable!("visit_call on a non-call node"),
        };
        let mut arg_tokens = Vec::new();
        for arg in &args {
            arg_tokens.extend(t.tokens_for(*arg)?);
        }

        Self::create_token(t, expr, true)?;

        // outputs nobody consumes can be released right away
        for tok in t.token_map[&expr].clone() {
            t.pass.allocator.check_for_release(t.tokens, tok);
        }
        for tok in arg_tokens {
            debug_assert!(
                t.tokens[tok].ref_counter > 0,
                "argument token released more often than it was consumed"
            );
            t.tokens[tok].ref_counter -= 1;
            t.pass.allocator.check_for_release(t.tokens, tok);
        }
        Ok(())
    }
}
