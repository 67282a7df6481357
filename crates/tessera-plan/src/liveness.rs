//! Liveness pass: prototype token creation and reference counting.
//!
//! The first walk over the function creates one prototype token per
//! produced tensor, populated with the node's device placement and
//! storage scope, and counts each token's consumers. The resulting map
//! drives the assignment pass.

use tessera_ir::{Arena, DeviceType, Expr, Function, Handle};
use tessera_target::{collect_device_info, collect_storage_info, DeviceMap, StorageInfoMap, TargetMap};

use crate::error::PlanError;
use crate::token::StorageToken;
use crate::visit::{StoragePass, TokenMap, Traversal};

/// Builds the prototype token map for `func`.
///
/// Device placement and storage scopes are queried once, up front; the
/// traversal itself never calls back into the hooks.
pub(crate) fn build_prototype(
    func: &Function,
    tokens: &mut Arena<StorageToken>,
    targets: &TargetMap,
) -> Result<TokenMap, PlanError> {
    let device_map = collect_device_info(func);
    let storage_map = collect_storage_info(func, &device_map, targets);
    let mut traversal = Traversal::new(
        func,
        tokens,
        LivenessInit {
            device_map,
            storage_map,
        },
    );
    traversal.run()?;
    Ok(traversal.token_map)
}

struct LivenessInit {
    device_map: DeviceMap,
    storage_map: StorageInfoMap,
}

impl StoragePass for LivenessInit {
    fn create_token(
        t: &mut Traversal<'_, Self>,
        expr: Handle<Expr>,
        _can_realloc: bool,
    ) -> Result<(), PlanError> {
        if t.token_map.contains_key(&expr) {
            return Err(PlanError::TokenAlreadyAssigned { expr });
        }
        let device_type = t
            .pass
            .device_map
            .get(&expr)
            .copied()
            .unwrap_or(DeviceType::UNANNOTATED);
        let func = t.func;
        let tensors = func.type_of(expr)?.tensors();

        let scopes = t.pass.storage_map.get(&expr);
        if let Some(scopes) = scopes {
            if scopes.len() != tensors.len() {
                return Err(PlanError::ScopeArityMismatch {
                    scopes: scopes.len(),
                    tensors: tensors.len(),
                });
            }
        }

        let mut toks = Vec::with_capacity(tensors.len());
        for (i, ttype) in tensors.iter().enumerate() {
            let mut token = StorageToken::new(ttype.clone(), device_type);
            if let Some(scopes) = scopes {
                token.storage_scope = scopes[i].clone();
            }
            toks.push(t.tokens.append(token));
        }
        t.token_map.insert(expr, toks);
        Ok(())
    }

    fn visit_call(t: &mut Traversal<'_, Self>, expr: Handle<Expr>) -> Result<(), PlanError> {
        Self::create_token(t, expr, true)?;
        let args = match &t.func.expressions[expr] {
            Expr::Call { args, .. } => args.clone(),
            _ => unreachable!("visit_call on a non-call node"),
        };
        // every argument tensor gains this call as a consumer
        for arg in args {
            for tok in t.tokens_for(arg)? {
                t.tokens[tok].ref_counter += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_ir::{DataType, OpKind};

    #[test]
    fn consumers_and_outputs_are_counted() {
        let mut f = Function::new("main");
        let ty = f.tensor_type(&[16], DataType::F32);
        let x = f.param("x", ty);
        let a = f.call(OpKind::Relu, vec![x], ty);
        let b = f.call(OpKind::Sigmoid, vec![x], ty);
        let c = f.call(OpKind::Add, vec![a, b], ty);
        f.body = Some(c);

        let mut tokens = Arena::new();
        let map = build_prototype(&f, &mut tokens, &TargetMap::new()).unwrap();

        // x feeds two calls; a and b feed one each; c is only an output
        assert_eq!(tokens[map[&x][0]].ref_counter, 2);
        assert_eq!(tokens[map[&a][0]].ref_counter, 1);
        assert_eq!(tokens[map[&b][0]].ref_counter, 1);
        assert_eq!(tokens[map[&c][0]].ref_counter, 1);
    }

    #[test]
    fn tuple_nodes_alias_their_field_tokens() {
        let mut f = Function::new("main");
        let scalar = f.tensor_type(&[8], DataType::F32);
        let x = f.param("x", scalar);
        let pair = f.tuple_type(vec![
            tessera_ir::TensorType::with_dims(&[8], DataType::F32),
            tessera_ir::TensorType::with_dims(&[8], DataType::F32),
        ]);
        let split = f.call(OpKind::Custom { name: "split".into() }, vec![x], pair);
        let first = f.append(Expr::TupleGetItem { tuple: split, index: 0 }, scalar);
        let out = f.call(OpKind::Relu, vec![first], scalar);
        f.body = Some(out);

        let mut tokens = Arena::new();
        let map = build_prototype(&f, &mut tokens, &TargetMap::new()).unwrap();

        assert_eq!(map[&split].len(), 2);
        assert_eq!(map[&first], vec![map[&split][0]]);
        // the projected field is consumed, the other is not
        assert_eq!(tokens[map[&split][0]].ref_counter, 1);
        assert_eq!(tokens[map[&split][1]].ref_counter, 0);
    }

    #[test]
    fn unbound_variable_is_reported() {
        let mut f = Function::new("main");
        let ty = f.tensor_type(&[4], DataType::F32);
        // a variable that is neither a parameter nor let-bound
        let stray = f.append(Expr::Var { name: "stray".into() }, ty);
        let y = f.call(OpKind::Relu, vec![stray], ty);
        f.body = Some(y);

        let mut tokens = Arena::new();
        let err = build_prototype(&f, &mut tokens, &TargetMap::new()).unwrap_err();
        assert!(matches!(err, PlanError::MissingToken { .. }));
    }
}
