//! Shared traversal for the two planning passes.
//!
//! Both passes walk the function body in the same order and memoise a
//! node -> token-list map; only token creation and call handling differ.
//! That shared walk lives here, the pass-specific parts are supplied
//! through [`StoragePass`].

use std::collections::HashMap;

use tessera_ir::{Arena, Expr, Function, Handle};

use crate::error::PlanError;
use crate::token::StorageToken;

/// Token lists per expression node.
pub(crate) type TokenMap = HashMap<Handle<Expr>, Vec<Handle<StorageToken>>>;

/// The pass-specific half of a traversal.
pub(crate) trait StoragePass: Sized {
    /// Creates the storage tokens for a producing node.
    ///
    /// `can_realloc` is true for call results, which may reuse released
    /// buffers; parameters and constants may not.
    fn create_token(
        t: &mut Traversal<'_, Self>,
        expr: Handle<Expr>,
        can_realloc: bool,
    ) -> Result<(), PlanError>;

    /// Visits a call node: creates its tokens and accounts for the
    /// argument tokens it consumes.
    fn visit_call(t: &mut Traversal<'_, Self>, expr: Handle<Expr>) -> Result<(), PlanError>;
}

/// One walk over a function body.
pub(crate) struct Traversal<'a, P> {
    pub func: &'a Function,
    pub tokens: &'a mut Arena<StorageToken>,
    pub token_map: TokenMap,
    pub pass: P,
}

impl<'a, P: StoragePass> Traversal<'a, P> {
    pub fn new(func: &'a Function, tokens: &'a mut Arena<StorageToken>, pass: P) -> Self {
        Self {
            func,
            tokens,
            token_map: TokenMap::new(),
            pass,
        }
    }

    /// Walks the whole function: parameters first, then the body.
    ///
    /// Every token reached by the function result gets an extra
    /// reference so outputs are never handed back for reuse.
    pub fn run(&mut self) -> Result<(), PlanError> {
        let params = self.func.params.clone();
        for param in params {
            P::create_token(self, param, false)?;
        }
        let body = self.func.body.ok_or(PlanError::MissingBody)?;
        for tok in self.tokens_for(body)? {
            self.tokens[tok].ref_counter += 1;
        }
        Ok(())
    }

    /// Visits `expr` and returns its token list.
    pub fn tokens_for(&mut self, expr: Handle<Expr>) -> Result<Vec<Handle<StorageToken>>, PlanError> {
        self.visit(expr)?;
        self.token_map
            .get(&expr)
            .cloned()
            .ok_or(PlanError::MissingToken { expr })
    }

    /// Dispatches on the node kind; nodes already in the map are done.
    fn visit(&mut self, expr: Handle<Expr>) -> Result<(), PlanError> {
        if self.token_map.contains_key(&expr) {
            return Ok(());
        }
        let func = self.func;
        match &func.expressions[expr] {
            Expr::Constant { .. } => P::create_token(self, expr, false),
            Expr::Call { .. } => P::visit_call(self, expr),
            Expr::Tuple { fields } => {
                // aliases the field tokens, introduces none of its own
                let mut toks = Vec::new();
                for &field in fields {
                    toks.extend(self.tokens_for(field)?);
                }
                self.token_map.insert(expr, toks);
                Ok(())
            }
            Expr::TupleGetItem { tuple, index } => {
                let toks = self.tokens_for(*tuple)?;
                if *index >= toks.len() {
                    return Err(PlanError::TupleIndexOutOfRange {
                        index: *index,
                        fields: toks.len(),
                    });
                }
                self.token_map.insert(expr, vec![toks[*index]]);
                Ok(())
            }
            Expr::Let { var, value, body } => {
                let value_toks = self.tokens_for(*value)?;
                self.token_map.insert(*var, value_toks);
                let body_toks = self.tokens_for(*body)?;
                self.token_map.insert(expr, body_toks);
                Ok(())
            }
            e @ Expr::If { .. } => Err(PlanError::UnsupportedExpression {
                kind: e.kind_name(),
            }),
            // leaves that produce no token; nested functions are opaque
            Expr::Var { .. } | Expr::GlobalVar { .. } | Expr::Op(_) | Expr::Function(_) => Ok(()),
        }
    }
}
