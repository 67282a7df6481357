//! Two-level storage token allocator.
//!
//! [`TokenAllocator`] routes each request to a linear byte-buffer pool
//! or a 2d image pool based on the token's storage scope, and owns the
//! monotonically increasing storage-id counter shared by both.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tessera_ir::{Arena, Handle};

use crate::error::PlanError;
use crate::texture::{apply_texture_flattening, texture_layout_separator, Texture2dShape};
use crate::token::{concrete_shape, memory_size, StorageToken};

/// Linear byte-buffer pool with fuzzy size matching.
pub(crate) struct TokenAllocator1D {
    /// Scale factor bounding the cached sizes eligible for reuse.
    match_range: u64,
    /// Free tokens keyed by their high-water byte size.
    free: BTreeMap<u64, Vec<Handle<StorageToken>>>,
    /// Every token ever allocated, for byte accounting.
    data: Vec<Handle<StorageToken>>,
}

impl Default for TokenAllocator1D {
    fn default() -> Self {
        Self {
            match_range: 16,
            free: BTreeMap::new(),
            data: Vec::new(),
        }
    }
}

impl TokenAllocator1D {
    /// Searches the free list for a block serving `prototype`.
    ///
    /// Only cached sizes within `[size / match_range, size * match_range]`
    /// are considered: blocks at least as large as the request first, in
    /// ascending size order, then smaller blocks in descending order.
    /// The first block on a matching device wins.
    fn request(
        &mut self,
        tokens: &mut Arena<StorageToken>,
        prototype: Handle<StorageToken>,
    ) -> Result<Option<Handle<StorageToken>>, PlanError> {
        let size = memory_size(&tokens[prototype].ttype)?;
        if self.match_range == 0 {
            return Ok(None);
        }
        let lower = size / self.match_range;
        let upper = size.saturating_mul(self.match_range);
        let device_type = tokens[prototype].device_type;

        let mut found = None;
        'larger: for (&cached, list) in self.free.range(size..=upper) {
            for (i, &tok) in list.iter().enumerate() {
                if tokens[tok].device_type == device_type {
                    found = Some((cached, i));
                    break 'larger;
                }
            }
        }
        if found.is_none() {
            'smaller: for (&cached, list) in self.free.range(lower..size).rev() {
                for (i, &tok) in list.iter().enumerate().rev() {
                    if tokens[tok].device_type == device_type {
                        found = Some((cached, i));
                        break 'smaller;
                    }
                }
            }
        }
        let Some((key, index)) = found else {
            return Ok(None);
        };

        let mut list = self.free.remove(&key).unwrap_or_default();
        let tok = list.remove(index);
        if !list.is_empty() {
            self.free.insert(key, list);
        }

        let requester_refs = tokens[prototype].ref_counter;
        let token = &mut tokens[tok];
        debug_assert_eq!(token.ref_counter, 0, "free list held a live token");
        token.max_bytes = token.max_bytes.max(size);
        token.ref_counter = requester_refs;
        Ok(Some(tok))
    }

    /// Turns the prototype itself into a freshly allocated token.
    fn alloc(
        &mut self,
        tokens: &mut Arena<StorageToken>,
        prototype: Handle<StorageToken>,
        storage_id: i64,
    ) -> Result<Handle<StorageToken>, PlanError> {
        let size = memory_size(&tokens[prototype].ttype)?;
        let token = &mut tokens[prototype];
        token.max_bytes = size;
        token.storage_id = storage_id;
        self.data.push(prototype);
        Ok(prototype)
    }

    /// Moves the token to the free list once its consumers are gone.
    fn check_for_release(&mut self, tokens: &Arena<StorageToken>, tok: Handle<StorageToken>) {
        let token = &tokens[tok];
        assert!(token.is_assigned(), "releasing a token without a storage id");
        if token.ref_counter == 0 {
            self.free.entry(token.max_bytes).or_default().push(tok);
        }
    }

    /// Total bytes across every allocated linear buffer.
    fn total_alloc_bytes(&self, tokens: &Arena<StorageToken>) -> u64 {
        self.data.iter().map(|&tok| tokens[tok].max_bytes).sum()
    }
}

/// A live or free 2d image block.
struct MemBlock {
    token: Handle<StorageToken>,
    x: i64,
    y: i64,
}

/// 2d image-buffer pool keyed by `(width, height, dtype)`.
#[derive(Default)]
pub(crate) struct TokenAllocator2D {
    /// Block state per storage id.
    blocks: HashMap<i64, MemBlock>,
    /// Storage ids currently free for reuse.
    free_list: BTreeSet<i64>,
}

impl TokenAllocator2D {
    /// Searches the free blocks for one serving `prototype`.
    ///
    /// Candidates must match the requested dtype. The block needing the
    /// least expansion wins; among blocks needing none, the one wasting
    /// the least area wins. A winner is accepted only if the expansion
    /// does not exceed the requested area.
    fn request(
        &mut self,
        tokens: &mut Arena<StorageToken>,
        prototype: Handle<StorageToken>,
    ) -> Result<Option<Handle<StorageToken>>, PlanError> {
        let shape = Self::size_2d(&tokens[prototype])?;
        let requested = shape.width * shape.height;
        let dtype = tokens[prototype].ttype.dtype;

        let mut min_added = i64::MAX;
        let mut min_wasted = i64::MAX;
        let mut best: Option<(i64, i64, i64)> = None;
        for &free_id in &self.free_list {
            let cached = &self.blocks[&free_id];
            // only blocks of the same element type can be reinterpreted
            if tokens[cached.token].ttype.dtype != dtype {
                continue;
            }
            let new_x = cached.x.max(shape.width);
            let new_y = cached.y.max(shape.height);
            let expanded = new_x * new_y;
            let added = expanded - cached.x * cached.y;
            let wasted = expanded - requested;
            if added < min_added || (min_added == 0 && added == 0 && wasted < min_wasted) {
                min_added = added;
                min_wasted = wasted;
                best = Some((free_id, new_x, new_y));
            }
        }

        let Some((best_id, x, y)) = best else {
            return Ok(None);
        };
        if min_added > requested {
            // growth per reuse is capped at the size of the new tensor
            return Ok(None);
        }

        let tok = self.blocks[&best_id].token;
        let requester_refs = tokens[prototype].ref_counter;
        tokens[tok].ref_counter = requester_refs;
        self.blocks.insert(best_id, MemBlock { token: tok, x, y });
        self.free_list.remove(&best_id);
        Ok(Some(tok))
    }

    /// Records the prototype as a fresh image block.
    fn alloc(
        &mut self,
        tokens: &mut Arena<StorageToken>,
        prototype: Handle<StorageToken>,
        storage_id: i64,
    ) -> Result<Handle<StorageToken>, PlanError> {
        let shape = Self::size_2d(&tokens[prototype])?;
        tokens[prototype].storage_id = storage_id;
        self.blocks.insert(
            storage_id,
            MemBlock {
                token: prototype,
                x: shape.width,
                y: shape.height,
            },
        );
        Ok(prototype)
    }

    /// Frees the token's block once its consumers are gone.
    fn check_for_release(&mut self, tokens: &Arena<StorageToken>, tok: Handle<StorageToken>) {
        let token = &tokens[tok];
        assert!(token.is_assigned(), "releasing a token without a storage id");
        if token.ref_counter == 0 {
            self.free_list.insert(token.storage_id);
        }
    }

    /// The flattened 2d extent a token occupies.
    fn size_2d(token: &StorageToken) -> Result<Texture2dShape, PlanError> {
        let dims = concrete_shape(&token.ttype)?;
        let axis = texture_layout_separator(dims.len(), &token.storage_scope)?;
        Ok(apply_texture_flattening(&dims, axis))
    }
}

/// Dispatch facade owning both pools and the storage-id counter.
///
/// Scope strings containing `"texture"` route to the 2d pool; everything
/// else is a linear buffer.
#[derive(Default)]
pub(crate) struct TokenAllocator {
    storage_ids: i64,
    token_1d: TokenAllocator1D,
    token_2d: TokenAllocator2D,
}

impl TokenAllocator {
    /// Allocates a brand-new storage id for the prototype.
    pub fn alloc(
        &mut self,
        tokens: &mut Arena<StorageToken>,
        prototype: Handle<StorageToken>,
    ) -> Result<Handle<StorageToken>, PlanError> {
        let storage_id = self.storage_ids;
        self.storage_ids += 1;
        if tokens[prototype].is_texture() {
            self.token_2d.alloc(tokens, prototype, storage_id)
        } else {
            self.token_1d.alloc(tokens, prototype, storage_id)
        }
    }

    /// Tries to reuse a released buffer, falling back to [`Self::alloc`].
    pub fn request(
        &mut self,
        tokens: &mut Arena<StorageToken>,
        prototype: Handle<StorageToken>,
    ) -> Result<Handle<StorageToken>, PlanError> {
        let reused = if tokens[prototype].is_texture() {
            self.token_2d.request(tokens, prototype)?
        } else {
            self.token_1d.request(tokens, prototype)?
        };
        match reused {
            Some(tok) => Ok(tok),
            None => self.alloc(tokens, prototype),
        }
    }

    /// Returns the token to its pool's free list if no consumers remain.
    pub fn check_for_release(&mut self, tokens: &Arena<StorageToken>, tok: Handle<StorageToken>) {
        if tokens[tok].is_texture() {
            self.token_2d.check_for_release(tokens, tok);
        } else {
            self.token_1d.check_for_release(tokens, tok);
        }
    }

    /// Total bytes allocated across linear buffers.
    pub fn total_alloc_bytes(&self, tokens: &Arena<StorageToken>) -> u64 {
        self.token_1d.total_alloc_bytes(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_ir::{DataType, DeviceType, TensorType};

    fn linear_proto(
        tokens: &mut Arena<StorageToken>,
        bytes: i64,
        refs: usize,
    ) -> Handle<StorageToken> {
        let mut tok = StorageToken::new(
            TensorType::with_dims(&[bytes], DataType::U8),
            DeviceType::UNANNOTATED,
        );
        tok.ref_counter = refs;
        tokens.append(tok)
    }

    fn texture_proto(
        tokens: &mut Arena<StorageToken>,
        dims: &[i64],
        dtype: DataType,
        refs: usize,
    ) -> Handle<StorageToken> {
        let mut tok = StorageToken::new(TensorType::with_dims(dims, dtype), DeviceType::UNANNOTATED);
        tok.storage_scope = "texture".into();
        tok.ref_counter = refs;
        tokens.append(tok)
    }

    fn consume_and_release(
        alloc: &mut TokenAllocator,
        tokens: &mut Arena<StorageToken>,
        tok: Handle<StorageToken>,
    ) {
        tokens[tok].ref_counter = 0;
        alloc.check_for_release(tokens, tok);
    }

    #[test]
    fn fuzzy_reuse_keeps_high_water_mark() {
        let mut tokens = Arena::new();
        let mut alloc = TokenAllocator::default();

        let a = linear_proto(&mut tokens, 1000, 1);
        let a = alloc.request(&mut tokens, a).unwrap();
        assert_eq!(tokens[a].storage_id, 0);
        consume_and_release(&mut alloc, &mut tokens, a);

        // 100 bytes is within [1000/16, 1000*16]; the freed block serves it
        let b = linear_proto(&mut tokens, 100, 1);
        let b = alloc.request(&mut tokens, b).unwrap();
        assert_eq!(tokens[b].storage_id, 0);
        assert_eq!(tokens[b].max_bytes, 1000);
        consume_and_release(&mut alloc, &mut tokens, b);

        let c = linear_proto(&mut tokens, 900, 1);
        let c = alloc.request(&mut tokens, c).unwrap();
        assert_eq!(tokens[c].storage_id, 0);
        assert_eq!(tokens[c].max_bytes, 1000);

        assert_eq!(alloc.total_alloc_bytes(&tokens), 1000);
    }

    #[test]
    fn reuse_prefers_larger_blocks_over_smaller() {
        let mut tokens = Arena::new();
        let mut alloc = TokenAllocator::default();

        let small = linear_proto(&mut tokens, 100, 1);
        let small = alloc.request(&mut tokens, small).unwrap();
        let large = linear_proto(&mut tokens, 1000, 1);
        let large = alloc.request(&mut tokens, large).unwrap();
        consume_and_release(&mut alloc, &mut tokens, small);
        consume_and_release(&mut alloc, &mut tokens, large);

        let req = linear_proto(&mut tokens, 900, 1);
        let got = alloc.request(&mut tokens, req).unwrap();
        assert_eq!(tokens[got].storage_id, tokens[large].storage_id);
    }

    #[test]
    fn out_of_range_sizes_get_a_fresh_block() {
        let mut tokens = Arena::new();
        let mut alloc = TokenAllocator::default();

        let a = linear_proto(&mut tokens, 1000, 1);
        let a = alloc.request(&mut tokens, a).unwrap();
        consume_and_release(&mut alloc, &mut tokens, a);

        // 1000 lies outside [50/16, 50*16]
        let b = linear_proto(&mut tokens, 50, 1);
        let b = alloc.request(&mut tokens, b).unwrap();
        assert_ne!(tokens[b].storage_id, tokens[a].storage_id);
    }

    #[test]
    fn reuse_requires_matching_device() {
        let mut tokens = Arena::new();
        let mut alloc = TokenAllocator::default();

        let a = linear_proto(&mut tokens, 512, 1);
        tokens[a].device_type = DeviceType(1);
        let a = alloc.request(&mut tokens, a).unwrap();
        consume_and_release(&mut alloc, &mut tokens, a);

        let b = linear_proto(&mut tokens, 512, 1);
        tokens[b].device_type = DeviceType(2);
        let b = alloc.request(&mut tokens, b).unwrap();
        assert_ne!(tokens[b].storage_id, tokens[a].storage_id);
    }

    #[test]
    fn orphan_token_is_freed_and_reused() {
        let mut tokens = Arena::new();
        let mut alloc = TokenAllocator::default();

        // zero remaining consumers from the start
        let orphan = linear_proto(&mut tokens, 256, 0);
        let orphan = alloc.request(&mut tokens, orphan).unwrap();
        alloc.check_for_release(&tokens, orphan);

        let next = linear_proto(&mut tokens, 256, 1);
        let next = alloc.request(&mut tokens, next).unwrap();
        assert_eq!(tokens[next].storage_id, tokens[orphan].storage_id);
    }

    #[test]
    fn texture_reuse_expands_within_requested_area() {
        let mut tokens = Arena::new();
        let mut alloc = TokenAllocator::default();

        // (1,64,64,4) under "texture": height 64, width 64
        let a = texture_proto(&mut tokens, &[1, 64, 64, 4], DataType::F32, 1);
        let a = alloc.request(&mut tokens, a).unwrap();
        consume_and_release(&mut alloc, &mut tokens, a);

        // (1,32,128,4): height 32, width 128; expansion to (128,64) adds
        // 4096 which equals the requested area, so the block is reused
        let b = texture_proto(&mut tokens, &[1, 32, 128, 4], DataType::F32, 1);
        let b = alloc.request(&mut tokens, b).unwrap();
        assert_eq!(tokens[b].storage_id, tokens[a].storage_id);
    }

    #[test]
    fn texture_reuse_rejects_oversized_expansion() {
        let mut tokens = Arena::new();
        let mut alloc = TokenAllocator::default();

        let a = texture_proto(&mut tokens, &[1, 4, 4, 4], DataType::F32, 1);
        let a = alloc.request(&mut tokens, a).unwrap();
        consume_and_release(&mut alloc, &mut tokens, a);

        // (4,4) -> (max(4,256), max(4,1)) adds 1008 > requested 256
        let b = texture_proto(&mut tokens, &[1, 1, 256, 4], DataType::F32, 1);
        let b = alloc.request(&mut tokens, b).unwrap();
        assert_ne!(tokens[b].storage_id, tokens[a].storage_id);
    }

    #[test]
    fn texture_reuse_requires_matching_dtype() {
        let mut tokens = Arena::new();
        let mut alloc = TokenAllocator::default();

        let a = texture_proto(&mut tokens, &[1, 64, 64, 4], DataType::F32, 1);
        let a = alloc.request(&mut tokens, a).unwrap();
        consume_and_release(&mut alloc, &mut tokens, a);

        let b = texture_proto(&mut tokens, &[1, 64, 64, 4], DataType::F16, 1);
        let b = alloc.request(&mut tokens, b).unwrap();
        assert_ne!(tokens[b].storage_id, tokens[a].storage_id);
    }

    #[test]
    fn texture_reuse_prefers_block_needing_no_expansion() {
        let mut tokens = Arena::new();
        let mut alloc = TokenAllocator::default();

        let small = texture_proto(&mut tokens, &[1, 16, 16, 4], DataType::F32, 1);
        let small = alloc.request(&mut tokens, small).unwrap();
        let large = texture_proto(&mut tokens, &[1, 64, 64, 4], DataType::F32, 1);
        let large = alloc.request(&mut tokens, large).unwrap();
        consume_and_release(&mut alloc, &mut tokens, small);
        consume_and_release(&mut alloc, &mut tokens, large);

        // fits in `large` without growth; `small` would need expansion
        let req = texture_proto(&mut tokens, &[1, 32, 32, 4], DataType::F32, 1);
        let got = alloc.request(&mut tokens, req).unwrap();
        assert_eq!(tokens[got].storage_id, tokens[large].storage_id);
    }

    #[test]
    fn storage_ids_are_shared_across_pools() {
        let mut tokens = Arena::new();
        let mut alloc = TokenAllocator::default();

        let linear = linear_proto(&mut tokens, 64, 1);
        let linear = alloc.request(&mut tokens, linear).unwrap();
        let image = texture_proto(&mut tokens, &[1, 8, 8, 4], DataType::F32, 1);
        let image = alloc.request(&mut tokens, image).unwrap();

        assert_eq!(tokens[linear].storage_id, 0);
        assert_eq!(tokens[image].storage_id, 1);
    }
}
