//! Reference-counted texture view cache
//!
//! Views are keyed by what they mean (texture, view kind, mip), never by
//! call site: asking twice for the same key returns the same view and bumps
//! its count. The view is destroyed when the last holder releases it.

use rustc_hash::FxHashMap;

use crate::error::GraphicsResult;
use crate::gpu::descriptor::DescriptorBinding;
use crate::gpu::resource::ResourceHandle;
use crate::gpu::texture::{Format, MipSelector};
use crate::gpu::view::{TextureView, ViewKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewKey {
    /// Uuid of the viewed texture
    pub texture: u64,
    pub kind: ViewKind,
    pub mip: MipSelector,
}

/// One counted reference to a cached view. Every handle from
/// [`GraphicsContext::view_get`](crate::gpu::context::GraphicsContext::view_get)
/// is given back exactly once through `view_release`, which consumes it.
/// Commands record `binding`.
#[derive(Debug, PartialEq, Eq)]
pub struct ViewHandle {
    pub key: ViewKey,
    pub binding: DescriptorBinding,
    pub resource: ResourceHandle,
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

#[derive(Debug)]
struct CacheEntry {
    view: TextureView,
    refs: u32,
}

#[derive(Debug, Default)]
pub struct ViewCache {
    entries: FxHashMap<u64, Vec<CacheEntry>>,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the view for `key`, creating it with `create` on first use
    pub fn get_or_create<F>(&mut self, key: ViewKey, create: F) -> GraphicsResult<ViewHandle>
    where
        F: FnOnce() -> GraphicsResult<TextureView>,
    {
        let entries = self.entries.entry(key.texture).or_default();
        if let Some(entry) = entries.iter_mut().find(|e| e.view.key() == key) {
            entry.refs += 1;
            return Ok(entry.view.handle());
        }

        let view = match create() {
            Ok(view) => view,
            Err(e) => {
                if entries.is_empty() {
                    self.entries.remove(&key.texture);
                }
                return Err(e);
            }
        };
        let handle = view.handle();
        entries.push(CacheEntry { view, refs: 1 });
        Ok(handle)
    }

    /// Drop one reference. Returns the view to destroy once nobody holds it.
    pub fn release(&mut self, key: &ViewKey) -> Option<TextureView> {
        let Some(entries) = self.entries.get_mut(&key.texture) else {
            log::warn!("[ViewCache::release] No views cached for texture {}", key.texture);
            return None;
        };
        let Some(position) = entries.iter().position(|e| e.view.key() == *key) else {
            log::warn!("[ViewCache::release] Unknown view {:?}", key);
            return None;
        };

        entries[position].refs -= 1;
        if entries[position].refs > 0 {
            return None;
        }

        let entry = entries.swap_remove(position);
        if entries.is_empty() {
            self.entries.remove(&key.texture);
        }
        Some(entry.view)
    }

    /// Remove every view of a texture regardless of its count
    pub fn remove_texture(&mut self, texture: u64) -> Vec<(TextureView, u32)> {
        self.entries
            .remove(&texture)
            .map(|entries| entries.into_iter().map(|e| (e.view, e.refs)).collect())
            .unwrap_or_default()
    }

    /// Remove everything, for shutdown
    pub fn drain(&mut self) -> Vec<(TextureView, u32)> {
        self.entries
            .drain()
            .flat_map(|(_, entries)| entries.into_iter().map(|e| (e.view, e.refs)))
            .collect()
    }

    pub fn ref_count(&self, key: &ViewKey) -> u32 {
        self.entries
            .get(&key.texture)
            .and_then(|entries| entries.iter().find(|e| e.view.key() == *key))
            .map(|e| e.refs)
            .unwrap_or(0)
    }

    /// Number of live views
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
