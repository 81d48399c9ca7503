//! GPU resource identity, symbolic states and the live-resource tracker

use rustc_hash::FxHashMap;

/// Backend handle of a buffer or texture allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u64);

/// Symbolic resource state as seen by the GPU timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    /// Readable by any stage; upload heap resources stay here
    GenericRead,
    VertexAndConstantBuffer,
    IndexBuffer,
    RenderTarget,
    DepthWrite,
    DepthRead,
    /// Unordered access (read/write storage)
    Storage,
    ShaderResource,
    CopySource,
    CopyDest,
    Present,
    AccelerationStructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
}

#[derive(Debug, Clone)]
struct TrackedResource {
    name: String,
    kind: ResourceKind,
    bytes: u64,
}

/// Registry of every live GPU allocation, used for leak reporting
#[derive(Debug, Default)]
pub struct ResourceTracker {
    live: FxHashMap<u64, TrackedResource>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, uuid: u64, name: &str, kind: ResourceKind, bytes: u64) {
        log::debug!("[ResourceTracker] + {:?} '{}' ({} bytes)", kind, name, bytes);
        self.live.insert(
            uuid,
            TrackedResource {
                name: name.to_string(),
                kind,
                bytes,
            },
        );
    }

    /// Returns false when `uuid` was not tracked
    pub fn untrack(&mut self, uuid: u64) -> bool {
        match self.live.remove(&uuid) {
            Some(res) => {
                log::debug!("[ResourceTracker] - {:?} '{}'", res.kind, res.name);
                true
            }
            None => false,
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> u64 {
        self.live.values().map(|r| r.bytes).sum()
    }

    pub fn is_live(&self, uuid: u64) -> bool {
        self.live.contains_key(&uuid)
    }

    /// Log every resource that is still alive and return how many there are
    pub fn report(&self) -> usize {
        if self.live.is_empty() {
            log::info!("[ResourceTracker::report] No leaked resources");
            return 0;
        }

        let mut leaks: Vec<_> = self.live.values().collect();
        leaks.sort_by(|a, b| a.name.cmp(&b.name));
        for res in &leaks {
            log::warn!(
                "[ResourceTracker::report] Leaked {:?} '{}' ({} bytes)",
                res.kind,
                res.name,
                res.bytes
            );
        }
        log::warn!(
            "[ResourceTracker::report] {} resources leaked ({} bytes)",
            leaks.len(),
            self.live_bytes()
        );
        leaks.len()
    }
}
