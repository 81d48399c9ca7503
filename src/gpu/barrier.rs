//! Resource barriers and the transition elision rule

use crate::gpu::resource::{ResourceHandle, ResourceState};
use crate::gpu::texture::MipSelector;

/// A barrier recorded into a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    /// State transition of one resource (or one mip of a texture)
    Transition {
        resource: ResourceHandle,
        before: ResourceState,
        after: ResourceState,
        subresource: MipSelector,
    },
    /// Read-after-write hazard between two storage accesses
    Storage { resource: ResourceHandle },
}

/// Decide which barrier, if any, moves `resource` from `current` to `target`.
///
/// Storage to storage always needs a hazard barrier. Any other same-state
/// request needs nothing.
pub fn plan_transition(
    resource: ResourceHandle,
    current: ResourceState,
    target: ResourceState,
    subresource: MipSelector,
) -> Option<Barrier> {
    if current == ResourceState::Storage && target == ResourceState::Storage {
        return Some(Barrier::Storage { resource });
    }
    if current == target {
        return None;
    }
    Some(Barrier::Transition {
        resource,
        before: current,
        after: target,
        subresource,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RES: ResourceHandle = ResourceHandle(7);

    #[test]
    fn same_state_is_elided() {
        assert_eq!(
            plan_transition(RES, ResourceState::ShaderResource, ResourceState::ShaderResource, MipSelector::All),
            None
        );
    }

    #[test]
    fn storage_to_storage_emits_hazard_barrier() {
        assert_eq!(
            plan_transition(RES, ResourceState::Storage, ResourceState::Storage, MipSelector::All),
            Some(Barrier::Storage { resource: RES })
        );
    }

    #[test]
    fn state_change_emits_transition() {
        assert_eq!(
            plan_transition(RES, ResourceState::Common, ResourceState::CopyDest, MipSelector::Level(2)),
            Some(Barrier::Transition {
                resource: RES,
                before: ResourceState::Common,
                after: ResourceState::CopyDest,
                subresource: MipSelector::Level(2),
            })
        );
    }
}
