//! GPU resource and command layer
//!
//! Descriptor heaps, resources and their symbolic states, views and the
//! view cache, command recording, fences and the swapchain. Everything here
//! is driven through an explicit [`GraphicsContext`].

pub mod barrier;
pub mod buffer;
pub mod command;
pub mod constants;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod fence;
pub mod pipeline;
pub mod queue;
pub mod resource;
pub mod sampler;
pub mod swapchain;
pub mod texture;
pub mod view;
pub mod view_cache;

pub use barrier::Barrier;
pub use buffer::{Buffer, BufferDesc, BufferType};
pub use command::{BindPoint, Command, CommandBuffer, CommandBufferState, QueueType};
pub use constants::FRAMES_IN_FLIGHT;
pub use context::GraphicsContext;
pub use descriptor::{Descriptor, DescriptorBinding, DescriptorHeap, DescriptorHeaps, HeapKind};
pub use fence::{Fence, FenceHandle};
pub use pipeline::{
    DepthOp, Pipeline, PipelineDesc, PipelineKind, Signature, SignatureDesc, SignatureEntry, Topology,
};
pub use queue::CommandQueue;
pub use resource::{ResourceHandle, ResourceState, ResourceTracker};
pub use sampler::{AddressMode, Filter, Sampler, SamplerDesc};
pub use swapchain::{Backbuffer, Swapchain, SwapchainDesc};
pub use texture::{Format, MipSelector, Texture, TextureDesc, TextureUsage};
pub use view::{TextureView, ViewKind};
pub use view_cache::{ViewCache, ViewHandle, ViewKey};

#[cfg(test)]
mod tests;
