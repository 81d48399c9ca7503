//! Hot-reloadable pipelines
//!
//! A hot pipeline owns its signature, its fixed-function description and one
//! watched source file per shader stage. `rebuild` is called once per frame;
//! when a watched file changes the stage is recompiled and, on success, a new
//! pipeline is built and swapped in. A failed compile or build leaves the
//! previous pipeline and bytecode untouched.
//!
//! A replaced pipeline may still be referenced by submitted frames. It is
//! retired with the last signaled fence value and freed once the GPU has
//! completed that value. `rebuild` runs before the frame records with the
//! pipeline, so work of the current frame never uses a retired one.

use std::path::Path;

use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::context::GraphicsContext;
use crate::gpu::pipeline::{Pipeline, PipelineDesc, Signature, SignatureDesc};
use crate::hot_reload::compiler::{CompiledShader, ShaderStage};
use crate::utils::FileWatch;

#[derive(Debug)]
struct ShaderWatch {
    stage: ShaderStage,
    watch: FileWatch,
    shader: CompiledShader,
}

#[derive(Debug)]
pub struct HotPipeline {
    name: String,
    signature_desc: SignatureDesc,
    desc: PipelineDesc,
    signature: Option<Signature>,
    pipeline: Option<Pipeline>,
    watches: Vec<ShaderWatch>,
    /// Replaced pipelines and the fence value that retires them
    retired: Vec<(Pipeline, u64)>,
    generation: u64,
}

impl HotPipeline {
    pub fn new(name: impl Into<String>, signature: SignatureDesc, desc: PipelineDesc) -> Self {
        Self {
            name: name.into(),
            signature_desc: signature,
            desc,
            signature: None,
            pipeline: None,
            watches: Vec::new(),
            retired: Vec::new(),
            generation: 0,
        }
    }

    /// Watch `path` and compile it for `stage`. Replaces an earlier shader
    /// of the same stage.
    pub fn add_shader(&mut self, ctx: &mut GraphicsContext, path: impl AsRef<Path>, stage: ShaderStage) -> GraphicsResult<()> {
        let path = path.as_ref();
        let watch = FileWatch::new(path, ctx.config().poll_interval())?;
        let shader = ctx.compile_shader(path, stage)?;

        let entry = ShaderWatch { stage, watch, shader };
        match self.watches.iter_mut().find(|w| w.stage == stage) {
            Some(existing) => *existing = entry,
            None => self.watches.push(entry),
        }
        log::debug!("[HotPipeline::add_shader] '{}' watches {} ({:?})", self.name, path.display(), stage);
        Ok(())
    }

    /// Create the signature (once) and the pipeline from the current shaders
    pub fn build(&mut self, ctx: &mut GraphicsContext) -> GraphicsResult<()> {
        if self.signature.is_none() {
            self.signature = Some(Signature::new(ctx, self.signature_desc.clone())?);
        }
        let pipeline = self.create_pipeline(ctx)?;
        self.swap(ctx, pipeline);
        self.generation += 1;
        log::info!("[HotPipeline::build] Built '{}' (generation {})", self.name, self.generation);
        Ok(())
    }

    fn swap(&mut self, ctx: &mut GraphicsContext, pipeline: Pipeline) {
        if let Some(old) = self.pipeline.replace(pipeline) {
            let value = ctx.queue().fence().value();
            self.retired.push((old, value));
        }
        self.free_retired(ctx);
    }

    /// Free replaced pipelines the GPU is done with
    fn free_retired(&mut self, ctx: &mut GraphicsContext) {
        if self.retired.is_empty() {
            return;
        }
        let completed = ctx.completed_value();
        let (done, pending): (Vec<_>, Vec<_>) = self
            .retired
            .drain(..)
            .partition(|(_, value)| *value <= completed);
        self.retired = pending;
        for (pipeline, _) in done {
            pipeline.free(ctx);
        }
    }

    fn create_pipeline(&self, ctx: &mut GraphicsContext) -> GraphicsResult<Pipeline> {
        let Some(signature) = self.signature.as_ref() else {
            return Err(GraphicsError::invalid_state("hot_pipeline_build", "signature not created"));
        };

        if let Some(compute) = self.shader(ShaderStage::Compute) {
            return Pipeline::compute(ctx, signature, compute);
        }

        match (self.shader(ShaderStage::Vertex), self.shader(ShaderStage::Pixel)) {
            (Some(vertex), Some(pixel)) => Pipeline::graphics(ctx, signature, vertex, pixel, &self.desc),
            _ => Err(GraphicsError::invalid_state(
                "hot_pipeline_build",
                format!("'{}' needs a compute shader or a vertex and a pixel shader", self.name),
            )),
        }
    }

    /// Poll the watched files and rebuild if any changed and compiled.
    /// Returns true when a new pipeline was swapped in. Only device loss is
    /// reported as an error; everything else keeps the working pipeline.
    pub fn rebuild(&mut self, ctx: &mut GraphicsContext) -> GraphicsResult<bool> {
        self.free_retired(ctx);
        if self.pipeline.is_none() {
            return Ok(false);
        }

        let mut recompiled = Vec::new();
        for (index, watch) in self.watches.iter_mut().enumerate() {
            if !watch.watch.check() {
                continue;
            }
            match ctx.compile_shader(watch.watch.path(), watch.stage) {
                Ok(shader) => recompiled.push((index, shader)),
                Err(e) => log::error!(
                    "[HotPipeline::rebuild] '{}' keeps its previous {:?} shader: {}",
                    self.name,
                    watch.stage,
                    e
                ),
            }
        }
        if recompiled.is_empty() {
            return Ok(false);
        }

        let previous: Vec<(usize, CompiledShader)> = recompiled
            .into_iter()
            .map(|(index, shader)| (index, std::mem::replace(&mut self.watches[index].shader, shader)))
            .collect();

        match self.create_pipeline(ctx) {
            Ok(pipeline) => {
                self.swap(ctx, pipeline);
                self.generation += 1;
                log::info!("[HotPipeline::rebuild] Reloaded '{}' (generation {})", self.name, self.generation);
                Ok(true)
            }
            Err(e) => {
                for (index, shader) in previous {
                    self.watches[index].shader = shader;
                }
                if matches!(e, GraphicsError::DeviceLost { .. }) {
                    return Err(e);
                }
                log::error!("[HotPipeline::rebuild] '{}' keeps its previous pipeline: {}", self.name, e);
                Ok(false)
            }
        }
    }

    /// Free everything. The caller has drained the GPU of work that uses
    /// this pipeline.
    pub fn free(mut self, ctx: &mut GraphicsContext) {
        for (pipeline, _) in self.retired.drain(..) {
            pipeline.free(ctx);
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.free(ctx);
        }
        if let Some(signature) = self.signature.take() {
            signature.free(ctx);
        }
        self.watches.clear();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn is_compute(&self) -> bool {
        self.shader(ShaderStage::Compute).is_some()
    }

    /// Bytecode currently used for `stage`
    pub fn shader(&self, stage: ShaderStage) -> Option<&CompiledShader> {
        self.watches.iter().find(|w| w.stage == stage).map(|w| &w.shader)
    }

    /// Replaced pipelines still waiting for the GPU
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Number of pipelines built so far
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
