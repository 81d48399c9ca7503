use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use tempfile::TempDir;

use crate::backend::{HeadlessBackend, HeadlessProbe};
use crate::config::GpuConfig;
use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::context::GraphicsContext;
use crate::gpu::pipeline::{PipelineDesc, SignatureDesc, SignatureEntry};
use crate::hot_reload::*;

/// Returns the file contents as bytecode and fails on files containing "error"
struct CountingCompiler {
    calls: Arc<AtomicUsize>,
}

impl ShaderCompiler for CountingCompiler {
    fn compile(&mut self, path: &Path, _stage: ShaderStage) -> GraphicsResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let source = fs::read(path).map_err(|e| GraphicsError::io(path, e))?;
        if source.windows(5).any(|w| w == b"error") {
            return Err(shader_compile_error(&path.display().to_string(), "syntax error"));
        }
        Ok(source)
    }
}

struct Fixture {
    dir: TempDir,
    ctx: GraphicsContext,
    probe: HeadlessProbe,
    calls: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config = GpuConfig {
            cache_dir: dir.path().join("cache"),
            shader_poll_interval: 0.0,
            ..GpuConfig::default()
        };
        let backend = HeadlessBackend::new();
        let probe = backend.probe();
        let calls = Arc::new(AtomicUsize::new(0));
        let compiler = CountingCompiler {
            calls: Arc::clone(&calls),
        };
        let ctx = GraphicsContext::with_compiler(Box::new(backend), config, Box::new(compiler)).expect("context");
        Self { dir, ctx, probe, calls }
    }

    /// Write `contents` and pin the modification time to `secs`
    fn write(&self, name: &str, contents: &str, secs: u64) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write shader");
        set_mtime(&path, secs);
        path
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn set_mtime(path: &Path, secs: u64) {
    let file = File::options().write(true).open(path).expect("open");
    file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .expect("set mtime");
}

fn compute_pipeline(fx: &mut Fixture, path: &Path) -> HotPipeline {
    let mut pipeline = HotPipeline::new(
        "particles",
        SignatureDesc::new(vec![SignatureEntry::Uav], 0),
        PipelineDesc::default(),
    );
    pipeline
        .add_shader(&mut fx.ctx, path, ShaderStage::Compute)
        .expect("add shader");
    pipeline.build(&mut fx.ctx).expect("build");
    pipeline
}

#[test]
fn unchanged_source_is_served_from_the_cache() {
    let mut fx = Fixture::new();
    let path = fx.write("blur.wgsl", "blur v1", 1000);

    let first = fx.ctx.compile_shader(&path, ShaderStage::Compute).expect("compile");
    let second = fx.ctx.compile_shader(&path, ShaderStage::Compute).expect("compile");
    assert_eq!(first, second);
    assert_eq!(first.bytecode, b"blur v1");
    assert_eq!(fx.calls(), 1);
    assert_eq!(fx.ctx.shader_cache().hits(), 1);
    assert_eq!(fx.ctx.shader_cache().misses(), 1);

    let cache_file = fx.ctx.shader_cache().cache_path(&path);
    let bytes = fs::read(&cache_file).expect("cache file");
    let header = ShaderCacheHeader::from_bytes(&bytes).expect("header");
    assert_eq!(header.stage, ShaderStage::Compute as u32);
    assert_eq!(header.size as usize, b"blur v1".len());
    assert_eq!(bytes.len(), SHADER_CACHE_HEADER_SIZE + 7);
    assert_eq!(header.time().ticks(), 1000 * 10_000_000, "mtime is stored as 100ns ticks");
}

#[test]
fn new_mtime_or_other_stage_recompiles() {
    let mut fx = Fixture::new();
    let path = fx.write("blur.wgsl", "blur v1", 1000);
    fx.ctx.compile_shader(&path, ShaderStage::Compute).expect("compile");

    fx.write("blur.wgsl", "blur v2", 2000);
    let shader = fx.ctx.compile_shader(&path, ShaderStage::Compute).expect("recompile");
    assert_eq!(shader.bytecode, b"blur v2");
    assert_eq!(fx.calls(), 2);

    fx.ctx.compile_shader(&path, ShaderStage::Pixel).expect("other stage");
    assert_eq!(fx.calls(), 3);
}

#[test]
fn failed_compiles_are_never_cached() {
    let mut fx = Fixture::new();
    let path = fx.write("broken.wgsl", "syntax error here", 1000);

    let err = fx.ctx.compile_shader(&path, ShaderStage::Pixel).unwrap_err();
    assert!(matches!(err, GraphicsError::ShaderCompile { .. }));
    assert!(!fx.ctx.shader_cache().cache_path(&path).exists());

    // The same broken file is compiled again rather than served from disk
    assert!(fx.ctx.compile_shader(&path, ShaderStage::Pixel).is_err());
    assert_eq!(fx.calls(), 2);
}

#[test]
fn corrupted_cache_entry_is_recompiled() {
    let mut fx = Fixture::new();
    let path = fx.write("sky.wgsl", "sky", 1000);
    fx.ctx.compile_shader(&path, ShaderStage::Vertex).expect("compile");

    let cache_file = fx.ctx.shader_cache().cache_path(&path);
    fs::write(&cache_file, [1u8, 2, 3]).expect("truncate cache");
    assert!(matches!(
        fx.ctx.shader_cache().read_entry(&path),
        Err(GraphicsError::CacheCorrupted { .. })
    ));

    let shader = fx.ctx.compile_shader(&path, ShaderStage::Vertex).expect("recompile");
    assert_eq!(shader.bytecode, b"sky");
    assert_eq!(fx.calls(), 2);
    assert!(fx.ctx.shader_cache().read_entry(&path).expect("rewritten").is_some());
}

#[test]
fn changed_shader_swaps_the_pipeline() {
    let mut fx = Fixture::new();
    let path = fx.write("particles.wgsl", "particles v1", 1000);
    let mut pipeline = compute_pipeline(&mut fx, &path);
    let old = pipeline.pipeline().map(|p| p.handle()).expect("pipeline");
    assert!(pipeline.is_compute());
    assert_eq!(pipeline.generation(), 1);

    assert!(!pipeline.rebuild(&mut fx.ctx).expect("rebuild"));

    fx.write("particles.wgsl", "particles v2", 2000);
    assert!(pipeline.rebuild(&mut fx.ctx).expect("rebuild"));
    let new = pipeline.pipeline().map(|p| p.handle()).expect("pipeline");
    assert_ne!(new, old);
    assert!(!fx.probe.pipeline_exists(old));
    assert_eq!(fx.probe.pipeline_bytecode(new), Some(vec![b"particles v2".to_vec()]));
    assert_eq!(pipeline.generation(), 2);

    // The signature is built once and reused
    assert_eq!(fx.probe.pipeline_signature(new), pipeline.signature().map(|s| s.handle()));
    assert_eq!(fx.probe.signature_count(), 1);

    pipeline.free(&mut fx.ctx);
    assert_eq!(fx.probe.pipeline_count(), 0);
    assert_eq!(fx.probe.signature_count(), 0);
}

#[test]
fn replaced_pipeline_outlives_in_flight_work() {
    let mut fx = Fixture::new();
    let path = fx.write("particles.wgsl", "particles v1", 1000);
    let mut pipeline = compute_pipeline(&mut fx, &path);
    let old = pipeline.pipeline().map(|p| p.handle()).expect("pipeline");

    // A frame using the old pipeline is still on the GPU
    let in_flight = fx.ctx.signal().expect("signal");
    assert_eq!(fx.probe.pending_signals(), 1);

    fx.write("particles.wgsl", "particles v2", 2000);
    assert!(pipeline.rebuild(&mut fx.ctx).expect("rebuild"));
    assert!(fx.probe.pipeline_exists(old));
    assert_eq!(pipeline.retired_count(), 1);

    // Nothing changed, but the next poll frees what the GPU finished
    assert!(!pipeline.rebuild(&mut fx.ctx).expect("rebuild"));
    assert!(fx.probe.pipeline_exists(old));

    fx.ctx.wait(in_flight).expect("wait");
    assert!(!pipeline.rebuild(&mut fx.ctx).expect("rebuild"));
    assert!(!fx.probe.pipeline_exists(old));
    assert_eq!(pipeline.retired_count(), 0);

    pipeline.free(&mut fx.ctx);
    assert_eq!(fx.probe.pipeline_count(), 0);
}

#[test]
fn freeing_a_hot_pipeline_frees_retired_ones() {
    let mut fx = Fixture::new();
    let path = fx.write("particles.wgsl", "particles v1", 1000);
    let mut pipeline = compute_pipeline(&mut fx, &path);

    fx.ctx.signal().expect("signal");
    fx.write("particles.wgsl", "particles v2", 2000);
    assert!(pipeline.rebuild(&mut fx.ctx).expect("rebuild"));
    assert_eq!(fx.probe.pipeline_count(), 2);

    fx.ctx.flush().expect("flush");
    pipeline.free(&mut fx.ctx);
    assert_eq!(fx.probe.pipeline_count(), 0);
}

#[test]
fn failed_compile_keeps_the_working_pipeline() {
    let mut fx = Fixture::new();
    let path = fx.write("particles.wgsl", "particles v1", 1000);
    let mut pipeline = compute_pipeline(&mut fx, &path);
    let old = pipeline.pipeline().map(|p| p.handle()).expect("pipeline");

    fx.write("particles.wgsl", "particles error", 2000);
    assert!(!pipeline.rebuild(&mut fx.ctx).expect("rebuild"));
    assert_eq!(pipeline.pipeline().map(|p| p.handle()), Some(old));
    assert!(fx.probe.pipeline_exists(old));
    assert_eq!(
        pipeline.shader(ShaderStage::Compute).map(|s| s.bytecode.clone()),
        Some(b"particles v1".to_vec())
    );

    // Fixing the file picks up again
    fx.write("particles.wgsl", "particles v3", 3000);
    assert!(pipeline.rebuild(&mut fx.ctx).expect("rebuild"));
    pipeline.free(&mut fx.ctx);
}

#[test]
fn failed_pipeline_creation_restores_the_shaders() {
    let mut fx = Fixture::new();
    let vs = fx.write("mesh_vs.wgsl", "vs v1", 1000);
    let ps = fx.write("mesh_ps.wgsl", "ps v1", 1000);
    let mut pipeline = HotPipeline::new("mesh", SignatureDesc::new(Vec::new(), 64), PipelineDesc::default());
    pipeline.add_shader(&mut fx.ctx, &vs, ShaderStage::Vertex).expect("vs");
    pipeline.add_shader(&mut fx.ctx, &ps, ShaderStage::Pixel).expect("ps");
    pipeline.build(&mut fx.ctx).expect("build");
    let old = pipeline.pipeline().map(|p| p.handle()).expect("pipeline");
    assert!(!pipeline.is_compute());

    fx.write("mesh_ps.wgsl", "ps v2", 2000);
    fx.probe.set_fail_pipelines(true);
    assert!(!pipeline.rebuild(&mut fx.ctx).expect("rebuild"));
    assert_eq!(pipeline.pipeline().map(|p| p.handle()), Some(old));
    assert_eq!(
        pipeline.shader(ShaderStage::Pixel).map(|s| s.bytecode.clone()),
        Some(b"ps v1".to_vec())
    );
    assert_eq!(pipeline.generation(), 1);

    fx.probe.set_fail_pipelines(false);
    fx.write("mesh_ps.wgsl", "ps v3", 3000);
    assert!(pipeline.rebuild(&mut fx.ctx).expect("rebuild"));
    let new = pipeline.pipeline().map(|p| p.handle()).expect("pipeline");
    assert_eq!(
        fx.probe.pipeline_bytecode(new),
        Some(vec![b"vs v1".to_vec(), b"ps v3".to_vec()])
    );
    pipeline.free(&mut fx.ctx);
}

#[test]
fn build_needs_a_complete_stage_set() {
    let mut fx = Fixture::new();
    let vs = fx.write("only_vs.wgsl", "vs", 1000);
    let mut pipeline = HotPipeline::new("half", SignatureDesc::default(), PipelineDesc::default());
    pipeline.add_shader(&mut fx.ctx, &vs, ShaderStage::Vertex).expect("vs");

    let err = pipeline.build(&mut fx.ctx).unwrap_err();
    assert!(matches!(err, GraphicsError::InvalidState { .. }));
    assert!(pipeline.pipeline().is_none());
    // Nothing to rebuild before a successful build
    assert!(!pipeline.rebuild(&mut fx.ctx).expect("rebuild"));
    pipeline.free(&mut fx.ctx);
}

#[test]
fn missing_shader_file_is_an_io_error() {
    let mut fx = Fixture::new();
    let mut pipeline = HotPipeline::new("ghost", SignatureDesc::default(), PipelineDesc::default());
    let missing = fx.dir.path().join("missing.wgsl");
    let err = pipeline
        .add_shader(&mut fx.ctx, &missing, ShaderStage::Compute)
        .unwrap_err();
    assert!(matches!(err, GraphicsError::IoError { .. }));
}

const COMPUTE_WGSL: &str = r#"
#include "common.wgsl"

@group(0) @binding(0) var<storage, read_write> values: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    values[id.x] = scale(values[id.x]);
}
"#;

const COMMON_WGSL: &str = r#"
fn scale(x: f32) -> f32 {
    return x * 2.0;
}
"#;

#[test]
fn naga_compiler_expands_includes_and_validates() {
    let dir = TempDir::new().expect("tempdir");
    let include_dir = dir.path().join("include");
    fs::create_dir_all(&include_dir).expect("include dir");
    fs::write(include_dir.join("common.wgsl"), COMMON_WGSL).expect("write include");
    let path = dir.path().join("double.wgsl");
    fs::write(&path, COMPUTE_WGSL).expect("write shader");

    let mut compiler = NagaCompiler::new(vec![include_dir]);
    let bytecode = compiler.compile(&path, ShaderStage::Compute).expect("compile");
    let shader = CompiledShader::new(ShaderStage::Compute, bytecode);
    let source = shader.source().expect("utf8");
    assert!(source.contains("fn scale"));
    assert!(!source.contains("#include"));
    assert_eq!(shader.entry_point, "main");

    // Right file, wrong stage: there is no fragment entry point
    let err = compiler.compile(&path, ShaderStage::Pixel).unwrap_err();
    assert!(matches!(err, GraphicsError::ShaderCompile { .. }));
}

#[test]
fn naga_compiler_reports_errors_with_the_path() {
    let dir = TempDir::new().expect("tempdir");
    let mut compiler = NagaCompiler::new(Vec::new());

    let broken = dir.path().join("broken.wgsl");
    fs::write(&broken, "@compute @workgroup_size(1) fn main() { let x: f32 = ; }").expect("write");
    match compiler.compile(&broken, ShaderStage::Compute) {
        Err(GraphicsError::ShaderCompile { path, .. }) => assert!(path.ends_with("broken.wgsl")),
        other => panic!("expected a compile error, got {:?}", other),
    }

    let orphan = dir.path().join("orphan.wgsl");
    fs::write(&orphan, "#include \"nowhere.wgsl\"\n").expect("write");
    let err = compiler.compile(&orphan, ShaderStage::Compute).unwrap_err();
    assert!(err.to_string().contains("nowhere.wgsl"));
}
