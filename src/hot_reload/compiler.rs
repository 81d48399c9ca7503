use std::path::{Path, PathBuf};

use crate::error::{GraphicsError, GraphicsResult};
use crate::hot_reload::error::{shader_compile_error, HotReloadErrorContext};

/// Shader stage. The discriminant is the stage id stored in cache headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ShaderStage {
    Vertex = 0,
    Pixel = 1,
    Compute = 2,
}

impl ShaderStage {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ShaderStage::Vertex),
            1 => Some(ShaderStage::Pixel),
            2 => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    /// Every stage file exposes its entry point under this name
    pub fn entry_point(self) -> &'static str {
        "main"
    }

    pub fn naga_stage(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Pixel => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        }
    }
}

/// Bytecode for one stage, as consumed by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub bytecode: Vec<u8>,
}

impl CompiledShader {
    pub fn new(stage: ShaderStage, bytecode: Vec<u8>) -> Self {
        Self {
            stage,
            entry_point: stage.entry_point().to_string(),
            bytecode,
        }
    }

    /// Bytecode interpreted as shader source text
    pub fn source(&self) -> GraphicsResult<&str> {
        std::str::from_utf8(&self.bytecode)
            .map_err(|e| shader_compile_error("<bytecode>", format!("not valid UTF-8: {}", e)))
    }
}

/// Turns a shader file into backend bytecode
pub trait ShaderCompiler {
    fn compile(&mut self, path: &Path, stage: ShaderStage) -> GraphicsResult<Vec<u8>>;
}

/// WGSL compiler built on naga.
///
/// Resolves `#include "file"` lines, parses and validates the module and
/// checks the stage's entry point exists. The bytecode is the validated,
/// include-expanded WGSL text, which is what wgpu consumes.
pub struct NagaCompiler {
    include_paths: Vec<PathBuf>,
}

impl NagaCompiler {
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self { include_paths }
    }

    pub fn add_include_path(&mut self, path: impl AsRef<Path>) {
        self.include_paths.push(path.as_ref().to_path_buf());
    }

    /// Validate WGSL source for `stage`
    pub fn validate(source: &str, stage: ShaderStage, path: &str) -> GraphicsResult<()> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| shader_compile_error(path, e.emit_to_string(source)))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| shader_compile_error(path, format!("{:?}", e)))?;

        let has_entry = module
            .entry_points
            .iter()
            .any(|ep| ep.stage == stage.naga_stage() && ep.name == stage.entry_point());
        if !has_entry {
            return Err(shader_compile_error(
                path,
                format!("no {:?} entry point named '{}'", stage, stage.entry_point()),
            ));
        }
        Ok(())
    }

    fn process_includes(&self, source: &str, base_path: &Path, depth: u32) -> GraphicsResult<String> {
        if depth > 16 {
            return Err(shader_compile_error(
                &base_path.display().to_string(),
                "include nesting deeper than 16 levels",
            ));
        }

        let mut processed = String::with_capacity(source.len());
        let base_dir = base_path.parent().unwrap_or(Path::new("."));

        for line in source.lines() {
            let Some(include) = line.trim().strip_prefix("#include") else {
                processed.push_str(line);
                processed.push('\n');
                continue;
            };
            let include = include.trim().trim_matches('"');

            let candidate = std::iter::once(base_dir.join(include))
                .chain(self.include_paths.iter().map(|dir| dir.join(include)))
                .find(|p| p.exists());
            let Some(include_path) = candidate else {
                return Err(shader_compile_error(
                    &base_path.display().to_string(),
                    format!("include not found: {}", include),
                ));
            };

            let include_source = std::fs::read_to_string(&include_path).io_context(&include_path)?;
            processed.push_str(&self.process_includes(&include_source, &include_path, depth + 1)?);
        }
        Ok(processed)
    }
}

impl Default for NagaCompiler {
    fn default() -> Self {
        Self::new(vec![PathBuf::from("shaders")])
    }
}

impl ShaderCompiler for NagaCompiler {
    fn compile(&mut self, path: &Path, stage: ShaderStage) -> GraphicsResult<Vec<u8>> {
        let source = std::fs::read_to_string(path).io_context(path)?;
        let processed = self.process_includes(&source, path, 0)?;
        let display = path.display().to_string();

        if let Err(e) = Self::validate(&processed, stage, &display) {
            if let GraphicsError::ShaderCompile { message, .. } = &e {
                log::error!("Shader compilation failed: {}\n{}", display, message);
            }
            return Err(e);
        }

        log::debug!("[NagaCompiler::compile] Compiled {} ({:?})", display, stage);
        Ok(processed.into_bytes())
    }
}
