//! The offset kernel definition: constants, source in each shading-language
//! binding convention, and translation to SPIR-V.
//!
//! The WGSL and GLSL forms are one logical kernel. The GLSL form is emitted
//! from a shared body plus a pluggable binding-declaration surface
//! ([`BindingDialect`]), rather than keeping near-duplicate shader files that
//! differ only in their `layout(...)` lines.

use thiserror::Error;

/// The constant added to every input element.
pub const OFFSET: f32 = 0.5;

/// Invocations per workgroup along X. The dispatch grid is one-dimensional.
pub const WORKGROUP_SIZE: u32 = 32;

/// Binding slot of the read-only input buffer, descriptor set 0.
pub const INPUT_BINDING: u32 = 0;

/// Binding slot of the output buffer, descriptor set 0.
pub const OUTPUT_BINDING: u32 = 1;

pub const WGSL_ENTRY_POINT: &str = "main_cs";
pub const GLSL_ENTRY_POINT: &str = "main";

/// The kernel in WGSL.
pub const WGSL_SOURCE: &str = include_str!("shaders/offset.wgsl");

/// How buffer bindings are declared in the GLSL form of the kernel.
///
/// Both dialects bind to the same slots of descriptor set 0 and are
/// behaviorally identical; they exist because Vulkan-style GLSL accepts the
/// set either implicitly or spelled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingDialect {
    /// `layout(std430, binding = N)`, descriptor set 0 implied.
    ImplicitSet,
    /// `layout(std430, set = 0, binding = N)`.
    ExplicitSet,
}

impl BindingDialect {
    fn buffer_declaration(self, binding: u32, qualifier: &str, block: &str, name: &str) -> String {
        let set = match self {
            Self::ImplicitSet => String::new(),
            Self::ExplicitSet => "set = 0, ".to_string(),
        };
        format!("layout(std430, {set}binding = {binding}) {qualifier}buffer {block} {{ float data[]; }} {name};")
    }
}

/// Emits the GLSL form of the kernel for the given binding dialect.
pub fn glsl_source(dialect: BindingDialect) -> String {
    let input = dialect.buffer_declaration(INPUT_BINDING, "readonly ", "DataIn", "data_in");
    let output = dialect.buffer_declaration(OUTPUT_BINDING, "", "DataOut", "data_out");
    format!(
        "#version 450\n\
         layout(local_size_x = {WORKGROUP_SIZE}) in;\n\
         {input}\n\
         {output}\n\
         void main() {{\n\
         \x20   uint gid = gl_GlobalInvocationID.x;\n\
         \x20   data_out.data[gid] = data_in.data[gid] + {OFFSET:?};\n\
         }}\n"
    )
}

/// Which source form of the kernel to translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelSource {
    Wgsl,
    Glsl(BindingDialect),
}

/// The kernel lowered to SPIR-V, ready for any backend.
pub struct CompiledKernel {
    pub spirv: Vec<u32>,
    pub entry_point: &'static str,
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("WGSL parse error: {0}")]
    WgslParse(#[from] naga::front::wgsl::ParseError),
    #[error("GLSL parse error: {0}")]
    GlslParse(#[from] naga::front::glsl::ParseErrors),
    #[error("shader validation error: {0}")]
    Validation(#[from] naga::WithSpan<naga::valid::ValidationError>),
    #[error("SPIR-V backend error: {0}")]
    SpvBackend(#[from] naga::back::spv::Error),
}

/// Translates the requested source form to SPIR-V words.
pub fn compile(source: KernelSource) -> Result<CompiledKernel, ShaderError> {
    let (module, entry_point) = match source {
        KernelSource::Wgsl => (naga::front::wgsl::parse_str(WGSL_SOURCE)?, WGSL_ENTRY_POINT),
        KernelSource::Glsl(dialect) => {
            let mut frontend = naga::front::glsl::Frontend::default();
            let options = naga::front::glsl::Options::from(naga::ShaderStage::Compute);
            let module = frontend.parse(&options, &glsl_source(dialect))?;
            (module, GLSL_ENTRY_POINT)
        }
    };
    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)?;
    let spirv = naga::back::spv::write_vec(&module, &info, &naga::back::spv::Options::default(), None)?;
    Ok(CompiledKernel { spirv, entry_point })
}

/// Number of workgroups a 1-D dispatch needs to cover `len` elements.
///
/// The kernel does not bounds-check, so a partial last workgroup still runs
/// all 32 invocations; covering their writes is the dispatching host's
/// problem (see `scaffold::OffsetDispatch`).
pub fn workgroup_count(len: usize) -> u32 {
    len.div_ceil(WORKGROUP_SIZE as usize) as u32
}

/// CPU reference for the kernel, used to check GPU results.
pub fn reference(input: &[f32]) -> Vec<f32> {
    input.iter().map(|x| x + OFFSET).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn workgroup_count_boundaries() {
        assert_eq!(workgroup_count(0), 0);
        assert_eq!(workgroup_count(1), 1);
        assert_eq!(workgroup_count(32), 1);
        assert_eq!(workgroup_count(33), 2);
        assert_eq!(workgroup_count(64), 2);
    }

    #[test]
    fn reference_concrete_example() {
        assert_eq!(reference(&[1.0, 2.0, 3.0]), vec![1.5, 2.5, 3.5]);
        assert!(reference(&[]).is_empty());
    }

    #[test]
    fn glsl_dialects_differ_only_in_set_declaration() {
        let implicit = glsl_source(BindingDialect::ImplicitSet);
        let explicit = glsl_source(BindingDialect::ExplicitSet);
        assert!(!implicit.contains("set = 0"));
        assert!(explicit.contains("set = 0"));
        for source in [&implicit, &explicit] {
            assert!(source.contains("readonly buffer DataIn"));
            assert!(source.contains("binding = 0"));
            assert!(source.contains("binding = 1"));
            assert!(source.contains("local_size_x = 32"));
        }
        assert_eq!(implicit.replace("binding", "set = 0, binding"), explicit);
    }

    #[test]
    fn wgsl_form_compiles_to_spirv() {
        let kernel = compile(KernelSource::Wgsl).unwrap();
        assert_eq!(kernel.entry_point, WGSL_ENTRY_POINT);
        assert_eq!(kernel.spirv[0], SPIRV_MAGIC);
    }

    #[test]
    fn glsl_forms_compile_to_spirv() {
        for dialect in [BindingDialect::ImplicitSet, BindingDialect::ExplicitSet] {
            let kernel = compile(KernelSource::Glsl(dialect)).unwrap();
            assert_eq!(kernel.entry_point, GLSL_ENTRY_POINT);
            assert_eq!(kernel.spirv[0], SPIRV_MAGIC);
        }
    }
}
