//! What a compiled stage exposes to the host, read back from the naga module.
//!
//! Reflection replaces the GL driver's active-uniform query: a uniform exists
//! for the host exactly when the stage declares it.

use wgpu::naga;
use wgpu::naga::{AddressSpace, Binding, ScalarKind, TypeInner, VectorSize};

use crate::compile::{TEXTURE_GROUP, UNIFORM_GROUP};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UniformKind {
    Float,
    Vec2,
    /// Declared but not fed by the host (ints, matrices, wider vectors).
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UniformSlot {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub kind: UniformKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SamplerSlot {
    pub name: String,
    /// Binding of the texture; the sampler sits at `texture_binding + 1`.
    pub texture_binding: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StageReflection {
    /// Size in bytes of the uniform block, zero when the stage declares none.
    pub block_span: u32,
    pub uniforms: Vec<UniformSlot>,
    pub samplers: Vec<SamplerSlot>,
    /// `(location, name)` of each vertex entry-point input.
    pub inputs: Vec<(u32, Option<String>)>,
}

impl StageReflection {
    pub(crate) fn from_module(module: &naga::Module) -> Self {
        let mut reflection = StageReflection::default();

        for (_, global) in module.global_variables.iter() {
            let Some(binding) = &global.binding else {
                continue;
            };
            match global.space {
                AddressSpace::Uniform if binding.group == UNIFORM_GROUP && binding.binding == 0 => {
                    if let TypeInner::Struct { members, span } = &module.types[global.ty].inner {
                        reflection.block_span = *span;
                        reflection.uniforms = members
                            .iter()
                            .filter_map(|member| {
                                let name = member.name.clone()?;
                                let inner = &module.types[member.ty].inner;
                                Some(UniformSlot {
                                    name,
                                    offset: member.offset,
                                    size: inner.size(module.to_ctx()),
                                    kind: classify(inner),
                                })
                            })
                            .collect();
                    }
                }
                AddressSpace::Handle if binding.group == TEXTURE_GROUP => {
                    let is_image = matches!(module.types[global.ty].inner, TypeInner::Image { .. });
                    let name = global
                        .name
                        .as_deref()
                        .and_then(|name| name.strip_suffix("_texture"));
                    if let (true, Some(name)) = (is_image, name) {
                        reflection.samplers.push(SamplerSlot {
                            name: name.to_owned(),
                            texture_binding: binding.binding,
                        });
                    }
                }
                _ => {}
            }
        }
        reflection
            .samplers
            .sort_by_key(|sampler| sampler.texture_binding);

        for entry in module
            .entry_points
            .iter()
            .filter(|entry| entry.stage == naga::ShaderStage::Vertex)
        {
            for argument in &entry.function.arguments {
                if let Some(Binding::Location { location, .. }) = argument.binding {
                    reflection.inputs.push((location, argument.name.clone()));
                }
            }
        }

        reflection
    }

    pub(crate) fn uniform(&self, name: &str) -> Option<usize> {
        self.uniforms.iter().position(|slot| slot.name == name)
    }

    pub(crate) fn sampler(&self, name: &str) -> Option<usize> {
        self.samplers.iter().position(|slot| slot.name == name)
    }
}

fn classify(inner: &TypeInner) -> UniformKind {
    match inner {
        TypeInner::Scalar(scalar) if scalar.kind == ScalarKind::Float && scalar.width == 4 => {
            UniformKind::Float
        }
        TypeInner::Vector {
            size: VectorSize::Bi,
            scalar,
        } if scalar.kind == ScalarKind::Float && scalar.width == 4 => UniformKind::Vec2,
        _ => UniformKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use hotreload::StageKind;

    use super::*;
    use crate::compile::{normalize, parse_stage, VERTEX_SHADER_GLSL};

    fn reflect(kind: StageKind, source: &str) -> StageReflection {
        let normalized = normalize(kind, source);
        let module = parse_stage(kind, &normalized).expect("stage parses");
        StageReflection::from_module(&module)
    }

    #[test]
    fn block_members_follow_std140() {
        let reflection = reflect(
            StageKind::Fragment,
            "uniform float time;\nuniform vec2 resolution;\nuniform float phase;\n\
             out vec4 color;\nvoid main() { color = vec4(time, resolution, phase); }\n",
        );
        let names: Vec<&str> = reflection.uniforms.iter().map(|slot| slot.name.as_str()).collect();
        assert_eq!(names, ["time", "resolution", "phase"]);
        // vec2 aligns to 8 bytes, so it skips the padding after `time`.
        assert_eq!(reflection.uniforms[0].offset, 0);
        assert_eq!(reflection.uniforms[1].offset, 8);
        assert_eq!(reflection.uniforms[2].offset, 16);
        assert_eq!(reflection.uniforms[1].kind, UniformKind::Vec2);
        assert_eq!(reflection.uniforms[1].size, 8);
        assert!(reflection.block_span >= 20);
    }

    #[test]
    fn undeclared_uniforms_are_absent() {
        let reflection = reflect(
            StageKind::Fragment,
            "out vec4 color;\nvoid main() { color = vec4(1.0); }\n",
        );
        assert_eq!(reflection.block_span, 0);
        assert!(reflection.uniform("time").is_none());
        assert!(reflection.samplers.is_empty());
    }

    #[test]
    fn samplers_keep_declaration_slots() {
        let reflection = reflect(
            StageKind::Fragment,
            "uniform sampler2D tex1;\nuniform sampler2D tex0;\nin vec2 vUv;\nout vec4 color;\n\
             void main() { color = texture(tex0, vUv) + texture(tex1, vUv); }\n",
        );
        assert_eq!(reflection.sampler("tex1"), Some(0));
        assert_eq!(reflection.sampler("tex0"), Some(1));
        assert_eq!(reflection.samplers[1].texture_binding, 2);
    }

    #[test]
    fn non_float_uniforms_are_other() {
        let reflection = reflect(
            StageKind::Fragment,
            "uniform int frame;\nout vec4 color;\nvoid main() { color = vec4(float(frame)); }\n",
        );
        assert_eq!(reflection.uniforms[0].kind, UniformKind::Other);
    }

    #[test]
    fn vertex_inputs_include_position() {
        let reflection = reflect(StageKind::Vertex, VERTEX_SHADER_GLSL);
        assert!(reflection
            .inputs
            .iter()
            .any(|(location, _)| *location == 0));
    }
}
