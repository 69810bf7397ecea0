use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::device::{GraphicsDevice, ProgramId, UniformLocation, UniformValue};

/// Semantic uniform roles the engine knows how to feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UniformRole {
    /// Seconds since start (`time`).
    Time,
    /// Surface size in pixels (`resolution`).
    Resolution,
    /// Oscillator phase in `[0, 1)` (`phase`).
    Phase,
    /// Oscillator frequency in Hz (`frequency`).
    Frequency,
    /// Sampler bound to texture unit N (`texN`).
    Texture(u32),
}

impl UniformRole {
    /// Every role for a configuration with `texture_units` textures.
    pub fn all(texture_units: u32) -> Vec<UniformRole> {
        let mut roles = vec![
            UniformRole::Time,
            UniformRole::Resolution,
            UniformRole::Phase,
            UniformRole::Frequency,
        ];
        roles.extend((0..texture_units).map(UniformRole::Texture));
        roles
    }

    /// Name the shader declares the uniform under.
    pub fn name(&self) -> String {
        match self {
            UniformRole::Time => "time".to_owned(),
            UniformRole::Resolution => "resolution".to_owned(),
            UniformRole::Phase => "phase".to_owned(),
            UniformRole::Frequency => "frequency".to_owned(),
            UniformRole::Texture(unit) => format!("tex{unit}"),
        }
    }
}

impl fmt::Display for UniformRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Host-side values for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameUniforms {
    pub time: f32,
    pub resolution: [f32; 2],
    pub phase: f32,
    pub frequency: f32,
}

impl FrameUniforms {
    fn value_for(&self, role: UniformRole) -> Option<UniformValue> {
        match role {
            UniformRole::Time => Some(UniformValue::Float(self.time)),
            UniformRole::Resolution => Some(UniformValue::Vec2(self.resolution)),
            UniformRole::Phase => Some(UniformValue::Float(self.phase)),
            UniformRole::Frequency => Some(UniformValue::Float(self.frequency)),
            // Samplers are bound once per link, not fed per frame.
            UniformRole::Texture(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UniformEntry {
    role: UniformRole,
    name: String,
    location: Option<UniformLocation>,
}

/// Uniform locations of the current link, one entry per role.
///
/// Locations are only valid for the link that produced them, so
/// [`UniformRegistry::rebuild`] discards every cached entry and re-queries.
/// A missing uniform (never declared, or optimised out) is recorded as absent
/// and silently skipped when feeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformRegistry {
    entries: Vec<UniformEntry>,
}

impl UniformRegistry {
    /// Creates a registry with every role absent.
    pub fn new(roles: impl IntoIterator<Item = UniformRole>) -> Self {
        let entries = roles
            .into_iter()
            .map(|role| UniformEntry {
                role,
                name: role.name(),
                location: None,
            })
            .collect();
        Self { entries }
    }

    /// Re-resolves every role against the program's latest link.
    ///
    /// Call only after a confirmed successful link.
    pub fn rebuild<D: GraphicsDevice>(
        &mut self,
        device: &D,
        program: ProgramId,
    ) -> BTreeMap<String, Option<UniformLocation>> {
        for entry in &mut self.entries {
            entry.location = device.uniform_location(program, &entry.name);
        }
        debug!(
            present = self.present_count(),
            total = self.entries.len(),
            "rebuilt uniform registry"
        );
        self.mapping()
    }

    /// Binds each present `texN` sampler to texture unit N.
    pub fn bind_textures<D: GraphicsDevice>(&self, device: &mut D) {
        for entry in &self.entries {
            if let (UniformRole::Texture(unit), Some(location)) = (entry.role, entry.location) {
                device.set_uniform(location, UniformValue::Sampler(unit));
            }
        }
    }

    /// Writes the frame's values into every present location.
    pub fn feed<D: GraphicsDevice>(&self, device: &mut D, values: &FrameUniforms) {
        for entry in &self.entries {
            let Some(location) = entry.location else {
                continue;
            };
            if let Some(value) = values.value_for(entry.role) {
                device.set_uniform(location, value);
            }
        }
    }

    pub fn location(&self, role: UniformRole) -> Option<UniformLocation> {
        self.entries
            .iter()
            .find(|entry| entry.role == role)
            .and_then(|entry| entry.location)
    }

    pub fn present_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.location.is_some())
            .count()
    }

    /// Name → location table; `None` marks an absent uniform.
    pub fn mapping(&self) -> BTreeMap<String, Option<UniformLocation>> {
        self.entries
            .iter()
            .map(|entry| (entry.name.clone(), entry.location))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeDevice;
    use crate::program::ShaderProgram;
    use crate::reload::recompile;
    use crate::source::ShaderSource;

    fn linked(fragment: &str) -> (FakeDevice, ShaderProgram) {
        let mut device = FakeDevice::new();
        let mut program = ShaderProgram::create(&mut device, "vertex").unwrap();
        let outcome = recompile(
            &mut device,
            &mut program,
            ShaderSource::from_text("test.frag", fragment),
        );
        assert!(outcome.is_success());
        device.use_program(program.id());
        (device, program)
    }

    #[test]
    fn role_names_match_shader_declarations() {
        let names: Vec<String> = UniformRole::all(2).iter().map(UniformRole::name).collect();
        assert_eq!(
            names,
            ["time", "resolution", "phase", "frequency", "tex0", "tex1"]
        );
    }

    #[test]
    fn rebuild_records_present_and_absent_roles() {
        let (device, program) = linked("uniform vec2 resolution;\nuniform float time;\n");
        let mut registry = UniformRegistry::new(UniformRole::all(1));
        let mapping = registry.rebuild(&device, program.id());

        assert_eq!(mapping["resolution"], Some(UniformLocation(0)));
        assert_eq!(mapping["time"], Some(UniformLocation(1)));
        assert_eq!(mapping["phase"], None);
        assert_eq!(mapping["tex0"], None);
        assert_eq!(registry.present_count(), 2);
    }

    #[test]
    fn feed_skips_absent_roles() {
        let (mut device, program) = linked("uniform float phase;\n");
        let mut registry = UniformRegistry::new(UniformRole::all(0));
        registry.rebuild(&device, program.id());

        let values = FrameUniforms {
            time: 3.0,
            resolution: [640.0, 480.0],
            phase: 0.25,
            frequency: 2.0,
        };
        registry.feed(&mut device, &values);

        assert_eq!(
            device.value(UniformLocation(0)),
            Some(UniformValue::Float(0.25))
        );
        device.draw().unwrap();
        assert_eq!(device.last_draw().unwrap().uniforms.len(), 1);
    }

    #[test]
    fn samplers_are_bound_to_their_unit() {
        let (mut device, program) = linked("uniform sampler2D tex1;\nuniform sampler2D tex0;\n");
        let mut registry = UniformRegistry::new(UniformRole::all(2));
        registry.rebuild(&device, program.id());
        registry.bind_textures(&mut device);

        assert_eq!(
            device.value(UniformLocation(0)),
            Some(UniformValue::Sampler(1))
        );
        assert_eq!(
            device.value(UniformLocation(1)),
            Some(UniformValue::Sampler(0))
        );
    }

    #[test]
    fn rebuild_never_keeps_stale_locations() {
        let (mut device, mut program) = linked("uniform float time;\n");
        let mut registry = UniformRegistry::new(UniformRole::all(0));
        registry.rebuild(&device, program.id());
        assert_eq!(registry.location(UniformRole::Time), Some(UniformLocation(0)));

        let outcome = recompile(
            &mut device,
            &mut program,
            ShaderSource::from_text("test.frag", "uniform float phase;\nuniform float time;\n"),
        );
        assert!(outcome.is_success());
        registry.rebuild(&device, program.id());
        assert_eq!(registry.location(UniformRole::Time), Some(UniformLocation(1)));
        assert_eq!(registry.location(UniformRole::Phase), Some(UniformLocation(0)));
    }
}
