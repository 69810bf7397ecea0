//! Scripted in-memory `GraphicsDevice` for unit tests.
//!
//! Compilation fails when the source contains `ERROR`, linking fails when the
//! fragment source contains `LINK_FAIL`. Every `uniform <type> <name>;` line of
//! a linked fragment becomes an active uniform, numbered in declaration order.

use std::collections::BTreeMap;

use crate::device::{
    GraphicsDevice, InfoLog, ProgramId, StageId, StageKind, UniformLocation, UniformValue,
};

#[derive(Debug, thiserror::Error)]
pub(crate) enum FakeError {
    #[error("unknown stage {0:?}")]
    UnknownStage(StageId),
    #[error("no program in use")]
    NoProgram,
}

#[derive(Debug, Default)]
struct FakeStage {
    source: Option<String>,
    compiled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FakeLink {
    pub fragment_source: String,
    pub uniforms: BTreeMap<String, UniformLocation>,
}

#[derive(Debug)]
struct FakeProgram {
    vertex: StageId,
    fragment: StageId,
    attributes: BTreeMap<u32, String>,
    linked: Option<FakeLink>,
}

/// What a draw call rendered with.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DrawRecord {
    pub fragment_source: Option<String>,
    pub uniforms: BTreeMap<UniformLocation, UniformValue>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeDevice {
    stages: Vec<(StageKind, FakeStage)>,
    programs: Vec<FakeProgram>,
    current: Option<ProgramId>,
    values: BTreeMap<UniformLocation, UniformValue>,
    pub compiles: usize,
    pub links: usize,
    pub attribute_binds: usize,
    pub draws: Vec<DrawRecord>,
}

impl FakeDevice {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn linked(&self, program: ProgramId) -> Option<&FakeLink> {
        self.programs
            .get(program.0 as usize)
            .and_then(|program| program.linked.as_ref())
    }

    pub(crate) fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub(crate) fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub(crate) fn value(&self, location: UniformLocation) -> Option<UniformValue> {
        self.values.get(&location).copied()
    }

    pub(crate) fn last_draw(&self) -> Option<&DrawRecord> {
        self.draws.last()
    }
}

fn uniform_names(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| line.trim().strip_prefix("uniform "))
        .filter_map(|rest| {
            rest.trim_end_matches(';')
                .split_whitespace()
                .last()
                .map(str::to_owned)
        })
        .collect()
}

impl GraphicsDevice for FakeDevice {
    type Error = FakeError;

    fn create_stage(&mut self, kind: StageKind) -> Result<StageId, Self::Error> {
        self.stages.push((kind, FakeStage::default()));
        Ok(StageId(self.stages.len() as u32 - 1))
    }

    fn compile_stage(&mut self, stage: StageId, source: &str) -> Result<(), InfoLog> {
        self.compiles += 1;
        let Some((_, slot)) = self.stages.get_mut(stage.0 as usize) else {
            return Err(InfoLog::new(format!("invalid stage {}", stage.0)));
        };
        slot.source = Some(source.to_owned());
        slot.compiled = !source.contains("ERROR");
        if slot.compiled {
            Ok(())
        } else {
            Err(InfoLog::new("0:1(1): error: syntax error, unexpected ERROR"))
        }
    }

    fn create_program(
        &mut self,
        vertex: StageId,
        fragment: StageId,
    ) -> Result<ProgramId, Self::Error> {
        for stage in [vertex, fragment] {
            if self.stages.get(stage.0 as usize).is_none() {
                return Err(FakeError::UnknownStage(stage));
            }
        }
        self.programs.push(FakeProgram {
            vertex,
            fragment,
            attributes: BTreeMap::new(),
            linked: None,
        });
        Ok(ProgramId(self.programs.len() as u32 - 1))
    }

    fn bind_attribute(&mut self, program: ProgramId, index: u32, name: &str) {
        self.attribute_binds += 1;
        if let Some(program) = self.programs.get_mut(program.0 as usize) {
            program.attributes.insert(index, name.to_owned());
        }
    }

    fn link_program(&mut self, program: ProgramId) -> Result<(), InfoLog> {
        self.links += 1;
        let Some(slot) = self.programs.get(program.0 as usize) else {
            return Err(InfoLog::new("invalid program"));
        };
        let stage = |id: StageId| self.stages.get(id.0 as usize).map(|(_, stage)| stage);
        let (Some(vertex), Some(fragment)) = (stage(slot.vertex), stage(slot.fragment)) else {
            return Err(InfoLog::new("missing stage"));
        };
        if !vertex.compiled || !fragment.compiled {
            return Err(InfoLog::new("attached shaders must be compiled before linking"));
        }
        if slot.attributes.get(&0).map(String::as_str) != Some("aPosition") {
            return Err(InfoLog::new("aPosition is not bound to location 0"));
        }
        let source = fragment.source.clone().unwrap_or_default();
        if source.contains("LINK_FAIL") {
            return Err(InfoLog::new("error: fragment input not written by vertex shader"));
        }
        let uniforms = uniform_names(&source)
            .into_iter()
            .enumerate()
            .map(|(index, name)| (name, UniformLocation(index as u32)))
            .collect();
        self.programs[program.0 as usize].linked = Some(FakeLink {
            fragment_source: source,
            uniforms,
        });
        // A successful relink resets the uniform state of the executable.
        if self.current == Some(program) {
            self.values.clear();
        }
        Ok(())
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.linked(program)?.uniforms.get(name).copied()
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current = Some(program);
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        self.values.insert(location, value);
    }

    fn draw(&mut self) -> Result<(), Self::Error> {
        let program = self.current.ok_or(FakeError::NoProgram)?;
        let fragment_source = self
            .linked(program)
            .map(|link| link.fragment_source.clone());
        self.draws.push(DrawRecord {
            fragment_source,
            uniforms: self.values.clone(),
        });
        Ok(())
    }
}
