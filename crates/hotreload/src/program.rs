use crate::device::{GraphicsDevice, InfoLog, ProgramId, StageId, StageKind};

/// Vertex attribute index reserved for the quad position.
pub const POSITION_ATTRIBUTE_INDEX: u32 = 0;
/// Attribute name bound to [`POSITION_ATTRIBUTE_INDEX`] before every link.
pub const POSITION_ATTRIBUTE_NAME: &str = "aPosition";

/// Whether the program holds a linked executable.
///
/// Failed relinks never change this: the device keeps the previous executable
/// and so does the bookkeeping here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Unlinked,
    Linked,
}

/// The live program object and the stage identities attached to it.
///
/// Both identities and the program id are fixed at creation. Reloads replace
/// the fragment stage's source only, so attachments and attribute bindings
/// survive a failed attempt.
#[derive(Debug)]
pub struct ShaderProgram {
    id: ProgramId,
    vertex: StageId,
    fragment: StageId,
    link_status: LinkStatus,
    links: u64,
}

/// Why a program could not be created at startup.
#[derive(Debug)]
pub enum CreateError<E> {
    Device(E),
    VertexCompile(InfoLog),
}

impl ShaderProgram {
    /// Creates both stages, compiles the vertex stage and attaches them.
    ///
    /// The fragment stage is left uncompiled; the first reload fills it.
    pub fn create<D: GraphicsDevice>(
        device: &mut D,
        vertex_source: &str,
    ) -> Result<Self, CreateError<D::Error>> {
        let vertex = device
            .create_stage(StageKind::Vertex)
            .map_err(CreateError::Device)?;
        device
            .compile_stage(vertex, vertex_source)
            .map_err(CreateError::VertexCompile)?;
        let fragment = device
            .create_stage(StageKind::Fragment)
            .map_err(CreateError::Device)?;
        let id = device
            .create_program(vertex, fragment)
            .map_err(CreateError::Device)?;
        device.bind_attribute(id, POSITION_ATTRIBUTE_INDEX, POSITION_ATTRIBUTE_NAME);

        Ok(Self {
            id,
            vertex,
            fragment,
            link_status: LinkStatus::Unlinked,
            links: 0,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn vertex_stage(&self) -> StageId {
        self.vertex
    }

    pub fn fragment_stage(&self) -> StageId {
        self.fragment
    }

    pub fn link_status(&self) -> LinkStatus {
        self.link_status
    }

    /// Last-known-good flag: true once any link has succeeded.
    pub fn has_executable(&self) -> bool {
        self.link_status == LinkStatus::Linked
    }

    /// Number of successful links so far.
    pub fn successful_links(&self) -> u64 {
        self.links
    }

    pub(crate) fn record_link(&mut self) {
        self.link_status = LinkStatus::Linked;
        self.links += 1;
    }
}
