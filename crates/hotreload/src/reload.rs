//! Recompile/relink of the live program plus gated diagnostics.
//!
//! Every step is a hard gate; the first failure returns without touching the
//! program's previous link:
//!
//! ```text
//!   load source ──▶ compile fragment ──▶ bind aPosition ──▶ link ──▶ Success
//!        │                 │                                  │
//!        ▼                 ▼                                  ▼
//!   ReadFailure     CompileFailure                       LinkFailure
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::device::{GraphicsDevice, InfoLog};
use crate::program::{ShaderProgram, POSITION_ATTRIBUTE_INDEX, POSITION_ATTRIBUTE_NAME};
use crate::source::ShaderSource;

/// Result of one reload attempt.
#[derive(Debug)]
pub enum ReloadOutcome {
    Success,
    CompileFailure(InfoLog),
    LinkFailure(InfoLog),
    ReadFailure(io::Error),
}

impl ReloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReloadOutcome::Success)
    }
}

/// Loads `path` and recompiles/relinks `program` in place.
pub fn attempt_reload<D: GraphicsDevice>(
    device: &mut D,
    program: &mut ShaderProgram,
    path: &Path,
) -> ReloadOutcome {
    match ShaderSource::load(path) {
        Ok(source) => recompile(device, program, source),
        Err(err) => ReloadOutcome::ReadFailure(err),
    }
}

/// Recompiles the program's existing fragment stage from `source` and relinks.
///
/// `source` is consumed; it is dropped on every return path.
pub fn recompile<D: GraphicsDevice>(
    device: &mut D,
    program: &mut ShaderProgram,
    source: ShaderSource,
) -> ReloadOutcome {
    debug!(path = %source.path().display(), bytes = source.len(), "compiling fragment stage");
    if let Err(log) = device.compile_stage(program.fragment_stage(), source.text()) {
        return ReloadOutcome::CompileFailure(log);
    }
    drop(source);

    // Linking finalises attribute locations, so the binding is re-asserted first.
    device.bind_attribute(program.id(), POSITION_ATTRIBUTE_INDEX, POSITION_ATTRIBUTE_NAME);
    if let Err(log) = device.link_program(program.id()) {
        return ReloadOutcome::LinkFailure(log);
    }

    program.record_link();
    ReloadOutcome::Success
}

/// Latch that lets one diagnostic through per failure streak.
///
/// Starts open, closes after an emission, reopens on the next success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpGate {
    open: bool,
}

impl Default for DumpGate {
    fn default() -> Self {
        Self { open: true }
    }
}

impl DumpGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Returns whether a failure may emit, closing the gate if it may.
    pub fn admit(&mut self) -> bool {
        std::mem::replace(&mut self.open, false)
    }

    pub fn reopen(&mut self) {
        self.open = true;
    }
}

/// Kind of failure a diagnostic reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Read,
    Compile,
    Link,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Read => f.write_str("read"),
            DiagnosticKind::Compile => f.write_str("compile"),
            DiagnosticKind::Link => f.write_str("link"),
        }
    }
}

/// Diagnostic text produced by a failed reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub path: PathBuf,
    pub message: String,
}

impl Diagnostic {
    fn from_outcome(outcome: &ReloadOutcome, path: &Path) -> Option<Self> {
        let (kind, message) = match outcome {
            ReloadOutcome::Success => return None,
            ReloadOutcome::ReadFailure(err) => (DiagnosticKind::Read, err.to_string()),
            ReloadOutcome::CompileFailure(log) => (DiagnosticKind::Compile, log.to_string()),
            ReloadOutcome::LinkFailure(log) => (DiagnosticKind::Link, log.to_string()),
        };
        Some(Self {
            kind,
            path: path.to_path_buf(),
            message,
        })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {}:\n{}",
            self.kind,
            self.path.display(),
            self.message
        )
    }
}

/// Destination for reload diagnostics.
pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: &Diagnostic);
}

/// Default sink: logs each diagnostic at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&mut self, diagnostic: &Diagnostic) {
        tracing::error!(
            kind = %diagnostic.kind,
            path = %diagnostic.path.display(),
            "shader {} failed:\n{}",
            diagnostic.kind,
            diagnostic.message
        );
    }
}

impl<F> DiagnosticSink for F
where
    F: FnMut(&Diagnostic),
{
    fn emit(&mut self, diagnostic: &Diagnostic) {
        self(diagnostic)
    }
}

/// Counters kept by the pipeline across attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReloadStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub diagnostics_emitted: u64,
}

/// Runs reload attempts and routes their diagnostics through the [`DumpGate`].
pub struct RecompilePipeline {
    gate: DumpGate,
    sink: Box<dyn DiagnosticSink>,
    stats: ReloadStats,
}

impl fmt::Debug for RecompilePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecompilePipeline")
            .field("gate", &self.gate)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for RecompilePipeline {
    fn default() -> Self {
        Self::new(Box::new(TracingSink))
    }
}

impl RecompilePipeline {
    pub fn new(sink: Box<dyn DiagnosticSink>) -> Self {
        Self {
            gate: DumpGate::new(),
            sink,
            stats: ReloadStats::default(),
        }
    }

    pub fn gate(&self) -> DumpGate {
        self.gate
    }

    pub fn stats(&self) -> ReloadStats {
        self.stats
    }

    /// Loads the file at `path` and reloads `program` from it.
    pub fn reload_from_file<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        program: &mut ShaderProgram,
        path: &Path,
    ) -> ReloadOutcome {
        let outcome = attempt_reload(device, program, path);
        self.settle(&outcome, path);
        outcome
    }

    /// Reloads `program` from in-memory source.
    pub fn reload_from_source<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        program: &mut ShaderProgram,
        source: ShaderSource,
    ) -> ReloadOutcome {
        let path = source.path().to_path_buf();
        let outcome = recompile(device, program, source);
        self.settle(&outcome, &path);
        outcome
    }

    fn settle(&mut self, outcome: &ReloadOutcome, path: &Path) {
        self.stats.attempts += 1;
        let Some(diagnostic) = Diagnostic::from_outcome(outcome, path) else {
            self.stats.successes += 1;
            if !self.gate.is_open() {
                info!(path = %path.display(), "shader recovered");
            }
            self.gate.reopen();
            return;
        };

        self.stats.failures += 1;
        if self.gate.admit() {
            self.stats.diagnostics_emitted += 1;
            self.sink.emit(&diagnostic);
        } else {
            debug!(
                kind = %diagnostic.kind,
                path = %path.display(),
                "suppressing repeated shader diagnostic"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;

    use tempfile::TempDir;

    use super::*;
    use crate::fake::FakeDevice;

    const VERTEX: &str = "in vec3 aPosition;";
    const GOOD: &str = "uniform float time;\nvoid main() {}\n";
    const BROKEN: &str = "void main() { ERROR }\n";

    fn collecting_pipeline() -> (RecompilePipeline, Rc<RefCell<Vec<Diagnostic>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = {
            let seen = Rc::clone(&seen);
            move |diagnostic: &Diagnostic| seen.borrow_mut().push(diagnostic.clone())
        };
        (RecompilePipeline::new(Box::new(sink)), seen)
    }

    fn setup() -> (FakeDevice, ShaderProgram, TempDir) {
        let mut device = FakeDevice::new();
        let program = ShaderProgram::create(&mut device, VERTEX).unwrap();
        (device, program, TempDir::new().unwrap())
    }

    #[test]
    fn dump_gate_latches_until_success() {
        let mut gate = DumpGate::new();
        assert!(gate.admit());
        assert!(!gate.admit());
        gate.reopen();
        assert!(gate.admit());
    }

    #[test]
    fn successful_reload_links_and_reuses_identities() {
        let (mut device, mut program, dir) = setup();
        let path = dir.path().join("a.frag");
        fs::write(&path, GOOD).unwrap();
        let fragment = program.fragment_stage();

        let outcome = attempt_reload(&mut device, &mut program, &path);
        assert!(outcome.is_success());
        assert!(program.has_executable());
        assert_eq!(program.fragment_stage(), fragment);
        assert_eq!(device.stage_count(), 2);
        assert_eq!(device.program_count(), 1);
        assert_eq!(device.linked(program.id()).unwrap().fragment_source, GOOD);
    }

    #[test]
    fn compile_failure_keeps_previous_link() {
        let (mut device, mut program, dir) = setup();
        let path = dir.path().join("a.frag");
        fs::write(&path, GOOD).unwrap();
        assert!(attempt_reload(&mut device, &mut program, &path).is_success());
        let before = device.linked(program.id()).cloned();
        let links = device.links;

        fs::write(&path, BROKEN).unwrap();
        let outcome = attempt_reload(&mut device, &mut program, &path);
        assert!(matches!(outcome, ReloadOutcome::CompileFailure(ref log) if !log.is_empty()));
        assert_eq!(device.links, links, "link must not run after a compile failure");
        assert_eq!(device.linked(program.id()).cloned(), before);
        assert_eq!(program.successful_links(), 1);
    }

    #[test]
    fn link_failure_reports_linker_log() {
        let (mut device, mut program, dir) = setup();
        let path = dir.path().join("a.frag");
        fs::write(&path, GOOD).unwrap();
        assert!(attempt_reload(&mut device, &mut program, &path).is_success());

        fs::write(&path, "void main() { LINK_FAIL }").unwrap();
        match attempt_reload(&mut device, &mut program, &path) {
            ReloadOutcome::LinkFailure(log) => assert!(log.as_str().contains("vertex")),
            other => panic!("expected link failure, got {other:?}"),
        }
        assert_eq!(device.linked(program.id()).unwrap().fragment_source, GOOD);
    }

    #[test]
    fn missing_file_is_a_read_failure() {
        let (mut device, mut program, dir) = setup();
        let outcome = attempt_reload(&mut device, &mut program, &dir.path().join("gone.frag"));
        assert!(matches!(outcome, ReloadOutcome::ReadFailure(_)));
        assert_eq!(device.compiles, 1, "only the vertex stage was compiled");
    }

    #[test]
    fn attribute_binding_is_reasserted_before_each_link() {
        let (mut device, mut program, dir) = setup();
        let path = dir.path().join("a.frag");
        fs::write(&path, GOOD).unwrap();
        let binds = device.attribute_binds;

        attempt_reload(&mut device, &mut program, &path);
        attempt_reload(&mut device, &mut program, &path);
        assert_eq!(device.attribute_binds, binds + 2);
    }

    #[test]
    fn diagnostics_emitted_once_per_failure_streak() {
        let (mut device, mut program, dir) = setup();
        let (mut pipeline, seen) = collecting_pipeline();
        let path = dir.path().join("a.frag");

        fs::write(&path, BROKEN).unwrap();
        pipeline.reload_from_file(&mut device, &mut program, &path); // F1
        pipeline.reload_from_file(&mut device, &mut program, &path); // F2
        fs::write(&path, GOOD).unwrap();
        pipeline.reload_from_file(&mut device, &mut program, &path); // S
        fs::write(&path, "void main() { LINK_FAIL }").unwrap();
        pipeline.reload_from_file(&mut device, &mut program, &path); // F3

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, DiagnosticKind::Compile);
        assert_eq!(seen[1].kind, DiagnosticKind::Link);
        let stats = pipeline.stats();
        assert_eq!(stats.attempts, 4);
        assert_eq!(stats.failures, 3);
        assert_eq!(stats.diagnostics_emitted, 2);
        assert!(!pipeline.gate().is_open());
    }

    #[test]
    fn read_failures_close_the_gate_too() {
        let (mut device, mut program, dir) = setup();
        let (mut pipeline, seen) = collecting_pipeline();
        let path = dir.path().join("a.frag");

        pipeline.reload_from_file(&mut device, &mut program, &path);
        fs::write(&path, BROKEN).unwrap();
        pipeline.reload_from_file(&mut device, &mut program, &path);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, DiagnosticKind::Read);
    }
}
