use hotreload::{InfoLog, StageKind};
use wgpu::naga;
use wgpu::naga::ShaderStage;

/// Bind group holding the std140 block of loose uniforms.
pub(crate) const UNIFORM_GROUP: u32 = 0;
/// Bind group holding one texture/sampler pair per declared `sampler2D`.
pub(crate) const TEXTURE_GROUP: u32 = 1;

const OUTPUT_ALIAS: &str = "fraglive_FragColor";

/// Types that may be collected into the uniform block.
const BLOCK_TYPES: &[&str] = &[
    "float", "int", "uint", "vec2", "vec3", "vec4", "ivec2", "ivec3", "ivec4", "uvec2", "uvec3",
    "uvec4", "mat2", "mat3", "mat4",
];

const PRECISIONS: &[&str] = &["lowp", "mediump", "highp"];

/// A stage rewritten into Vulkan GLSL 450.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NormalizedStage {
    pub source: String,
    /// `sampler2D` names in declaration order; slot `k` uses bindings `2k` and `2k + 1`.
    pub samplers: Vec<String>,
    /// Loose uniforms moved into the block, in declaration order.
    pub block_members: Vec<String>,
    /// Lines prepended ahead of the user's first line.
    pub header_lines: usize,
}

impl NormalizedStage {
    /// Maps a span in the normalized source back to the user's line number.
    fn user_line(&self, span: naga::Span) -> usize {
        if !span.is_defined() {
            return 0;
        }
        let line = span.location(&self.source).line_number as usize;
        line.saturating_sub(self.header_lines)
    }
}

/// Rewrites desktop-GL style GLSL into something naga accepts.
///
/// Steps performed:
///
/// 1. Drop `#version` and `precision` statements; the header declares 450.
/// 2. Collect loose `uniform <type> <name>;` declarations of plain data types
///    into one anonymous std140 block at set 0, binding 0, so the names stay
///    usable unqualified.
/// 3. Split every `uniform sampler2D <name>;` into a `texture2D` and a
///    `sampler` at set 1 and alias the name with a `sampler2D(...)` macro.
/// 4. Give unqualified `in`/`varying`/`out` globals explicit locations, and
///    alias `gl_FragColor` when a fragment stage declares no output.
///
/// Removed lines are blanked rather than dropped, so subtracting
/// `header_lines` recovers the user's line numbers.
pub(crate) fn normalize(kind: StageKind, source: &str) -> NormalizedStage {
    let mut body = Vec::new();
    let mut block_members = Vec::new();
    let mut samplers = Vec::new();
    let mut next_input = 0u32;
    let mut next_output = 0u32;

    let mut in_comment = false;
    let mut writes_frag_color = false;

    for line in source.lines() {
        let opens_in_comment = in_comment;
        let code = strip_comments(line, &mut in_comment);
        let trimmed = code.trim();
        writes_frag_color |= trimmed.contains("gl_FragColor");
        // A rewritten line must keep any comment delimiters the original carried.
        let rewrite = |replacement: String| {
            let mut out = String::new();
            if opens_in_comment {
                out.push_str("*/ ");
            }
            out.push_str(&replacement);
            if in_comment {
                out.push_str(" /*");
            }
            out
        };

        if trimmed.starts_with("#version") || trimmed.starts_with("precision ") {
            body.push(rewrite(String::new()));
            continue;
        }

        if let Some((ty, names)) = parse_loose_uniform(trimmed) {
            if ty == "sampler2D" {
                samplers.extend(names);
                body.push(rewrite(String::new()));
                continue;
            }
            if BLOCK_TYPES.contains(&ty) {
                block_members.extend(names.into_iter().map(|name| format!("{ty} {name}")));
                body.push(rewrite(String::new()));
                continue;
            }
        }

        if let Some(rest) = unqualified_global(trimmed, "out") {
            body.push(rewrite(format!("layout(location = {next_output}) out {rest}")));
            next_output += 1;
            continue;
        }
        let input = unqualified_global(trimmed, "in")
            .or_else(|| unqualified_global(trimmed, "varying"));
        if let Some(rest) = input {
            body.push(rewrite(format!("layout(location = {next_input}) in {rest}")));
            next_input += 1;
            continue;
        }

        body.push(line.to_owned());
    }

    let mut header = String::from("#version 450\n");
    if !block_members.is_empty() {
        header.push_str(&format!(
            "layout(std140, set = {UNIFORM_GROUP}, binding = 0) uniform FragliveUniforms {{\n"
        ));
        for member in &block_members {
            header.push_str(&format!("    {member};\n"));
        }
        header.push_str("};\n");
    }
    for (slot, name) in samplers.iter().enumerate() {
        let texture_binding = slot * 2;
        let sampler_binding = texture_binding + 1;
        header.push_str(&format!(
            "layout(set = {TEXTURE_GROUP}, binding = {texture_binding}) uniform texture2D {name}_texture;\n\
             layout(set = {TEXTURE_GROUP}, binding = {sampler_binding}) uniform sampler {name}_sampler;\n\
             #define {name} sampler2D({name}_texture, {name}_sampler)\n"
        ));
    }
    if kind == StageKind::Fragment && next_output == 0 && writes_frag_color {
        header.push_str(&format!(
            "layout(location = 0) out vec4 {OUTPUT_ALIAS};\n#define gl_FragColor {OUTPUT_ALIAS}\n"
        ));
    }
    let header_lines = header.lines().count();

    let mut normalized = header;
    for line in body {
        normalized.push_str(&line);
        normalized.push('\n');
    }

    NormalizedStage {
        source: normalized,
        samplers,
        block_members,
        header_lines,
    }
}

/// Returns the code on `line` with `//` and `/* */` comments replaced by
/// spaces. `in_comment` carries an open block comment across lines.
fn strip_comments(line: &str, in_comment: &mut bool) -> String {
    let mut code = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if *in_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                *in_comment = false;
                code.push(' ');
            }
            continue;
        }
        match (ch, chars.peek()) {
            ('/', Some('/')) => break,
            ('/', Some('*')) => {
                chars.next();
                *in_comment = true;
                code.push(' ');
            }
            _ => code.push(ch),
        }
    }
    code
}

/// Splits `uniform [precision] <type> <a>[, <b>...];` into its type and names.
fn parse_loose_uniform(line: &str) -> Option<(&str, Vec<String>)> {
    let rest = line.strip_prefix("uniform ")?.strip_suffix(';')?;
    let mut words = rest.split_whitespace().peekable();
    if words.peek().is_some_and(|word| PRECISIONS.contains(word)) {
        words.next();
    }
    let ty = words.next()?;
    let declarators: String = words.collect::<Vec<_>>().join(" ");
    let names: Vec<String> = declarators
        .split(',')
        .map(str::trim)
        .map(str::to_owned)
        .collect();
    let valid = names.iter().all(|name| {
        !name.is_empty() && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    });
    valid.then_some((ty, names))
}

fn unqualified_global<'a>(line: &'a str, qualifier: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(qualifier)?;
    if !rest.starts_with(char::is_whitespace) || !line.ends_with(';') {
        return None;
    }
    Some(rest.trim_start())
}

/// Parses and validates a normalized stage, returning the compiler log on failure.
///
/// Log lines follow the GL driver format `ERROR: 0:<line>: <message>` with
/// lines counted in the user's file.
pub(crate) fn parse_stage(
    kind: StageKind,
    stage: &NormalizedStage,
) -> Result<naga::Module, InfoLog> {
    let shader_stage = match kind {
        StageKind::Vertex => ShaderStage::Vertex,
        StageKind::Fragment => ShaderStage::Fragment,
    };
    let mut frontend = naga::front::glsl::Frontend::default();
    let module = frontend
        .parse(&naga::front::glsl::Options::from(shader_stage), &stage.source)
        .map_err(|errors| {
            let lines: Vec<String> = errors
                .errors
                .iter()
                .map(|error| format!("ERROR: 0:{}: {}", stage.user_line(error.meta), error.kind))
                .collect();
            InfoLog::new(lines.join("\n"))
        })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    );
    validator.validate(&module).map_err(|error| {
        let line = error
            .spans()
            .next()
            .map(|(span, _)| stage.user_line(*span))
            .unwrap_or(0);
        InfoLog::new(format!("ERROR: 0:{line}: {}", error.as_inner()))
    })?;
    Ok(module)
}

/// Built-in pass-through vertex stage for the full-screen quad.
pub const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec3 aPosition;
layout(location = 0) out vec2 vUv;

void main() {
    vUv = aPosition.xy * 0.5 + vec2(0.5);
    gl_Position = vec4(aPosition, 1.0);
}
";

/// Rendered while the user's shader has never compiled.
pub const FALLBACK_FRAGMENT_GLSL: &str = r"#version 330 core
uniform float time;
in vec2 vUv;
out vec4 FragColor;

void main() {
    vec2 cell = floor(gl_FragCoord.xy / 32.0);
    float checker = mod(cell.x + cell.y, 2.0);
    float pulse = 0.6 + 0.4 * sin(time * 2.0);
    vec3 warning = vec3(0.85, 0.1, 0.55) * pulse;
    FragColor = vec4(mix(vec3(0.12), warning, checker), 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;

    const DESKTOP: &str = r"#version 330 core
precision mediump float;
uniform float time;
uniform highp vec2 resolution;
uniform sampler2D tex0;
in vec2 vUv;
out vec4 FragColor;
void main() {
    FragColor = texture(tex0, vUv) * time / resolution.x;
}
";

    #[test]
    fn collects_loose_uniforms_into_block() {
        let normalized = normalize(StageKind::Fragment, DESKTOP);
        assert_eq!(normalized.block_members, ["float time", "vec2 resolution"]);
        assert_eq!(normalized.samplers, ["tex0"]);
        assert!(normalized.source.starts_with("#version 450\n"));
        assert!(normalized.source.contains("uniform FragliveUniforms {"));
        assert!(!normalized.source.contains("uniform float time;"));
        assert!(!normalized.source.contains("precision mediump"));
        assert!(normalized
            .source
            .contains("#define tex0 sampler2D(tex0_texture, tex0_sampler)"));
    }

    #[test]
    fn assigns_locations_to_unqualified_globals() {
        let normalized = normalize(StageKind::Fragment, DESKTOP);
        assert!(normalized
            .source
            .contains("layout(location = 0) in vec2 vUv;"));
        assert!(normalized
            .source
            .contains("layout(location = 0) out vec4 FragColor;"));
    }

    #[test]
    fn keeps_user_line_numbers() {
        let normalized = normalize(StageKind::Fragment, DESKTOP);
        let body: Vec<&str> = normalized
            .source
            .lines()
            .skip(normalized.header_lines)
            .collect();
        assert_eq!(body.len(), DESKTOP.lines().count());
        assert_eq!(body.get(8).copied(), DESKTOP.lines().nth(8));
    }

    #[test]
    fn error_log_reports_user_lines() {
        let source = "out vec4 color;\nuniform float time;\n\nvoid main() {\n    color = vec4(time) +;\n}\n";
        let normalized = normalize(StageKind::Fragment, source);
        let log = parse_stage(StageKind::Fragment, &normalized).unwrap_err();
        assert!(log.as_str().starts_with("ERROR: 0:5:"), "log: {log}");
    }

    #[test]
    fn aliases_gl_frag_color_without_output() {
        let normalized = normalize(
            StageKind::Fragment,
            "void main() { gl_FragColor = vec4(1.0); }\n",
        );
        assert!(normalized.source.contains("#define gl_FragColor fraglive_FragColor"));
        assert!(parse_stage(StageKind::Fragment, &normalized).is_ok());
    }

    #[test]
    fn leaves_qualified_and_unknown_declarations_alone() {
        let source = "layout(location = 1) out vec4 extra;\nuniform float weights[4];\n";
        let normalized = normalize(StageKind::Fragment, source);
        assert!(normalized.block_members.is_empty());
        assert!(normalized
            .source
            .contains("layout(location = 1) out vec4 extra;"));
        assert!(normalized.source.contains("uniform float weights[4];"));
    }

    #[test]
    fn trailing_comments_do_not_hide_uniforms() {
        let source = "uniform float time; // seconds since start\n\
                      out vec4 color; /* rgba */\n\
                      void main() { color = vec4(time); }\n";
        let normalized = normalize(StageKind::Fragment, source);
        assert_eq!(normalized.block_members, ["float time"]);
        assert!(normalized.source.contains("layout(location = 0) out vec4 color;"));
        parse_stage(StageKind::Fragment, &normalized).expect("commented shader parses");
    }

    #[test]
    fn commented_out_declarations_stay_undeclared() {
        let source = "/*\nuniform float time;\nuniform sampler2D tex0;\n*/\n\
                      // uniform vec2 resolution;\n\
                      out vec4 color;\nvoid main() { color = vec4(1.0); }\n";
        let normalized = normalize(StageKind::Fragment, source);
        assert!(normalized.block_members.is_empty());
        assert!(normalized.samplers.is_empty());
        assert_eq!(
            normalized.source.lines().count() - normalized.header_lines,
            source.lines().count()
        );
        parse_stage(StageKind::Fragment, &normalized).expect("shader parses");
    }

    #[test]
    fn rewritten_lines_keep_block_comment_delimiters() {
        let source = "uniform float time; /* the\nuniform float phase;\nend */ uniform float frequency;\n\
                      out vec4 color;\nvoid main() { color = vec4(time + frequency); }\n";
        let normalized = normalize(StageKind::Fragment, source);
        assert_eq!(normalized.block_members, ["float time", "float frequency"]);
        parse_stage(StageKind::Fragment, &normalized).expect("shader parses");
    }

    #[test]
    fn comma_separated_uniforms() {
        let normalized = normalize(StageKind::Fragment, "uniform float phase, frequency;\n");
        assert_eq!(normalized.block_members, ["float phase", "float frequency"]);
    }

    #[test]
    fn desktop_shader_parses() {
        let normalized = normalize(StageKind::Fragment, DESKTOP);
        parse_stage(StageKind::Fragment, &normalized).expect("normalized shader parses");
    }

    #[test]
    fn builtin_shaders_parse() {
        let vertex = normalize(StageKind::Vertex, VERTEX_SHADER_GLSL);
        parse_stage(StageKind::Vertex, &vertex).expect("vertex parses");
        let fallback = normalize(StageKind::Fragment, FALLBACK_FRAGMENT_GLSL);
        parse_stage(StageKind::Fragment, &fallback).expect("fallback parses");
    }

    #[test]
    fn syntax_errors_produce_a_log() {
        let normalized = normalize(
            StageKind::Fragment,
            "out vec4 color;\nvoid main() { color = vec4(1.0) }\n",
        );
        let log = parse_stage(StageKind::Fragment, &normalized).unwrap_err();
        assert!(!log.is_empty());
    }
}
