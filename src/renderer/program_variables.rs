//! Declarative shader-graph builder.
//!
//! Techniques declare typed attributes, uniforms, varyings, outputs and helper
//! functions, then write statements as [`Line`]s made of text and variable
//! references. Emission walks the statements first to find which declarations
//! each stage actually references, validates stage legality, and only then
//! writes GLSL, so unused declarations never reach the compiler.

use crate::error::{RenderError, Result};
use crate::gl::GlContext;
use crate::renderer::buffer::AttributeSource;
use crate::renderer::layer_renderer::DrawState;
use crate::renderer::shader::UniformValue;
use std::collections::{BTreeSet, HashMap};

/// Per-draw value provider for a uniform
pub type UniformFn<G> = Box<dyn Fn(&DrawState<'_, G>) -> Option<UniformValue>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

#[derive(Clone, Debug)]
pub enum Piece {
    Text(String),
    Var(VarId),
}

impl From<&str> for Piece {
    fn from(text: &str) -> Piece {
        Piece::Text(text.to_string())
    }
}

impl From<String> for Piece {
    fn from(text: String) -> Piece {
        Piece::Text(text)
    }
}

impl From<VarId> for Piece {
    fn from(id: VarId) -> Piece {
        Piece::Var(id)
    }
}

/// One GLSL statement (or definition line)
#[derive(Clone, Debug, Default)]
pub struct Line(Vec<Piece>);

impl Line {
    pub fn new(pieces: Vec<Piece>) -> Line {
        Line(pieces)
    }

    fn references(&self) -> impl Iterator<Item = VarId> + '_ {
        self.0.iter().filter_map(|piece| match piece {
            Piece::Var(id) => Some(*id),
            Piece::Text(_) => None,
        })
    }
}

/// Builds a [`Line`] from text and variable pieces.
///
/// `glsl!["vec4 worldPosition = ", world_matrix, " * localPosition;"]`
macro_rules! glsl {
    ($($piece:expr),* $(,)?) => {
        $crate::renderer::program_variables::Line::new(vec![
            $($crate::renderer::program_variables::Piece::from($piece)),*
        ])
    };
}
pub(crate) use glsl;

pub enum VarKind {
    Attribute(AttributeSource),
    Uniform { block: Option<usize> },
    Varying { flat: bool },
    Output { location: u32 },
    Function { definition: Vec<Line> },
}

pub struct Variable {
    pub name: String,
    pub glsl_type: &'static str,
    pub kind: VarKind,
}

/// A uniform block of `mat4` members (std140 packs them without padding)
pub struct UniformBlock {
    pub name: String,
    pub members: Vec<VarId>,
}

pub struct ProgramVariables<G: GlContext> {
    vars: Vec<Variable>,
    by_name: HashMap<String, VarId>,
    blocks: Vec<UniformBlock>,
    providers: HashMap<VarId, UniformFn<G>>,
    vertex_lines: Vec<Line>,
    fragment_lines: Vec<Line>,
}

/// Emitted sources plus what the linker needs to wire inputs
pub struct BuiltSources<G: GlContext> {
    pub vertex: String,
    pub fragment: String,
    pub attributes: Vec<(String, AttributeSource)>,
    pub uniforms: Vec<(String, UniformFn<G>)>,
    pub blocks: Vec<(String, Vec<(String, UniformFn<G>)>)>,
}

const VERTEX_HEADER: &str = "#version 300 es\nprecision highp float;\nprecision highp int;\n";
const FRAGMENT_HEADER: &str =
    "#version 300 es\nprecision highp float;\nprecision highp int;\nprecision highp sampler2D;\n";

impl<G: GlContext> Default for ProgramVariables<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GlContext> ProgramVariables<G> {
    pub fn new() -> ProgramVariables<G> {
        ProgramVariables {
            vars: Vec::new(),
            by_name: HashMap::new(),
            blocks: Vec::new(),
            providers: HashMap::new(),
            vertex_lines: Vec::new(),
            fragment_lines: Vec::new(),
        }
    }

    fn declare(&mut self, name: &str, glsl_type: &'static str, kind: VarKind) -> VarId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = VarId(self.vars.len());
        self.vars.push(Variable {
            name: name.to_string(),
            glsl_type,
            kind,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Looks up an already declared variable by name
    pub fn find(&self, name: &str) -> Option<VarId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: VarId) -> &str {
        &self.vars[id.0].name
    }

    pub fn attribute(&mut self, name: &str, glsl_type: &'static str, source: AttributeSource) -> VarId {
        self.declare(name, glsl_type, VarKind::Attribute(source))
    }

    pub fn uniform<F>(&mut self, name: &str, glsl_type: &'static str, provider: F) -> VarId
    where
        F: Fn(&DrawState<'_, G>) -> Option<UniformValue> + 'static,
    {
        let id = self.declare(name, glsl_type, VarKind::Uniform { block: None });
        self.providers.entry(id).or_insert_with(|| Box::new(provider));
        id
    }

    /// Declares a `mat4` member of a std140 uniform block
    pub fn block_matrix<F>(&mut self, block: &str, name: &str, provider: F) -> VarId
    where
        F: Fn(&DrawState<'_, G>) -> Option<UniformValue> + 'static,
    {
        if let Some(id) = self.find(name) {
            return id;
        }
        let block_index = match self.blocks.iter().position(|b| b.name == block) {
            Some(index) => index,
            None => {
                self.blocks.push(UniformBlock {
                    name: block.to_string(),
                    members: Vec::new(),
                });
                self.blocks.len() - 1
            }
        };
        let id = self.declare(
            name,
            "mat4",
            VarKind::Uniform {
                block: Some(block_index),
            },
        );
        self.blocks[block_index].members.push(id);
        self.providers.insert(id, Box::new(provider));
        id
    }

    pub fn varying(&mut self, name: &str, glsl_type: &'static str) -> VarId {
        self.declare(name, glsl_type, VarKind::Varying { flat: false })
    }

    pub fn flat_varying(&mut self, name: &str, glsl_type: &'static str) -> VarId {
        self.declare(name, glsl_type, VarKind::Varying { flat: true })
    }

    pub fn output(&mut self, name: &str, glsl_type: &'static str, location: u32) -> VarId {
        self.declare(name, glsl_type, VarKind::Output { location })
    }

    /// Declares a helper function; its name is what call sites reference.
    /// Re-declaring the same name returns the first definition.
    pub fn function(&mut self, name: &str, definition: Vec<Line>) -> VarId {
        self.declare(name, "", VarKind::Function { definition })
    }

    pub fn vertex(&mut self, line: Line) {
        self.vertex_lines.push(line);
    }

    pub fn vertex_lines(&mut self, lines: impl IntoIterator<Item = Line>) {
        self.vertex_lines.extend(lines);
    }

    pub fn fragment(&mut self, line: Line) {
        self.fragment_lines.push(line);
    }

    pub fn fragment_lines(&mut self, lines: impl IntoIterator<Item = Line>) {
        self.fragment_lines.extend(lines);
    }

    /// Marks every variable reachable from `lines`, following function bodies
    fn mark_used(&self, lines: &[Line], used: &mut BTreeSet<VarId>) {
        let mut pending: Vec<VarId> = lines.iter().flat_map(|l| l.references()).collect();
        while let Some(id) = pending.pop() {
            if !used.insert(id) {
                continue;
            }
            if let VarKind::Function { definition } = &self.vars[id.0].kind {
                pending.extend(definition.iter().flat_map(|l| l.references()));
            }
        }
    }

    fn render_line(&self, line: &Line, out: &mut String) {
        for piece in &line.0 {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Var(id) => out.push_str(&self.vars[id.0].name),
            }
        }
    }

    fn validate(
        &self,
        program: &str,
        vertex_used: &BTreeSet<VarId>,
        fragment_used: &BTreeSet<VarId>,
    ) -> Result<()> {
        let invalid = |reason: String| RenderError::ShaderValidation {
            program: program.to_string(),
            reason,
        };
        for id in fragment_used {
            let var = &self.vars[id.0];
            match var.kind {
                VarKind::Attribute(_) => {
                    return Err(invalid(format!("attribute '{}' used in fragment stage", var.name)));
                }
                VarKind::Varying { .. } if !vertex_used.contains(id) => {
                    return Err(invalid(format!("varying '{}' is never written", var.name)));
                }
                _ => {}
            }
        }
        for id in vertex_used {
            let var = &self.vars[id.0];
            if let VarKind::Output { .. } = var.kind {
                return Err(invalid(format!("output '{}' used in vertex stage", var.name)));
            }
        }
        Ok(())
    }

    fn emit_stage(&self, stage: Stage, used: &BTreeSet<VarId>, body: &[Line]) -> String {
        let mut src = String::from(match stage {
            Stage::Vertex => VERTEX_HEADER,
            Stage::Fragment => FRAGMENT_HEADER,
        });
        for block in &self.blocks {
            if !block.members.iter().any(|m| used.contains(m)) {
                continue;
            }
            src.push_str(&format!("layout(std140) uniform {} {{\n", block.name));
            for member in &block.members {
                src.push_str(&format!("    mat4 {};\n", self.vars[member.0].name));
            }
            src.push_str("};\n");
        }
        for id in used {
            let var = &self.vars[id.0];
            let declaration = match (&var.kind, stage) {
                (VarKind::Attribute(_), Stage::Vertex) => format!("in {} {};\n", var.glsl_type, var.name),
                (VarKind::Uniform { block: None }, _) => {
                    format!("uniform {} {};\n", var.glsl_type, var.name)
                }
                (VarKind::Varying { flat }, _) => {
                    let storage = if stage == Stage::Vertex { "out" } else { "in" };
                    let qualifier = if *flat { "flat " } else { "" };
                    format!("{}{} {} {};\n", qualifier, storage, var.glsl_type, var.name)
                }
                (VarKind::Output { location }, Stage::Fragment) => format!(
                    "layout(location = {}) out {} {};\n",
                    location, var.glsl_type, var.name
                ),
                _ => continue,
            };
            src.push_str(&declaration);
        }
        // Functions last, in declaration order, so dependencies precede callers
        for id in used {
            if let VarKind::Function { definition } = &self.vars[id.0].kind {
                for line in definition {
                    self.render_line(line, &mut src);
                    src.push('\n');
                }
            }
        }
        src.push_str("void main() {\n");
        for line in body {
            src.push_str("    ");
            self.render_line(line, &mut src);
            src.push('\n');
        }
        src.push_str("}\n");
        src
    }

    /// Emits both stages and hands over the value providers of referenced uniforms
    pub fn build(mut self, program: &str) -> Result<BuiltSources<G>> {
        let mut vertex_used = BTreeSet::new();
        let mut fragment_used = BTreeSet::new();
        self.mark_used(&self.vertex_lines, &mut vertex_used);
        self.mark_used(&self.fragment_lines, &mut fragment_used);

        self.validate(program, &vertex_used, &fragment_used)?;

        let mut vertex_declared = vertex_used.clone();
        for id in &fragment_used {
            if let VarKind::Varying { .. } = self.vars[id.0].kind {
                vertex_declared.insert(*id);
            }
        }

        let vertex = self.emit_stage(Stage::Vertex, &vertex_declared, &self.vertex_lines);
        let fragment = self.emit_stage(Stage::Fragment, &fragment_used, &self.fragment_lines);

        let used: BTreeSet<VarId> = vertex_used.union(&fragment_used).copied().collect();
        let mut attributes = Vec::new();
        let mut uniforms = Vec::new();
        for id in &used {
            let var = &self.vars[id.0];
            match var.kind {
                VarKind::Attribute(source) => attributes.push((var.name.clone(), source)),
                VarKind::Uniform { block: None } => {
                    if let Some(provider) = self.providers.remove(id) {
                        uniforms.push((var.name.clone(), provider));
                    }
                }
                _ => {}
            }
        }
        let mut blocks = Vec::new();
        for block in &self.blocks {
            if !block.members.iter().any(|m| used.contains(m)) {
                continue;
            }
            let members = block
                .members
                .iter()
                .filter_map(|m| {
                    let provider = self.providers.remove(m)?;
                    Some((self.vars[m.0].name.clone(), provider))
                })
                .collect();
            blocks.push((block.name.clone(), members));
        }

        Ok(BuiltSources {
            vertex,
            fragment,
            attributes,
            uniforms,
            blocks,
        })
    }
}
