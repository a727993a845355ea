use crate::tree::{
    Annotation, Ident, Modifier, NodeKind, Position, RawNode, RawTree, SyntaxTree, TypeNode,
    TypeTag,
};

const MEMBER_COLUMN: u32 = 5;
const PARAMETER_COLUMN: u32 = 20;
const PARAMETER_WIDTH: u32 = 16;

/// Wrap top-level declarations in a compilation unit.
pub(crate) fn tree_with(declarations: Vec<RawNode>) -> SyntaxTree {
    SyntaxTree::from_raw(raw_tree_with("com/example/Sample.java", declarations))
}

pub(crate) fn raw_tree_with(path: &str, declarations: Vec<RawNode>) -> RawTree {
    RawTree {
        path: path.to_string(),
        root: node(NodeKind::CompilationUnit, Position::new(1, 1)).with_children(declarations),
    }
}

pub(crate) fn class_def(name: &str, line: u32, members: Vec<RawNode>) -> RawNode {
    let position = Position::new(line, 1);
    let mut class = node(NodeKind::ClassDef, position);
    class.ident = Some(ident(name, Position::new(line, 14)));
    class.with_children(members)
}

/// Anonymous class body; variables directly inside it are fields.
pub(crate) fn obj_block(line: u32, members: Vec<RawNode>) -> RawNode {
    node(NodeKind::ObjBlock, Position::new(line, MEMBER_COLUMN)).with_children(members)
}

pub(crate) fn field(
    line: u32,
    modifiers: &[Modifier],
    tag: TypeTag,
    name: &str,
    annotations: &[&str],
) -> RawNode {
    declaration(
        NodeKind::VariableDef,
        Position::new(line, MEMBER_COLUMN),
        modifiers,
        Some(tag),
        name,
        annotations,
    )
}

pub(crate) fn local_variable(line: u32, tag: TypeTag, name: &str) -> RawNode {
    declaration(
        NodeKind::VariableDef,
        Position::new(line, MEMBER_COLUMN + 4),
        &[],
        Some(tag),
        name,
        &[],
    )
}

pub(crate) fn method_def(
    line: u32,
    modifiers: &[Modifier],
    return_tag: TypeTag,
    name: &str,
    annotations: &[&str],
    parameters: Vec<RawNode>,
) -> RawNode {
    let method = declaration(
        NodeKind::MethodDef,
        Position::new(line, MEMBER_COLUMN),
        modifiers,
        Some(return_tag),
        name,
        annotations,
    );
    method.with_children(vec![parameter_list(line, parameters)])
}

pub(crate) fn ctor_def(
    line: u32,
    modifiers: &[Modifier],
    name: &str,
    annotations: &[&str],
    parameters: Vec<RawNode>,
) -> RawNode {
    let ctor = declaration(
        NodeKind::CtorDef,
        Position::new(line, MEMBER_COLUMN),
        modifiers,
        None,
        name,
        annotations,
    );
    ctor.with_children(vec![parameter_list(line, parameters)])
}

/// Parameter declaration; its column is assigned by the enclosing method builder.
pub(crate) fn param(line: u32, tag: TypeTag, name: &str, annotations: &[&str]) -> RawNode {
    declaration(
        NodeKind::ParameterDef,
        Position::new(line, PARAMETER_COLUMN),
        &[],
        Some(tag),
        name,
        annotations,
    )
}

impl RawNode {
    pub(crate) fn with_children(mut self, children: Vec<RawNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub(crate) fn with_body(self, statements: Vec<RawNode>) -> Self {
        let line = self.position.line;
        self.with_children(vec![
            node(NodeKind::Block, Position::new(line, 40)).with_children(statements),
        ])
    }

    pub(crate) fn without_ident(mut self) -> Self {
        self.ident = None;
        self
    }

    pub(crate) fn without_type(mut self) -> Self {
        self.type_node = None;
        self
    }
}

fn parameter_list(line: u32, parameters: Vec<RawNode>) -> RawNode {
    let mut children = Vec::new();
    for (index, parameter) in parameters.into_iter().enumerate() {
        let column = PARAMETER_COLUMN + index as u32 * PARAMETER_WIDTH;
        if index > 0 {
            children.push(node(NodeKind::Comma, Position::new(line, column - 2)));
        }
        children.push(shift_to_column(parameter, column));
    }
    node(NodeKind::Parameters, Position::new(line, PARAMETER_COLUMN)).with_children(children)
}

fn shift_to_column(mut parameter: RawNode, column: u32) -> RawNode {
    let delta = column - parameter.position.column;
    parameter.position.column += delta;
    for annotation in &mut parameter.annotations {
        annotation.position.column += delta;
    }
    if let Some(type_node) = parameter.type_node.as_mut() {
        type_node.position.column += delta;
    }
    if let Some(ident) = parameter.ident.as_mut() {
        ident.position.column += delta;
    }
    parameter
}

/// Lay out a declaration as `@A @B modifiers type name` on one line.
fn declaration(
    kind: NodeKind,
    start: Position,
    modifiers: &[Modifier],
    tag: Option<TypeTag>,
    name: &str,
    annotations: &[&str],
) -> RawNode {
    let mut column = start.column;
    let mut annotation_nodes = Vec::new();
    for annotation in annotations {
        annotation_nodes.push(Annotation {
            name: annotation.to_string(),
            position: Position::new(start.line, column),
        });
        column += annotation.len() as u32 + 2;
    }
    column += modifiers.len() as u32 * 7;
    let type_node = tag.map(|tag| {
        let type_node = TypeNode {
            tag,
            name: None,
            position: Position::new(start.line, column),
        };
        column += 7;
        type_node
    });
    let mut raw = node(kind, start);
    raw.ident = Some(ident(name, Position::new(start.line, column)));
    raw.type_node = type_node;
    raw.modifiers = modifiers.to_vec();
    raw.annotations = annotation_nodes;
    raw
}

fn ident(text: &str, position: Position) -> Ident {
    Ident {
        text: text.to_string(),
        position,
    }
}

fn node(kind: NodeKind, position: Position) -> RawNode {
    RawNode {
        kind,
        position,
        ident: None,
        type_node: None,
        modifiers: Vec::new(),
        annotations: Vec::new(),
        children: Vec::new(),
    }
}
