use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::Deserialize;

/// Source position of a token. Lines and columns are 1-based.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct Position {
    pub(crate) line: u32,
    pub(crate) column: u32,
}

impl Position {
    pub(crate) fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Node kinds produced by the external Java parser.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum NodeKind {
    CompilationUnit,
    ClassDef,
    InterfaceDef,
    EnumDef,
    RecordDef,
    AnnotationDef,
    /// Body of an anonymous class.
    ObjBlock,
    VariableDef,
    MethodDef,
    CtorDef,
    Parameters,
    ParameterDef,
    Comma,
    Block,
    Lambda,
    /// Any other parser token, such as `STATIC_INIT` or `SLIST`.
    #[serde(other)]
    Other,
}

impl NodeKind {
    pub(crate) const ALL: [NodeKind; 15] = [
        NodeKind::CompilationUnit,
        NodeKind::ClassDef,
        NodeKind::InterfaceDef,
        NodeKind::EnumDef,
        NodeKind::RecordDef,
        NodeKind::AnnotationDef,
        NodeKind::ObjBlock,
        NodeKind::VariableDef,
        NodeKind::MethodDef,
        NodeKind::CtorDef,
        NodeKind::Parameters,
        NodeKind::ParameterDef,
        NodeKind::Comma,
        NodeKind::Block,
        NodeKind::Lambda,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            NodeKind::CompilationUnit => "COMPILATION_UNIT",
            NodeKind::ClassDef => "CLASS_DEF",
            NodeKind::InterfaceDef => "INTERFACE_DEF",
            NodeKind::EnumDef => "ENUM_DEF",
            NodeKind::RecordDef => "RECORD_DEF",
            NodeKind::AnnotationDef => "ANNOTATION_DEF",
            NodeKind::ObjBlock => "OBJ_BLOCK",
            NodeKind::VariableDef => "VARIABLE_DEF",
            NodeKind::MethodDef => "METHOD_DEF",
            NodeKind::CtorDef => "CTOR_DEF",
            NodeKind::Parameters => "PARAMETERS",
            NodeKind::ParameterDef => "PARAMETER_DEF",
            NodeKind::Comma => "COMMA",
            NodeKind::Block => "BLOCK",
            NodeKind::Lambda => "LAMBDA",
            NodeKind::Other => "OTHER",
        }
    }

    /// Whether members declared directly under this node are class members.
    pub(crate) fn is_type_body(self) -> bool {
        matches!(
            self,
            NodeKind::ClassDef
                | NodeKind::InterfaceDef
                | NodeKind::EnumDef
                | NodeKind::RecordDef
                | NodeKind::AnnotationDef
                | NodeKind::ObjBlock
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NodeKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        match NodeKind::ALL.iter().find(|kind| kind.name() == value) {
            Some(kind) => Ok(*kind),
            None => bail!("unknown token: {value}"),
        }
    }
}

/// Root tag of a declared type.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TypeTag {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    Char,
    Void,
    Reference,
    Array,
}

impl TypeTag {
    pub(crate) const ALL: [TypeTag; 11] = [
        TypeTag::Byte,
        TypeTag::Short,
        TypeTag::Int,
        TypeTag::Long,
        TypeTag::Float,
        TypeTag::Double,
        TypeTag::Boolean,
        TypeTag::Char,
        TypeTag::Void,
        TypeTag::Reference,
        TypeTag::Array,
    ];

    pub(crate) fn is_primitive(self) -> bool {
        match self {
            TypeTag::Byte
            | TypeTag::Short
            | TypeTag::Int
            | TypeTag::Long
            | TypeTag::Float
            | TypeTag::Double
            | TypeTag::Boolean
            | TypeTag::Char => true,
            TypeTag::Void | TypeTag::Reference | TypeTag::Array => false,
        }
    }
}

/// Declaration modifiers.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Modifier {
    Public,
    Protected,
    Private,
    Static,
    Final,
    Abstract,
    Native,
    Synchronized,
    Transient,
    Volatile,
    Default,
    Strictfp,
}

/// Declared type of a field, method return, or parameter.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TypeNode {
    pub(crate) tag: TypeTag,
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(flatten)]
    pub(crate) position: Position,
}

/// Identifier token of a declaration.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Ident {
    pub(crate) text: String,
    #[serde(flatten)]
    pub(crate) position: Position,
}

/// Annotation attached to a declaration, possibly package-qualified.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Annotation {
    pub(crate) name: String,
    #[serde(flatten)]
    pub(crate) position: Position,
}

impl Annotation {
    pub(crate) fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Serialized tree dump as emitted by the parser front end.
#[derive(Debug, Deserialize)]
pub(crate) struct RawTree {
    #[serde(default)]
    pub(crate) path: String,
    pub(crate) root: RawNode,
}

/// Nested node form used by tree dumps.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct RawNode {
    pub(crate) kind: NodeKind,
    #[serde(flatten)]
    pub(crate) position: Position,
    #[serde(default)]
    pub(crate) ident: Option<Ident>,
    #[serde(default, rename = "type")]
    pub(crate) type_node: Option<TypeNode>,
    #[serde(default)]
    pub(crate) modifiers: Vec<Modifier>,
    #[serde(default)]
    pub(crate) annotations: Vec<Annotation>,
    #[serde(default)]
    pub(crate) children: Vec<RawNode>,
}

/// Index of a node inside its tree.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct NodeId(usize);

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    position: Position,
    ident: Option<Ident>,
    type_node: Option<TypeNode>,
    modifiers: Vec<Modifier>,
    annotations: Vec<Annotation>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Immutable syntax tree for one source file, stored as an arena with parent links.
#[derive(Debug)]
pub(crate) struct SyntaxTree {
    path: String,
    nodes: Vec<NodeData>,
}

impl SyntaxTree {
    pub(crate) fn from_raw(raw: RawTree) -> Self {
        let mut nodes: Vec<NodeData> = Vec::new();
        let mut stack = vec![(raw.root, None)];
        // Children are pushed in reverse so nodes are allocated in pre-order.
        while let Some((raw_node, parent)) = stack.pop() {
            let id = NodeId(nodes.len());
            let RawNode {
                kind,
                position,
                ident,
                type_node,
                modifiers,
                annotations,
                children,
            } = raw_node;
            nodes.push(NodeData {
                kind,
                position,
                ident,
                type_node,
                modifiers,
                annotations,
                parent,
                children: Vec::with_capacity(children.len()),
            });
            if let Some(NodeId(parent_index)) = parent {
                nodes[parent_index].children.push(id);
            }
            for child in children.into_iter().rev() {
                stack.push((child, Some(id)));
            }
        }
        Self {
            path: raw.path,
            nodes,
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn root(&self) -> Node<'_> {
        Node {
            tree: self,
            id: NodeId(0),
        }
    }

    fn node(&self, id: NodeId) -> Node<'_> {
        Node { tree: self, id }
    }
}

/// Read-only view of one node in a [`SyntaxTree`].
#[derive(Clone, Copy)]
pub(crate) struct Node<'a> {
    tree: &'a SyntaxTree,
    id: NodeId,
}

impl<'a> Node<'a> {
    fn data(&self) -> &'a NodeData {
        &self.tree.nodes[self.id.0]
    }

    pub(crate) fn kind(&self) -> NodeKind {
        self.data().kind
    }

    pub(crate) fn position(&self) -> Position {
        self.data().position
    }

    pub(crate) fn ident(&self) -> Option<&'a Ident> {
        self.data().ident.as_ref()
    }

    pub(crate) fn type_node(&self) -> Option<&'a TypeNode> {
        self.data().type_node.as_ref()
    }

    pub(crate) fn has_modifier(&self, modifier: Modifier) -> bool {
        self.data().modifiers.contains(&modifier)
    }

    pub(crate) fn annotations(&self) -> &'a [Annotation] {
        &self.data().annotations
    }

    /// Whether an annotation with the given simple name is attached, ignoring its package.
    pub(crate) fn has_annotation(&self, simple_name: &str) -> bool {
        self.annotations()
            .iter()
            .any(|annotation| annotation.simple_name() == simple_name)
    }

    /// Earliest token of the declaration, including leading annotations.
    pub(crate) fn first_token_position(&self) -> Position {
        let data = self.data();
        let annotations = data.annotations.iter().map(|annotation| annotation.position);
        let type_position = data.type_node.as_ref().map(|type_node| type_node.position);
        let ident_position = data.ident.as_ref().map(|ident| ident.position);
        annotations
            .chain(type_position)
            .chain(ident_position)
            .fold(data.position, Position::min)
    }

    pub(crate) fn parent(&self) -> Option<Node<'a>> {
        self.data().parent.map(|id| self.tree.node(id))
    }

    pub(crate) fn children(self) -> impl Iterator<Item = Node<'a>> + 'a {
        let tree = self.tree;
        self.data().children.iter().map(move |id| tree.node(*id))
    }

    pub(crate) fn find_first_child(&self, kind: NodeKind) -> Option<Node<'a>> {
        self.children().find(|child| child.kind() == kind)
    }

    /// Parameter declarations of a method or constructor, separators skipped.
    pub(crate) fn parameters(self) -> impl Iterator<Item = Node<'a>> + 'a {
        self.find_first_child(NodeKind::Parameters)
            .into_iter()
            .flat_map(|parameters| parameters.children())
            .filter(|child| child.kind() == NodeKind::ParameterDef)
    }

    /// Nearest enclosing node.
    pub(crate) fn enclosing(&self) -> Option<Node<'a>> {
        self.parent()
    }

    /// Whether this is a field declared in a type body rather than a local variable.
    pub(crate) fn is_class_field(&self) -> bool {
        self.kind() == NodeKind::VariableDef
            && self
                .enclosing()
                .is_some_and(|owner| owner.kind().is_type_body())
    }

    /// Pre-order traversal starting at this node.
    pub(crate) fn descendants(&self) -> Descendants<'a> {
        Descendants {
            tree: self.tree,
            stack: vec![self.id],
        }
    }
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind())
            .field("position", &self.position())
            .field("ident", &self.ident().map(|ident| ident.text.as_str()))
            .field(
                "type",
                &self
                    .type_node()
                    .map(|type_node| type_node.name.as_deref().unwrap_or("?")),
            )
            .finish()
    }
}

/// Pre-order node iterator.
pub(crate) struct Descendants<'a> {
    tree: &'a SyntaxTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = Node<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.tree.node(id);
        self.stack.extend(node.data().children.iter().rev().copied());
        Some(node)
    }
}
