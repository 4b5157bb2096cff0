//! Normalized field trees.
//!
//! A [`FieldTree`] is the canonical representation of an operation: every field knows the concrete
//! object types it applies to, its resolved arguments and its children. Nodes live in an arena and
//! refer to each other by [`FieldId`], so trees are cheap to copy between transform passes.

mod normalizer;
mod printer;
mod value;

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

pub(crate) use self::normalizer::is_abstract;
pub(crate) use self::normalizer::output_type_name;
pub(crate) use self::normalizer::possible_types;
pub use self::normalizer::NormalizedOperation;
pub(crate) use self::normalizer::Normalizer;
pub use self::normalizer::OperationKind;
pub(crate) use self::printer::print_operation;
pub use self::value::NormalizedValue;

/// The name of the field every object type implicitly declares.
pub const TYPENAME: &str = "__typename";

/// Index of a field inside a [`FieldTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldId(usize);

impl FieldId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One selected field.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NormalizedField {
    /// Concrete object types this field applies to. Never empty.
    pub object_type_names: Vec<String>,
    pub field_name: String,
    pub alias: Option<String>,
    pub arguments: IndexMap<String, NormalizedValue>,
    pub children: Vec<FieldId>,
    pub parent: Option<FieldId>,
}

impl NormalizedField {
    pub fn new(object_type_names: Vec<String>, field_name: impl Into<String>) -> Self {
        Self {
            object_type_names,
            field_name: field_name.into(),
            alias: None,
            arguments: IndexMap::new(),
            children: Vec::new(),
            parent: None,
        }
    }

    /// The key of this field in a result object.
    pub fn result_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field_name)
    }

    pub fn is_typename(&self) -> bool {
        self.field_name == TYPENAME
    }

    pub fn applies_to(&self, object_type: &str) -> bool {
        self.object_type_names.iter().any(|name| name == object_type)
    }
}

/// An arena of [`NormalizedField`]s with an ordered list of roots.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FieldTree {
    fields: Vec<NormalizedField>,
    roots: Vec<FieldId>,
}

impl FieldTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FieldId) -> &NormalizedField {
        &self.fields[id.0]
    }

    pub fn roots(&self) -> &[FieldId] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn children(&self, id: FieldId) -> impl Iterator<Item = (FieldId, &NormalizedField)> + '_ {
        self.get(id)
            .children
            .iter()
            .map(move |child| (*child, self.get(*child)))
    }

    /// Appends `field` below `parent`, or as a root. Any `children`/`parent` already set on `field`
    /// are discarded.
    pub fn push(&mut self, parent: Option<FieldId>, mut field: NormalizedField) -> FieldId {
        let id = FieldId(self.fields.len());
        field.children.clear();
        field.parent = parent;
        self.fields.push(field);
        match parent {
            Some(parent) => self.fields[parent.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Copies the subtree rooted at `id` in `source` below `parent` in this tree.
    pub fn copy_subtree(&mut self, source: &FieldTree, id: FieldId, parent: Option<FieldId>) -> FieldId {
        let copied = self.push(parent, source.get(id).clone());
        for child in source.get(id).children.iter() {
            self.copy_subtree(source, *child, Some(copied));
        }
        copied
    }

    /// The result keys leading from the root of the tree to `id` (included).
    pub fn query_path(&self, id: FieldId) -> QueryPath {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(field) = current {
            segments.push(self.get(field).result_key().to_string());
            current = self.get(field).parent;
        }
        segments.reverse();
        QueryPath(segments)
    }

    /// Every field, parents before children, in selection order.
    pub fn walk(&self) -> Vec<FieldId> {
        let mut ids = Vec::with_capacity(self.fields.len());
        let mut stack: Vec<FieldId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            ids.push(id);
            stack.extend(self.get(id).children.iter().rev().copied());
        }
        ids
    }
}

/// Result keys from the root of a result to one field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueryPath(pub Vec<String>);

impl QueryPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.into());
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.to_vec()))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl<S: AsRef<str>> From<&[S]> for QueryPath {
    fn from(segments: &[S]) -> Self {
        Self(segments.iter().map(|s| s.as_ref().to_string()).collect())
    }
}

/// A field that has not been placed in a tree yet.
///
/// Transforms return drafts; the query transformer places them in the underlying tree. Children
/// are either other drafts, or fields of the overall tree that still need to be transformed.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDraft {
    pub object_type_names: Vec<String>,
    pub field_name: String,
    pub alias: Option<String>,
    pub arguments: IndexMap<String, NormalizedValue>,
    pub children: Vec<DraftChild>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DraftChild {
    /// A field of the overall tree, transformed when the draft is placed.
    Pending(FieldId),
    /// A field built by a transform, placed as is.
    Ready(FieldDraft),
}

impl FieldDraft {
    pub fn new(object_type_names: Vec<String>, field_name: impl Into<String>) -> Self {
        Self {
            object_type_names,
            field_name: field_name.into(),
            alias: None,
            arguments: IndexMap::new(),
            children: Vec::new(),
        }
    }

    /// A draft mirroring `id`, with its children left to transform.
    pub fn from_tree(tree: &FieldTree, id: FieldId) -> Self {
        let field = tree.get(id);
        Self {
            object_type_names: field.object_type_names.clone(),
            field_name: field.field_name.clone(),
            alias: field.alias.clone(),
            arguments: field.arguments.clone(),
            children: field.children.iter().copied().map(DraftChild::Pending).collect(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_child(mut self, child: FieldDraft) -> Self {
        self.children.push(DraftChild::Ready(child));
        self
    }

    pub fn result_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field_name)
    }

    pub(crate) fn to_field(&self) -> NormalizedField {
        NormalizedField {
            object_type_names: self.object_type_names.clone(),
            field_name: self.field_name.clone(),
            alias: self.alias.clone(),
            arguments: self.arguments.clone(),
            children: Vec::new(),
            parent: None,
        }
    }
}
