//! Performance oriented JSON manipulation.

#![allow(missing_docs)]

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
pub use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// A GraphQL path element that is composed of strings or numbers.
/// e.g `/book/3/name`
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

impl PathElement {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathElement::Key(key) => Some(key.as_str()),
            PathElement::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathElement::Index(index) => Some(*index),
            PathElement::Key(_) => None,
        }
    }
}

impl From<&str> for PathElement {
    fn from(key: &str) -> Self {
        PathElement::Key(key.to_string())
    }
}

impl From<String> for PathElement {
    fn from(key: String) -> Self {
        PathElement::Key(key)
    }
}

impl From<usize> for PathElement {
    fn from(index: usize) -> Self {
        PathElement::Index(index)
    }
}

/// A path into the result document.
///
/// This can be composed of strings and numbers
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize, Default, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl PartialOrd for PathElement {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathElement {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (PathElement::Index(a), PathElement::Index(b)) => a.cmp(b),
            (PathElement::Key(a), PathElement::Key(b)) => a.cmp(b),
            (PathElement::Index(_), PathElement::Key(_)) => std::cmp::Ordering::Less,
            (PathElement::Key(_), PathElement::Index(_)) => std::cmp::Ordering::Greater,
        }
    }
}

impl Path {
    pub fn empty() -> Path {
        Path(Default::default())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn push(&mut self, element: impl Into<PathElement>) {
        self.0.push(element.into())
    }

    pub fn pop(&mut self) -> Option<PathElement> {
        self.0.pop()
    }

    pub fn join(&self, other: impl AsRef<Self>) -> Self {
        let other = other.as_ref();
        let mut new = Vec::with_capacity(self.len() + other.len());
        new.extend(self.iter().cloned());
        new.extend(other.iter().cloned());
        Path(new)
    }

    /// Returns a new path with `element` appended.
    pub fn child(&self, element: impl Into<PathElement>) -> Self {
        let mut new = self.clone();
        new.push(element);
        new
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.len() - 1].to_vec()))
        }
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    pub fn last_key(&self) -> Option<&str> {
        self.0.last().and_then(PathElement::as_key)
    }

    /// Whether `self` is `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.len() <= other.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    /// Whether `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.len() < other.len() && self.is_prefix_of(other)
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    fn from(s: T) -> Self {
        Self(
            s.as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.parse::<usize>() {
                    Ok(index) => PathElement::Index(index),
                    Err(_) => PathElement::Key(s.to_string()),
                })
                .collect(),
        )
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<I: IntoIterator<Item = PathElement>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}

/// Extension trait for [`serde_json_bytes::Value`].
pub trait ValueExt {
    /// Deep merge the JSON objects, array and override the values in `&mut self` if they already
    /// exists.
    #[track_caller]
    fn deep_merge(&mut self, other: Self);

    /// Returns the value found at `path`, if any.
    #[track_caller]
    fn get_path(&self, path: &Path) -> Option<&Value>;

    /// Returns a mutable reference to the value found at `path`, if any.
    #[track_caller]
    fn get_path_mut(&mut self, path: &Path) -> Option<&mut Value>;

    /// Replaces the value at `path`. The parent of `path` must already exist and be an object (for a
    /// key) or an array long enough (for an index). Returns whether the value was written.
    #[track_caller]
    fn set_path(&mut self, path: &Path, value: Value) -> bool;

    /// Removes the value at `path` and returns it.
    #[track_caller]
    fn remove_path(&mut self, path: &Path) -> Option<Value>;

    /// Returns the `__typename` of an object, optionally read through an aliased key.
    fn typename_at(&self, key: &str) -> Option<&str>;
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Self) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.into_iter() {
                    match a.get_mut(key.as_str()) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(mut b)) => {
                for (b_value, a_value) in b.drain(..std::cmp::min(a.len(), b.len())).zip(a.iter_mut()) {
                    a_value.deep_merge(b_value);
                }

                a.extend(b);
            }
            (_, Value::Null) => {}
            (Value::Object(_), Value::Array(_)) => {
                failfast_debug!("trying to replace an object with an array");
            }
            (Value::Array(_), Value::Object(_)) => {
                failfast_debug!("trying to replace an array with an object");
            }
            (a, b) => {
                *a = b;
            }
        }
    }

    fn get_path(&self, path: &Path) -> Option<&Value> {
        let mut current = self;
        for element in path.iter() {
            current = match (element, current) {
                (PathElement::Key(key), Value::Object(object)) => object.get(key.as_str())?,
                (PathElement::Index(index), Value::Array(array)) => array.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn get_path_mut(&mut self, path: &Path) -> Option<&mut Value> {
        let mut current = self;
        for element in path.iter() {
            current = match (element, current) {
                (PathElement::Key(key), Value::Object(object)) => object.get_mut(key.as_str())?,
                (PathElement::Index(index), Value::Array(array)) => array.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn set_path(&mut self, path: &Path, value: Value) -> bool {
        let Some((last, parent)) = path.0.split_last() else {
            *self = value;
            return true;
        };
        match (self.get_path_mut(&Path(parent.to_vec())), last) {
            (Some(Value::Object(object)), PathElement::Key(key)) => {
                object.insert(key.clone(), value);
                true
            }
            (Some(Value::Array(array)), PathElement::Index(index)) if *index < array.len() => {
                array[*index] = value;
                true
            }
            _ => false,
        }
    }

    fn remove_path(&mut self, path: &Path) -> Option<Value> {
        let (last, parent) = path.0.split_last()?;
        match (self.get_path_mut(&Path(parent.to_vec()))?, last) {
            (Value::Object(object), PathElement::Key(key)) => object.remove(key.as_str()),
            // removing an array element would shift its siblings: null it instead
            (Value::Array(array), PathElement::Index(index)) => array
                .get_mut(*index)
                .map(|value| std::mem::replace(value, Value::Null)),
            _ => None,
        }
    }

    fn typename_at(&self, key: &str) -> Option<&str> {
        self.as_object()?.get(key)?.as_str()
    }
}
