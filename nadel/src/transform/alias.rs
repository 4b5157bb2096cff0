use std::collections::HashMap;

use parking_lot::Mutex;

use crate::configuration::AliasStrategy;
use crate::json_ext::Path;
use crate::json_ext::PathElement;

/// What an artificial alias stands for in the overall result.
#[derive(Clone, Debug, PartialEq, Eq)]
struct AliasTarget {
    /// Result key of the overall field.
    key: String,
    /// How many path elements after the alias belong to the artificial selection. `None` when
    /// everything below the alias does.
    nested: Option<usize>,
}

/// Builds the artificial aliases of one operation and remembers what they stand for, so that
/// error paths reported by services can be mapped back onto the overall result.
///
/// With [`AliasStrategy::Dynamic`], every alias carries a random token, which keeps artificial
/// aliases from colliding with aliases chosen by clients.
#[derive(Debug)]
pub struct AliasHelper {
    token: Option<String>,
    targets: Mutex<HashMap<String, AliasTarget>>,
}

impl AliasHelper {
    pub(crate) fn new(strategy: AliasStrategy) -> Self {
        let token = match strategy {
            AliasStrategy::Static => None,
            AliasStrategy::Dynamic => Some(uuid::Uuid::new_v4().simple().to_string()),
        };
        Self {
            token,
            targets: Default::default(),
        }
    }

    /// `<kind>__<part>__<part>...`, with the random token appended to `kind` when aliases are
    /// dynamic.
    pub fn artificial(&self, kind: &str, parts: &[&str]) -> String {
        let mut alias = kind.to_string();
        if let Some(token) = &self.token {
            alias.push('_');
            alias.push_str(token);
        }
        for part in parts {
            alias.push_str("__");
            alias.push_str(part);
        }
        alias
    }

    /// Alias of a renamed field on one object type.
    pub fn rename(&self, key: &str, type_name: &str, underlying_name: &str) -> String {
        let alias = self.artificial("rename", &[key, type_name, underlying_name]);
        self.register(&alias, key, Some(0));
        alias
    }

    /// Alias of the first field of a nested underlying path of `depth` fields.
    pub fn deep_rename(&self, key: &str, type_name: &str, depth: usize) -> String {
        let alias = self.artificial("deep_rename", &[key, type_name]);
        self.register(&alias, key, Some(depth.saturating_sub(1)));
        alias
    }

    /// Alias of a field fetched as the source of the hydrated field `key`.
    pub fn hydration_source(&self, key: &str, source_field: &str) -> String {
        let alias = self.artificial("hydration", &[key, source_field]);
        self.register(&alias, key, None);
        alias
    }

    /// Alias of the field matching batched backing results to their ids.
    pub fn batch_identity(&self, key: &str, identified_by: &str) -> String {
        self.artificial("batch_hydration", &[key, identified_by])
    }

    /// Alias of the `__typename` selected below abstract fields and empty selections.
    pub fn typename(&self) -> String {
        self.artificial("typename", &["nadel"])
    }

    pub(crate) fn register(&self, alias: &str, key: &str, nested: Option<usize>) {
        self.targets.lock().insert(
            alias.to_string(),
            AliasTarget {
                key: key.to_string(),
                nested,
            },
        );
    }

    /// Rewrites artificial aliases of `path` into overall result keys.
    pub fn remap(&self, path: &Path) -> Path {
        let targets = self.targets.lock();
        let mut remapped = Path::empty();
        let mut elements = path.iter();
        while let Some(element) = elements.next() {
            let Some(target) = element.as_key().and_then(|key| targets.get(key)) else {
                remapped.push(element.clone());
                continue;
            };
            remapped.push(PathElement::Key(target.key.clone()));
            match target.nested {
                Some(nested) => {
                    for _ in 0..nested {
                        elements.next();
                    }
                }
                None => break,
            }
        }
        remapped
    }
}
