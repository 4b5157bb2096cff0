use apollo_compiler::ast::Type;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::Schema;

use crate::graphql;
use crate::graphql::ErrorClassification;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::normalized::is_abstract;
use crate::normalized::possible_types;
use crate::normalized::FieldId;
use crate::normalized::FieldTree;
use crate::normalized::TYPENAME;

/// Shapes merged data after the overall operation.
pub(crate) struct Completion<'a> {
    pub(crate) schema: &'a Schema,
    pub(crate) tree: &'a FieldTree,
    /// Result key of the artificial `__typename` selected below abstract fields.
    pub(crate) typename_key: &'a str,
}

/// The value must be replaced by null in its parent.
struct Invalid;

/// Rebuilds `data` following the selections of the operation, in selection order.
///
/// Keys that were not selected by the client are dropped, polymorphic objects only keep the
/// fields of their concrete type and nulls in non-nullable positions bubble up to the closest
/// nullable field. Returns `None` when the null reaches the root.
pub(crate) fn complete(
    completion: &Completion<'_>,
    root_type: &str,
    data: &Value,
    errors: &mut Vec<graphql::Error>,
) -> Option<Value> {
    let empty = Object::new();
    let object = data.as_object().unwrap_or(&empty);
    completion
        .object(root_type, completion.tree.roots(), object, &Path::empty(), errors)
        .ok()
        .map(Value::Object)
}

impl Completion<'_> {
    fn object(
        &self,
        type_name: &str,
        selections: &[FieldId],
        object: &Object,
        path: &Path,
        errors: &mut Vec<graphql::Error>,
    ) -> Result<Object, Invalid> {
        let mut completed = Object::new();
        for id in selections {
            let field = self.tree.get(*id);
            if !field.applies_to(type_name) {
                continue;
            }
            let key = field.result_key();
            let value = object.get(key).cloned().unwrap_or_default();
            if field.is_typename() {
                let typename = match value {
                    Value::String(name) => Value::String(name),
                    _ => Value::String(type_name.into()),
                };
                completed.insert(key, typename);
                continue;
            }
            let Ok(definition) = self.schema.type_field(type_name, &field.field_name) else {
                failfast_debug!("field '{}.{}' is not defined", type_name, field.field_name);
                continue;
            };
            let value = self.value(&definition.ty, type_name, *id, value, &path.child(key), errors)?;
            completed.insert(key, value);
        }
        Ok(completed)
    }

    fn value(
        &self,
        ty: &Type,
        parent_type: &str,
        id: FieldId,
        value: Value,
        path: &Path,
        errors: &mut Vec<graphql::Error>,
    ) -> Result<Value, Invalid> {
        let completed = if value.is_null() {
            Err(Invalid)
        } else {
            match ty {
                Type::Named(_) | Type::NonNullNamed(_) => {
                    self.named(ty.inner_named_type().as_str(), id, value, path, errors)
                }
                Type::List(item) | Type::NonNullList(item) => match value {
                    Value::Array(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(index, item_value)| {
                            self.value(item, parent_type, id, item_value, &path.child(index), errors)
                        })
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array),
                    _ => Err(Invalid),
                },
            }
        };

        match completed {
            Ok(value) => Ok(value),
            Err(Invalid) if ty.is_non_null() => {
                if no_error_at_or_below(errors, path) {
                    errors.push(non_null_error(ty, parent_type, path));
                }
                Err(Invalid)
            }
            Err(Invalid) => Ok(Value::Null),
        }
    }

    fn named(
        &self,
        type_name: &str,
        id: FieldId,
        value: Value,
        path: &Path,
        errors: &mut Vec<graphql::Error>,
    ) -> Result<Value, Invalid> {
        match self.schema.types.get(type_name) {
            Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_)) => {
                let Value::Object(object) = value else {
                    return Err(Invalid);
                };
                let concrete = self.concrete_type(type_name, &object).ok_or(Invalid)?;
                let children = &self.tree.get(id).children;
                self.object(&concrete, children, &object, path, errors)
                    .map(Value::Object)
            }
            _ => Ok(value),
        }
    }

    fn concrete_type(&self, type_name: &str, object: &Object) -> Option<String> {
        if !is_abstract(self.schema, type_name) {
            return Some(type_name.to_string());
        }
        let from_result = [self.typename_key, TYPENAME]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str));
        let possible = possible_types(self.schema, type_name);
        match from_result {
            Some(name) if possible.contains(name) => Some(name.to_string()),
            Some(name) => {
                failfast_debug!("'{}' is not a possible type of '{}'", name, type_name);
                None
            }
            None if possible.len() == 1 => possible.into_iter().next(),
            None => None,
        }
    }
}

/// Whether no error was reported at or below `path` yet.
fn no_error_at_or_below(errors: &[graphql::Error], path: &Path) -> bool {
    !errors.iter().any(|error| {
        error
            .path
            .as_ref()
            .map_or(false, |error_path| path.is_prefix_of(error_path))
    })
}

fn non_null_error(ty: &Type, parent_type: &str, path: &Path) -> graphql::Error {
    graphql::Error::builder()
        .message(format!(
            "Cannot return null for non-nullable type: '{}' within parent '{parent_type}' ({path})",
            ty.inner_named_type()
        ))
        .path(path.clone())
        .classification(ErrorClassification::NullValueInNonNullableField)
        .build()
}
