use async_trait::async_trait;
use tower::BoxError;

use super::FieldTransform;
use super::ResultContext;
use super::TransformContext;
use super::TransformFieldResult;
use crate::blueprint::FieldInstruction;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::normalized::DraftChild;
use crate::normalized::FieldDraft;
use crate::normalized::FieldId;
use crate::result::ResultInstructions;

/// `@renamed(from: "a.b.c")`: the value of the field lives at a nested underlying path.
pub(crate) struct DeepRenameTransform;

#[derive(Debug)]
pub(crate) struct DeepRenamedField {
    object_types: Vec<String>,
    path: Vec<String>,
    alias: String,
}

#[async_trait]
impl FieldTransform for DeepRenameTransform {
    type State = Vec<DeepRenamedField>;

    fn name(&self) -> &'static str {
        "deep_rename"
    }

    async fn is_applicable(
        &self,
        context: &TransformContext<'_>,
        field: FieldId,
    ) -> Result<Option<Vec<DeepRenamedField>>, BoxError> {
        let field = context.tree().get(field);
        let mut renamed: Vec<DeepRenamedField> = Vec::new();
        for ty in &field.object_type_names {
            let Some(FieldInstruction::DeepRename { path }) =
                context.blueprint().rename(ty, &field.field_name)
            else {
                continue;
            };
            match renamed.iter_mut().find(|renamed| &renamed.path == path) {
                Some(renamed) => renamed.object_types.push(ty.clone()),
                None => renamed.push(DeepRenamedField {
                    object_types: vec![ty.clone()],
                    path: path.clone(),
                    alias: context.aliases().deep_rename(field.result_key(), ty, path.len()),
                }),
            }
        }
        Ok((!renamed.is_empty()).then_some(renamed))
    }

    async fn transform_field(
        &self,
        context: &TransformContext<'_>,
        field: FieldDraft,
        state: &Vec<DeepRenamedField>,
    ) -> Result<TransformFieldResult, BoxError> {
        let mut result = TransformFieldResult::removed();
        for renamed in state {
            // object types of every level of the path
            let mut levels = vec![renamed.object_types.clone()];
            for depth in 1..renamed.path.len() {
                let types = context.output_object_types(&levels[depth - 1], &renamed.path[depth - 1]);
                levels.push(types);
            }

            let mut selection: Option<FieldDraft> = None;
            for (depth, segment) in renamed.path.iter().enumerate().rev() {
                let mut level = FieldDraft::new(levels[depth].clone(), segment.as_str());
                match selection.take() {
                    Some(inner) => level.children.push(DraftChild::Ready(inner)),
                    None => {
                        level.arguments = field.arguments.clone();
                        level.children = field.children.clone();
                    }
                }
                selection = Some(level);
            }
            if let Some(selection) = selection {
                result = result.with_artificial_field(selection.with_alias(renamed.alias.as_str()));
            }
        }
        Ok(result)
    }

    async fn get_result_instructions(
        &self,
        context: &ResultContext<'_>,
        state: &Vec<DeepRenamedField>,
    ) -> Result<ResultInstructions, BoxError> {
        let key = context.tree().get(context.field()).result_key();
        let mut instructions = ResultInstructions::new();
        for parent in context.parent_nodes().iter() {
            let Some(object) = parent.value.as_object() else {
                continue;
            };
            let Some(renamed) = state
                .iter()
                .find(|renamed| object.contains_key(renamed.alias.as_str()))
            else {
                continue;
            };
            let nested: Path = std::iter::once(renamed.alias.clone())
                .chain(renamed.path.iter().skip(1).cloned())
                .map(Into::into)
                .collect();
            let from = parent.path.join(&nested);
            match parent.value.get_path(&nested) {
                Some(_) => instructions.copy(from, parent.path.child(key)),
                // an intermediate object is null
                None => instructions.set(parent.path.child(key), Value::Null),
            }
        }
        Ok(instructions)
    }
}
