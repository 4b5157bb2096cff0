use async_trait::async_trait;
use tower::BoxError;

use super::FieldTransform;
use super::ResultContext;
use super::TransformContext;
use super::TransformFieldResult;
use crate::blueprint::FieldInstruction;
use crate::normalized::FieldDraft;
use crate::normalized::FieldId;
use crate::result::ResultInstructions;

/// `@renamed(from: "name")` on a field.
pub(crate) struct RenameTransform;

/// The underlying field selected for some of the object types of a renamed field.
#[derive(Debug)]
pub(crate) struct RenamedField {
    object_types: Vec<String>,
    underlying_name: String,
    alias: String,
}

#[async_trait]
impl FieldTransform for RenameTransform {
    type State = Vec<RenamedField>;

    fn name(&self) -> &'static str {
        "rename"
    }

    async fn is_applicable(
        &self,
        context: &TransformContext<'_>,
        field: FieldId,
    ) -> Result<Option<Vec<RenamedField>>, BoxError> {
        let field = context.tree().get(field);
        let blueprint = context.blueprint();
        let renamed = field.object_type_names.iter().any(|ty| {
            matches!(
                blueprint.rename(ty, &field.field_name),
                Some(FieldInstruction::Rename { .. })
            )
        });
        if !renamed {
            return Ok(None);
        }

        let mut renamed_fields: Vec<RenamedField> = Vec::new();
        for ty in &field.object_type_names {
            let underlying_name = match blueprint.rename(ty, &field.field_name) {
                Some(FieldInstruction::Rename { underlying_name }) => underlying_name.as_str(),
                _ => field.field_name.as_str(),
            };
            match renamed_fields
                .iter_mut()
                .find(|renamed| renamed.underlying_name == underlying_name)
            {
                Some(renamed) => renamed.object_types.push(ty.clone()),
                None => renamed_fields.push(RenamedField {
                    object_types: vec![ty.clone()],
                    underlying_name: underlying_name.to_string(),
                    alias: context
                        .aliases()
                        .rename(field.result_key(), ty, underlying_name),
                }),
            }
        }
        Ok(Some(renamed_fields))
    }

    async fn transform_field(
        &self,
        _context: &TransformContext<'_>,
        field: FieldDraft,
        state: &Vec<RenamedField>,
    ) -> Result<TransformFieldResult, BoxError> {
        let renamed = |renamed: &RenamedField| FieldDraft {
            object_type_names: renamed.object_types.clone(),
            field_name: renamed.underlying_name.clone(),
            alias: Some(renamed.alias.clone()),
            arguments: field.arguments.clone(),
            children: field.children.clone(),
        };
        // one underlying name for every type: later transforms keep working on the field
        if let [single] = state.as_slice() {
            return Ok(TransformFieldResult::unchanged(renamed(single)));
        }
        Ok(TransformFieldResult {
            new_field: None,
            artificial_fields: state.iter().map(renamed).collect(),
        })
    }

    async fn get_result_instructions(
        &self,
        context: &ResultContext<'_>,
        state: &Vec<RenamedField>,
    ) -> Result<ResultInstructions, BoxError> {
        let key = context.tree().get(context.field()).result_key();
        let mut instructions = ResultInstructions::new();
        for parent in context.parent_nodes().iter() {
            let Some(object) = parent.value.as_object() else {
                continue;
            };
            // each alias is only selected on its own object types
            if let Some(renamed) = state
                .iter()
                .find(|renamed| object.contains_key(renamed.alias.as_str()))
            {
                instructions.copy(parent.path.child(renamed.alias.as_str()), parent.path.child(key));
            }
        }
        Ok(instructions)
    }
}
