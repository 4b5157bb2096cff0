use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tower::BoxError;

use super::FieldTransform;
use super::ResultContext;
use super::TransformContext;
use super::TransformFieldResult;
use crate::blueprint::HydrationInstruction;
use crate::normalized::FieldDraft;
use crate::normalized::FieldId;
use crate::result::ResultInstructions;

/// `@hydrated` and `@idHydrated` fields.
///
/// The virtual field itself never reaches the service: only the source fields its instructions
/// read are selected, under artificial aliases. Backing calls are made once the source values are
/// known, see [`crate::execution`].
pub(crate) struct HydrationTransform;

#[derive(Debug)]
pub(crate) struct HydrationState {
    /// The instructions declared on the object types of the field, in declaration order.
    pub(crate) instructions: Vec<Arc<HydrationInstruction>>,
    /// Artificial alias of each top-level source field, keyed by the source field name.
    pub(crate) sources: IndexMap<String, String>,
}

impl HydrationState {
    /// The alias under which the first segment of `path` was selected.
    pub(crate) fn source_alias(&self, path: &[String]) -> Option<&str> {
        path.first()
            .and_then(|first| self.sources.get(first))
            .map(String::as_str)
    }
}

#[async_trait]
impl FieldTransform for HydrationTransform {
    type State = HydrationState;

    fn name(&self) -> &'static str {
        "hydration"
    }

    async fn is_applicable(
        &self,
        context: &TransformContext<'_>,
        field: FieldId,
    ) -> Result<Option<HydrationState>, BoxError> {
        let field = context.tree().get(field);
        let instructions: Vec<Arc<HydrationInstruction>> = field
            .object_type_names
            .iter()
            .flat_map(|ty| context.blueprint().hydrations(ty, &field.field_name))
            .collect();
        if instructions.is_empty() {
            return Ok(None);
        }

        let mut sources = IndexMap::new();
        for instruction in &instructions {
            for path in instruction.source_paths() {
                let Some(first) = path.first() else {
                    continue;
                };
                if !sources.contains_key(first) {
                    let alias = context.aliases().hydration_source(field.result_key(), first);
                    sources.insert(first.clone(), alias);
                }
            }
        }
        Ok(Some(HydrationState {
            instructions,
            sources,
        }))
    }

    async fn transform_field(
        &self,
        context: &TransformContext<'_>,
        _field: FieldDraft,
        state: &HydrationState,
    ) -> Result<TransformFieldResult, BoxError> {
        let mut result = TransformFieldResult::removed();
        for (first, alias) in &state.sources {
            let mut object_types: Vec<String> = Vec::new();
            let mut rests: Vec<&[String]> = Vec::new();
            for instruction in &state.instructions {
                let paths: Vec<&[String]> = instruction
                    .source_paths()
                    .into_iter()
                    .filter(|path| path.first() == Some(first))
                    .collect();
                if paths.is_empty() {
                    continue;
                }
                if !object_types.contains(&instruction.virtual_type) {
                    object_types.push(instruction.virtual_type.clone());
                }
                rests.extend(paths.into_iter().map(|path| &path[1..]));
            }
            let draft = source_draft(context, object_types, first, &rests);
            result = result.with_artificial_field(draft.with_alias(alias.as_str()));
        }
        Ok(result)
    }

    async fn get_result_instructions(
        &self,
        context: &ResultContext<'_>,
        state: &HydrationState,
    ) -> Result<ResultInstructions, BoxError> {
        crate::execution::hydrate(context, state).await
    }
}

/// Selects `name` on `object_types`, and below it every remaining segment of `rests`.
fn source_draft(
    context: &TransformContext<'_>,
    object_types: Vec<String>,
    name: &str,
    rests: &[&[String]],
) -> FieldDraft {
    let mut nested: IndexMap<&str, Vec<&[String]>> = IndexMap::new();
    for rest in rests {
        if let Some((head, tail)) = rest.split_first() {
            nested.entry(head.as_str()).or_default().push(tail);
        }
    }
    let child_types = if nested.is_empty() {
        Vec::new()
    } else {
        context.output_object_types(&object_types, name)
    };
    let mut draft = FieldDraft::new(object_types, name);
    for (head, tails) in nested {
        draft = draft.with_child(source_draft(context, child_types.clone(), head, &tails));
    }
    draft
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use crate::execution::tests::harness;

    #[tokio::test]
    async fn test_source_fields_replace_the_virtual_field() {
        let harness = harness();
        let (query, _) = harness
            .transform_and_answer(
                "{ issue(id: \"1\") { id author { name } } }",
                json!({"rename__issue__Query__issueById": {"id": "1", "hydration__author__reporter": null}}),
            )
            .await;
        insta::assert_snapshot!(query, @r###"
        query {
          rename__issue__Query__issueById: issueById(id: "1") {
            id
            hydration__author__reporter: reporter {
              accountId
            }
          }
        }
        "###);
    }
}
