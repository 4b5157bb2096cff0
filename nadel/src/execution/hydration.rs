use std::sync::Arc;
use std::time::Instant;

use apollo_compiler::schema::ExtendedType;
use futures::future::join_all;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use tower::BoxError;
use tracing::Instrument;

use super::execute_service_call;
use super::ServiceCall;
use super::ServiceCallResult;
use crate::blueprint::HydrationInstruction;
use crate::blueprint::HydrationStrategy;
use crate::blueprint::ValueSource;
use crate::error::FetchError;
use crate::error::TransformError;
use crate::graphql;
use crate::instrumentation::Instrumentation;
use crate::instrumentation::Step;
use crate::instrumentation::TimedStep;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::normalized::is_abstract;
use crate::normalized::output_type_name;
use crate::normalized::possible_types;
use crate::normalized::FieldId;
use crate::normalized::FieldTree;
use crate::normalized::NormalizedField;
use crate::normalized::NormalizedValue;
use crate::normalized::OperationKind;
use crate::normalized::TYPENAME;
use crate::result::JsonNode;
use crate::result::ResultInstructions;
use crate::services::HydrationDetails;
use crate::transform::HydrationState;
use crate::transform::ResultContext;

/// Resolves the hydrated field claimed in `context`, for every parent object of the service result.
///
/// Every parent is known at this point, so batched hydrations send the ids of all of them at once.
pub(crate) async fn hydrate(
    context: &ResultContext<'_>,
    state: &HydrationState,
) -> Result<ResultInstructions, BoxError> {
    let field = context.tree().get(context.field());
    let virtual_field = state
        .instructions
        .first()
        .map(|instruction| format!("{}.{}", instruction.virtual_type, instruction.virtual_field))
        .unwrap_or_else(|| field.field_name.clone());
    let span = tracing::info_span!(
        "nadel.hydration",
        "nadel.hydration.virtual_field" = virtual_field.as_str(),
        "otel.kind" = "INTERNAL"
    );

    let started = Instant::now();
    let hydrator = Hydrator {
        context,
        state,
        field,
        virtual_field: &virtual_field,
    };
    let instructions = hydrator.run().instrument(span).await?;

    let execution = context.transform.execution;
    execution.instrumentation.on_step_timed(
        &execution.parameters,
        &TimedStep {
            step: Step::Hydration {
                field: virtual_field.clone(),
            },
            duration: started.elapsed(),
        },
    );
    Ok(instructions)
}

/// One source value to hydrate.
struct Slot {
    /// Index into the hydrated parents.
    parent: usize,
    /// Position in the source list, for list sources.
    index: Option<usize>,
    /// Index into [`HydrationState::instructions`].
    instruction: usize,
    id: Value,
}

/// What one parent object is hydrated with.
enum ParentPlan {
    Null,
    One(Option<usize>),
    List(Vec<Option<usize>>),
}

/// The resolved value of a slot.
enum SlotValue {
    One(Value),
    /// One source id mapped to several backing ids.
    Many(Vec<Value>),
}

enum CallPlan {
    Single {
        slot: usize,
    },
    Batch {
        batch: usize,
        instruction: usize,
        /// A parent of the batch, supplying the arguments other than the ids.
        parent: usize,
        ids: Vec<Value>,
    },
}

/// The backing ids of a slot of a batched instruction, and the batch sending them.
#[derive(Clone, Default)]
struct BatchedIds {
    batch: usize,
    keys: Vec<String>,
}

struct Hydrator<'a, 'b> {
    context: &'a ResultContext<'b>,
    state: &'a HydrationState,
    field: &'a NormalizedField,
    virtual_field: &'a str,
}

impl<'a, 'b> Hydrator<'a, 'b> {
    async fn run(&self) -> Result<ResultInstructions, BoxError> {
        let context = self.context;
        let execution = context.transform.execution;
        let key = self.field.result_key();
        let parents: Vec<JsonNode> = context
            .parent_nodes()
            .iter()
            .filter(|parent| context.applies_to_parent(parent))
            .cloned()
            .collect();

        let mut instructions = ResultInstructions::new();
        if parents.is_empty() {
            return Ok(instructions);
        }

        let max_depth = execution.configuration.max_hydration_depth;
        if context.hydration_depth() >= max_depth {
            let error = FetchError::HydrationDepthExceeded {
                field: self.virtual_field.to_string(),
                max_depth,
            };
            for parent in &parents {
                let path = parent.path.child(key);
                instructions.set(path.clone(), Value::Null);
                instructions.error(error.to_graphql_error(Some(path)));
            }
            return Ok(instructions);
        }

        let (slots, plans) = self.plan_slots(&parents).await?;
        let calls = self.plan_calls(&parents, &slots).await?;
        let (values, errors) = self.execute(&parents, &slots, calls).await;

        for (parent, plan) in parents.iter().zip(plans) {
            let value = match plan {
                ParentPlan::Null => Value::Null,
                ParentPlan::One(slot) => match slot.and_then(|slot| values.get(slot)) {
                    Some(Some(SlotValue::One(value))) => value.clone(),
                    Some(Some(SlotValue::Many(values))) => Value::Array(values.clone()),
                    _ => Value::Null,
                },
                ParentPlan::List(slot_ids) => {
                    let mut items = Vec::with_capacity(slot_ids.len());
                    for slot in slot_ids {
                        match slot.and_then(|slot| values.get(slot)) {
                            Some(Some(SlotValue::One(value))) => items.push(value.clone()),
                            Some(Some(SlotValue::Many(values))) => items.extend(values.iter().cloned()),
                            _ => items.push(Value::Null),
                        }
                    }
                    Value::Array(items)
                }
            };
            instructions.set(parent.path.child(key), value);
        }
        if execution.configuration.include_hydration_errors {
            for error in errors {
                instructions.error(error);
            }
        }
        Ok(instructions)
    }

    /// Reads the source values of every parent and picks the instruction hydrating each of them.
    async fn plan_slots(&self, parents: &[JsonNode]) -> Result<(Vec<Slot>, Vec<ParentPlan>), BoxError> {
        let mut slots = Vec::new();
        let mut plans = Vec::with_capacity(parents.len());
        for (parent_index, parent) in parents.iter().enumerate() {
            let candidates = self.candidates(parent);
            let Some(first) = candidates.first().copied() else {
                plans.push(ParentPlan::Null);
                continue;
            };
            let for_parent = if candidates.len() == 1 {
                Some(first)
            } else if !self.share_primary_source(&candidates) {
                match self.choose(&candidates, &parent.value, None).await? {
                    Some(chosen) => Some(chosen),
                    None => {
                        plans.push(ParentPlan::Null);
                        continue;
                    }
                }
            } else {
                None
            };

            let primary = self.state.instructions[for_parent.unwrap_or(first)].batch_argument();
            let (ids, is_list) = match primary.map(|argument| &argument.source) {
                Some(ValueSource::Source(path)) => match self.source_value(parent, path) {
                    Value::Null => {
                        plans.push(ParentPlan::Null);
                        continue;
                    }
                    Value::Array(items) => (items, true),
                    value => (vec![value], false),
                },
                // without a source, the parent is hydrated with one call
                _ => (vec![Value::Null], false),
            };
            let skip_nulls = primary.is_some();

            let mut parent_slots = Vec::with_capacity(ids.len());
            for (index, id) in ids.into_iter().enumerate() {
                if skip_nulls && id.is_null() {
                    parent_slots.push(None);
                    continue;
                }
                let instruction = match for_parent {
                    Some(instruction) => Some(instruction),
                    None => self.choose(&candidates, &parent.value, Some(&id)).await?,
                };
                let Some(instruction) = instruction else {
                    parent_slots.push(None);
                    continue;
                };
                slots.push(Slot {
                    parent: parent_index,
                    index: is_list.then_some(index),
                    instruction,
                    id,
                });
                parent_slots.push(Some(slots.len() - 1));
            }
            plans.push(if is_list {
                ParentPlan::List(parent_slots)
            } else {
                ParentPlan::One(parent_slots.into_iter().next().flatten())
            });
        }
        Ok((slots, plans))
    }

    /// The instructions applying to `parent`: declared on its type, with a satisfied condition.
    fn candidates(&self, parent: &JsonNode) -> Vec<usize> {
        let instructions = &self.state.instructions;
        let polymorphic = instructions
            .iter()
            .any(|instruction| instruction.virtual_type != instructions[0].virtual_type);
        let parent_type = if polymorphic {
            self.context.parent_type_name(parent)
        } else {
            None
        };
        (0..instructions.len())
            .filter(|index| {
                let instruction = &instructions[*index];
                let declared = parent_type
                    .as_deref()
                    .map_or(true, |parent_type| instruction.virtual_type == parent_type);
                let satisfied = instruction.condition.as_ref().map_or(true, |condition| {
                    condition
                        .predicate
                        .evaluate(&self.source_value(parent, &condition.source_field))
                });
                declared && satisfied
            })
            .collect()
    }

    fn share_primary_source(&self, candidates: &[usize]) -> bool {
        let primary = |index: &usize| {
            self.state.instructions[*index]
                .batch_argument()
                .map(|argument| &argument.source)
        };
        let first = primary(&candidates[0]);
        first.is_some() && candidates.iter().all(|index| primary(index) == first)
    }

    async fn choose(
        &self,
        candidates: &[usize],
        parent: &Value,
        source_id: Option<&Value>,
    ) -> Result<Option<usize>, TransformError> {
        let instructions: Vec<Arc<HydrationInstruction>> = candidates
            .iter()
            .map(|index| self.state.instructions[*index].clone())
            .collect();
        let chosen = self
            .context
            .hooks()
            .get_hydration_instruction(&instructions, parent, source_id)
            .await
            .map_err(|error| TransformError::hook("get_hydration_instruction", error))?;
        Ok(chosen.and_then(|chosen| {
            candidates
                .iter()
                .copied()
                .find(|index| Arc::ptr_eq(&self.state.instructions[*index], &chosen))
                .or_else(|| {
                    let chosen = chosen.to_string();
                    candidates
                        .iter()
                        .copied()
                        .find(|index| self.state.instructions[*index].to_string() == chosen)
                })
        }))
    }

    /// The value at a `$source` path of `parent`, read through its artificial alias. Lists are
    /// mapped over.
    fn source_value(&self, parent: &JsonNode, path: &[String]) -> Value {
        let Some(value) = self
            .state
            .source_alias(path)
            .and_then(|alias| parent.value.as_object()?.get(alias))
        else {
            return Value::Null;
        };
        extract(value, &path[1..])
    }

    /// Groups the slots into backing calls: one per single slot, batches of deduplicated ids
    /// otherwise.
    ///
    /// Parents share a batch when they hydrate through the same instruction with the same values
    /// for every `$source` argument but the ids.
    async fn plan_calls(
        &self,
        parents: &[JsonNode],
        slots: &[Slot],
    ) -> Result<(Vec<CallPlan>, Vec<BatchedIds>), BoxError> {
        let hooks = self.context.hooks();
        let default_batch_size = self.context.transform.execution.configuration.default_batch_size;
        let mut calls = Vec::new();
        let mut mapped: Vec<BatchedIds> = vec![BatchedIds::default(); slots.len()];
        // (instruction, other source values) -> (first parent, ids)
        let mut batches: IndexMap<(usize, String), (usize, IndexMap<String, Value>)> = IndexMap::new();

        for (index, slot) in slots.iter().enumerate() {
            let instruction = &self.state.instructions[slot.instruction];
            if !instruction.strategy.is_batched() {
                calls.push(CallPlan::Single { slot: index });
                continue;
            }
            let ids = hooks
                .map_hydration_id(instruction, slot.id.clone())
                .await
                .map_err(|error| TransformError::hook("map_hydration_id", error))?;
            let entry = batches.entry((
                slot.instruction,
                self.batch_key(instruction, &parents[slot.parent]),
            ));
            mapped[index].batch = entry.index();
            let (_, batch) = entry.or_insert_with(|| (slot.parent, IndexMap::new()));
            for id in ids {
                let key = id_key(&id);
                mapped[index].keys.push(key.clone());
                batch.entry(key).or_insert(id);
            }
        }

        for (batch_index, ((instruction_index, _), (parent, ids))) in batches.into_iter().enumerate() {
            let instruction = &self.state.instructions[instruction_index];
            let batch_size = instruction.strategy.batch_size().unwrap_or(default_batch_size).get();
            let ids: Vec<Value> = ids.into_values().collect();
            for chunk in ids.chunks(batch_size) {
                let partitions = hooks
                    .partition_argument_list(instruction, chunk.to_vec())
                    .await
                    .map_err(|error| TransformError::hook("partition_argument_list", error))?;
                calls.extend(
                    partitions
                        .into_iter()
                        .filter(|ids| !ids.is_empty())
                        .map(|ids| CallPlan::Batch {
                            batch: batch_index,
                            instruction: instruction_index,
                            parent,
                            ids,
                        }),
                );
            }
        }
        Ok((calls, mapped))
    }

    /// The values of the `$source` arguments of `instruction` other than the ids.
    fn batch_key(&self, instruction: &HydrationInstruction, parent: &JsonNode) -> String {
        let ids = instruction.batch_argument().map(|argument| argument.name.as_str());
        let values = instruction
            .arguments
            .iter()
            .filter(|argument| Some(argument.name.as_str()) != ids)
            .filter_map(|argument| match &argument.source {
                ValueSource::Source(path) => Some(self.source_value(parent, path)),
                _ => None,
            })
            .collect();
        id_key(&Value::Array(values))
    }

    async fn execute(
        &self,
        parents: &[JsonNode],
        slots: &[Slot],
        (calls, mapped): (Vec<CallPlan>, Vec<BatchedIds>),
    ) -> (Vec<Option<SlotValue>>, Vec<graphql::Error>) {
        let execution = self.context.transform.execution;
        let key = self.field.result_key();
        let slot_path = |slot: &Slot| {
            let path = parents[slot.parent].path.child(key);
            match slot.index {
                Some(index) => path.child(index),
                None => path,
            }
        };

        let total: usize = calls
            .iter()
            .map(|call| match call {
                CallPlan::Single { .. } => 1,
                CallPlan::Batch { ids, .. } => ids.len(),
            })
            .sum();

        let mut values: Vec<Option<SlotValue>> = (0..slots.len()).map(|_| None).collect();
        let mut errors = Vec::new();
        let mut pending: Vec<BoxFuture<'_, ServiceCallResult>> = Vec::new();
        for call in &calls {
            let (instruction_index, arguments, count) = match call {
                CallPlan::Single { slot } => {
                    let slot = &slots[*slot];
                    let arguments = self.arguments(
                        slot.instruction,
                        &parents[slot.parent],
                        slot.id.clone(),
                    );
                    (slot.instruction, arguments, 1)
                }
                CallPlan::Batch {
                    instruction,
                    parent,
                    ids,
                    ..
                } => {
                    let arguments = self.arguments(*instruction, &parents[*parent], Value::Array(ids.clone()));
                    (*instruction, arguments, ids.len())
                }
            };
            let instruction = &self.state.instructions[instruction_index];
            match self.backing_call(instruction, arguments, count, total) {
                Ok(service_call) => pending.push(execute_service_call(execution, service_call)),
                Err(error) => {
                    let path = match call {
                        CallPlan::Single { slot } => Some(slot_path(&slots[*slot])),
                        CallPlan::Batch { .. } => None,
                    };
                    errors.push(error.to_graphql_error(path));
                    pending.push(Box::pin(futures::future::ready(ServiceCallResult::default())));
                }
            }
        }

        let results = join_all(pending).await;

        let mut matched: IndexMap<(usize, String), Value> = IndexMap::new();
        for (call, result) in calls.iter().zip(results) {
            let ServiceCallResult { data, errors: call_errors } = result;
            let instruction = match call {
                CallPlan::Single { slot } => &self.state.instructions[slots[*slot].instruction],
                CallPlan::Batch { instruction, .. } => &self.state.instructions[*instruction],
            };
            let value = data
                .as_object()
                .and_then(|object| object.get(instruction.backing_field.as_str()))
                .cloned()
                .unwrap_or_default();
            match call {
                CallPlan::Single { slot } => {
                    let base = slot_path(&slots[*slot]);
                    errors.extend(call_errors.into_iter().map(|error| reroot(error, &base)));
                    values[*slot] = Some(SlotValue::One(value));
                }
                CallPlan::Batch { batch, ids, .. } => {
                    errors.extend(call_errors.into_iter().map(|error| error.with_path(None)));
                    let objects = match value {
                        Value::Array(objects) => objects,
                        _ => Vec::new(),
                    };
                    match &instruction.strategy {
                        HydrationStrategy::IndexBased { .. } => {
                            for (id, object) in ids.iter().zip(objects) {
                                matched.insert((*batch, id_key(id)), object);
                            }
                        }
                        HydrationStrategy::Batched { identified_by, .. } => {
                            let alias = self.identity_alias(identified_by);
                            for object in objects {
                                let Some(id) = object.as_object().and_then(|o| o.get(alias.as_str()))
                                else {
                                    continue;
                                };
                                matched.insert((*batch, id_key(id)), object.clone());
                            }
                        }
                        HydrationStrategy::Single => {}
                    }
                }
            }
        }

        for (value, ids) in values.iter_mut().zip(&mapped) {
            if value.is_some() {
                continue;
            }
            let lookup = |key: &String| matched.get(&(ids.batch, key.clone())).cloned().unwrap_or_default();
            *value = Some(match ids.keys.as_slice() {
                [] => SlotValue::One(Value::Null),
                [single] => SlotValue::One(lookup(single)),
                many => SlotValue::Many(many.iter().map(lookup).collect()),
            });
        }
        (values, errors)
    }

    fn identity_alias(&self, identified_by: &str) -> String {
        self.context
            .aliases()
            .batch_identity(self.field.result_key(), identified_by)
    }

    /// The arguments of the backing field, `primary` standing for the value of the source argument.
    fn arguments(
        &self,
        instruction: usize,
        parent: &JsonNode,
        primary: Value,
    ) -> IndexMap<String, NormalizedValue> {
        let instruction = &self.state.instructions[instruction];
        let primary_name = instruction.batch_argument().map(|argument| argument.name.as_str());
        let mut arguments = IndexMap::new();
        for argument in &instruction.arguments {
            let value = match &argument.source {
                ValueSource::Source(_) if primary_name == Some(argument.name.as_str()) => {
                    NormalizedValue::from_json(&primary)
                }
                ValueSource::Source(path) => NormalizedValue::from_json(&self.source_value(parent, path)),
                ValueSource::Argument(name) => match self.field.arguments.get(name) {
                    Some(value) => value.clone(),
                    None => continue,
                },
                ValueSource::Literal(value) => NormalizedValue::from_json(value),
            };
            arguments.insert(argument.name.clone(), value);
        }
        arguments
    }

    /// The call to the backing field of `instruction`.
    fn backing_call(
        &self,
        instruction: &HydrationInstruction,
        arguments: IndexMap<String, NormalizedValue>,
        count: usize,
        total: usize,
    ) -> Result<ServiceCall, FetchError> {
        let context = self.context;
        let blueprint = context.blueprint();
        let schema = blueprint.schema();
        let root_type = blueprint.root_type_name(OperationKind::Query);
        let missing = || FetchError::MissingBackingField {
            field: instruction.backing_field.clone(),
            service: instruction.service.clone(),
        };
        if blueprint.root_field_owner(&root_type, &instruction.backing_field)
            != Some(instruction.service.as_str())
        {
            return Err(missing());
        }
        let definition = schema
            .type_field(&root_type, &instruction.backing_field)
            .map_err(|_| missing())?;
        let output_types = possible_types(schema, definition.ty.inner_named_type().as_str());

        let mut root = NormalizedField::new(vec![root_type.clone()], instruction.backing_field.as_str());
        root.arguments = arguments
            .into_iter()
            .map(|(name, value)| {
                let is_enum = definition.argument_by_name(&name).map_or(false, |argument| {
                    matches!(
                        schema.types.get(argument.ty.inner_named_type()),
                        Some(ExtendedType::Enum(_))
                    )
                });
                (name, if is_enum { value.into_enum() } else { value })
            })
            .collect();

        let mut tree = FieldTree::new();
        let root_id = tree.push(None, root);
        self.copy_selection(&mut tree, root_id, &output_types);

        let virtual_output = output_type_name(schema, &instruction.virtual_type, &instruction.virtual_field);
        if virtual_output.map_or(false, |output| is_abstract(schema, &output)) {
            let mut typename = NormalizedField::new(output_types.iter().cloned().collect(), TYPENAME);
            typename.alias = Some(context.aliases().typename());
            tree.push(Some(root_id), typename);
        }
        if let HydrationStrategy::Batched { identified_by, .. } = &instruction.strategy {
            let mut identity = NormalizedField::new(output_types.iter().cloned().collect(), identified_by.as_str());
            identity.alias = Some(self.identity_alias(identified_by));
            tree.push(Some(root_id), identity);
        }

        let details = HydrationDetails {
            hydration_source_service: context.service().name().to_string(),
            hydration_backing_field: format!("{root_type}.{}", instruction.backing_field),
            hydration_virtual_field: format!("{}.{}", instruction.virtual_type, instruction.virtual_field),
            field_path: context.tree().query_path(context.field()).to_string(),
            batch_size: instruction.strategy.is_batched().then(|| {
                instruction
                    .strategy
                    .batch_size()
                    .unwrap_or(context.transform.execution.configuration.default_batch_size)
                    .get()
            }),
            count_of_objects_to_be_hydrated: count,
            total_objects_to_be_hydrated: total,
        };

        Ok(ServiceCall {
            service: instruction.service.clone(),
            kind: OperationKind::Query,
            tree: Arc::new(tree),
            root: root_id,
            hydration_details: Some(details),
            depth: context.hydration_depth() + 1,
        })
    }

    /// Copies the selection of the hydrated field below the backing field, keeping what applies to
    /// the types the backing field returns.
    fn copy_selection(
        &self,
        tree: &mut FieldTree,
        root: FieldId,
        output_types: &indexmap::IndexSet<String>,
    ) {
        let source = self.context.tree();
        for (child_id, child) in source.children(self.context.field()) {
            let object_types: Vec<String> = child
                .object_type_names
                .iter()
                .filter(|ty| output_types.contains(ty.as_str()))
                .cloned()
                .collect();
            if object_types.is_empty() {
                continue;
            }
            let mut copied = child.clone();
            copied.object_type_names = object_types;
            let copied = tree.push(Some(root), copied);
            for grandchild in &source.get(child_id).children {
                tree.copy_subtree(source, *grandchild, Some(copied));
            }
        }
    }
}

/// Reads `path` below `value`, mapping over lists.
fn extract(value: &Value, path: &[String]) -> Value {
    match (path.split_first(), value) {
        (None, value) => value.clone(),
        (Some(_), Value::Array(items)) => Value::Array(items.iter().map(|item| extract(item, path)).collect()),
        (Some((head, rest)), Value::Object(object)) => object
            .get(head.as_str())
            .map_or(Value::Null, |value| extract(value, rest)),
        _ => Value::Null,
    }
}

/// Hydration ids are compared by their JSON text, strings by their content.
fn id_key(id: &Value) -> String {
    match id {
        Value::String(id) => id.as_str().to_string(),
        other => serde_json_bytes::to_string(other).unwrap_or_default(),
    }
}

/// Places the errors of a single backing call below the hydrated field.
fn reroot(error: graphql::Error, base: &Path) -> graphql::Error {
    let path = match &error.path {
        Some(path) => base.join(path.iter().skip(1).cloned().collect::<Path>()),
        None => base.clone(),
    };
    error.with_path(Some(path))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn test_extract_maps_over_lists() {
        let value = json!([{"id": "1"}, {"id": null}, {"other": 1}]);
        assert_eq!(
            extract(&value, &["id".to_string()]),
            json!(["1", null, null])
        );
        assert_eq!(extract(&json!("x"), &[]), json!("x"));
    }

    #[test]
    fn test_id_keys() {
        assert_eq!(id_key(&json!("ari:1")), "ari:1");
        assert_eq!(id_key(&json!(1)), "1");
        assert_eq!(id_key(&json!({"site": "a"})), r#"{"site":"a"}"#);
    }

    #[test]
    fn test_reroot_replaces_the_backing_field() {
        let error = graphql::Error::builder()
            .message("not found")
            .path(Path::from("userById/name"))
            .build();
        let error = reroot(error, &Path::from("issue/assignee"));
        assert_eq!(error.path, Some(Path::from("issue/assignee/name")));
    }
}
