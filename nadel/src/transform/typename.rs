use crate::blueprint::ServiceDefinition;
use crate::json_ext::Value;
use crate::normalized::FieldTree;
use crate::result::JsonNodes;
use crate::result::ResultInstructions;

/// Rewrites every `__typename` of a service result, artificial or not, into overall type names.
pub(crate) fn typename_instructions(
    service: &ServiceDefinition,
    tree: &FieldTree,
    nodes: &JsonNodes,
) -> ResultInstructions {
    let mut instructions = ResultInstructions::new();
    for id in tree.walk() {
        let field = tree.get(id);
        if !field.is_typename() {
            continue;
        }
        let Some(parent_path) = tree.query_path(id).parent() else {
            continue;
        };
        let key = field.result_key();
        for parent in nodes.get_nodes(&parent_path).iter() {
            let Some(underlying) = parent.value.as_object().and_then(|o| o.get(key)).and_then(Value::as_str)
            else {
                continue;
            };
            let overall = service.overall_type_name(underlying);
            if overall != underlying {
                instructions.set(parent.path.child(key), Value::String(overall.into()));
            }
        }
    }
    instructions
}
