use std::fmt::Write;

use apollo_compiler::Schema;
use indexmap::IndexMap;

use super::normalizer::output_type_name;
use super::normalizer::possible_types;
use super::FieldId;
use super::FieldTree;
use super::OperationKind;

/// Prints `tree` as an operation against `schema`.
///
/// Children that do not apply to every possible type of their parent are printed inside inline
/// fragments, one per object type.
pub(crate) fn print_operation(
    kind: OperationKind,
    operation_name: Option<&str>,
    tree: &FieldTree,
    schema: &Schema,
) -> String {
    let root_type = schema
        .root_operation(kind.to_operation_type())
        .map(|name| name.to_string())
        .unwrap_or_else(|| match kind {
            OperationKind::Query => "Query".to_string(),
            OperationKind::Mutation => "Mutation".to_string(),
            OperationKind::Subscription => "Subscription".to_string(),
        });

    let mut out = String::new();
    out.push_str(kind.as_str());
    if let Some(name) = operation_name {
        out.push(' ');
        out.push_str(name);
    }
    out.push(' ');
    print_selection_set(&mut out, tree, tree.roots(), &root_type, schema, 0);
    out
}

fn print_selection_set(
    out: &mut String,
    tree: &FieldTree,
    children: &[FieldId],
    parent_type: &str,
    schema: &Schema,
    depth: usize,
) {
    let possible = possible_types(schema, parent_type);
    let mut direct = Vec::new();
    let mut by_type: IndexMap<&str, Vec<FieldId>> = IndexMap::new();
    for child in children {
        let field = tree.get(*child);
        let covers_parent = !possible.is_empty()
            && possible
                .iter()
                .all(|ty| field.object_type_names.iter().any(|name| name == ty));
        if covers_parent || possible.is_empty() {
            direct.push(*child);
        } else {
            for ty in &field.object_type_names {
                by_type.entry(ty.as_str()).or_default().push(*child);
            }
        }
    }

    out.push_str("{\n");
    for child in direct {
        print_field(out, tree, child, schema, depth + 1);
    }
    for (ty, fields) in by_type {
        indent(out, depth + 1);
        let _ = write!(out, "... on {ty} ");
        print_fields_block(out, tree, &fields, schema, depth + 1);
    }
    indent(out, depth);
    out.push_str("}\n");
}

fn print_fields_block(
    out: &mut String,
    tree: &FieldTree,
    fields: &[FieldId],
    schema: &Schema,
    depth: usize,
) {
    out.push_str("{\n");
    for field in fields {
        print_field(out, tree, *field, schema, depth + 1);
    }
    indent(out, depth);
    out.push_str("}\n");
}

fn print_field(out: &mut String, tree: &FieldTree, id: FieldId, schema: &Schema, depth: usize) {
    let field = tree.get(id);
    indent(out, depth);
    if let Some(alias) = &field.alias {
        let _ = write!(out, "{alias}: ");
    }
    out.push_str(&field.field_name);
    if !field.arguments.is_empty() {
        out.push('(');
        for (index, (name, value)) in field.arguments.iter().enumerate() {
            if index != 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{name}: {value}");
        }
        out.push(')');
    }
    if field.children.is_empty() {
        out.push('\n');
        return;
    }
    out.push(' ');
    let output_type = field
        .object_type_names
        .first()
        .and_then(|ty| output_type_name(schema, ty, &field.field_name))
        .unwrap_or_default();
    print_selection_set(out, tree, &field.children, &output_type, schema, depth);
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;
    use insta::assert_snapshot;

    use super::*;
    use crate::normalized::NormalizedField;
    use crate::normalized::NormalizedValue;

    #[test]
    fn test_print_with_fragments_and_aliases() {
        let schema = Schema::parse_and_validate(
            r#"
            type Query { node(id: ID!): Node }
            interface Node { id: ID! }
            type Issue implements Node { id: ID! key: String }
            type User implements Node { id: ID! fullName: String }
            "#,
            "schema.graphql",
        )
        .unwrap();

        let mut tree = FieldTree::new();
        let mut node = NormalizedField::new(vec!["Query".into()], "node");
        node.arguments
            .insert("id".into(), NormalizedValue::String("1".into()));
        let node = tree.push(None, node);
        tree.push(
            Some(node),
            NormalizedField::new(vec!["Issue".into(), "User".into()], "id"),
        );
        tree.push(Some(node), NormalizedField::new(vec!["Issue".into()], "key"));
        let mut name = NormalizedField::new(vec!["User".into()], "fullName");
        name.alias = Some("rename__name__User__fullName".into());
        tree.push(Some(node), name);

        assert_snapshot!(print_operation(OperationKind::Query, Some("GetNode"), &tree, &schema), @r###"
        query GetNode {
          node(id: "1") {
            id
            ... on Issue {
              key
            }
            ... on User {
              rename__name__User__fullName: fullName
            }
          }
        }
        "###);
    }
}
