#![allow(dead_code)]

use nadel::blueprint::ServiceSchema;
use nadel::graphql;
use nadel::ExecutionBlueprint;

pub const ISSUES: &str = r#"
    type Query {
        issueById(id: ID!): Issue
        issues: [Issue]
    }
    type Issue {
        id: ID!
        key: String @renamed(from: "issueKey")
        assigneeId: ID @hidden
        assignee: User @hydrated(
            field: "userById"
            arguments: [{name: "id", value: "$source.assigneeId"}]
        )
        watcherIds: [ID] @hidden
        watchers: [User] @hydrated(
            field: "usersByIds"
            identifiedBy: "id"
            batchSize: 2
            arguments: [{name: "ids", value: "$source.watcherIds"}]
        )
    }
"#;

pub const ISSUES_UNDERLYING: &str = r#"
    type Query { issueById(id: ID!): Issue issues: [Issue] }
    type Issue { id: ID! issueKey: String assigneeId: ID watcherIds: [ID] }
"#;

pub const IDENTITY: &str = r#"
    type Query {
        me: User
        userById(id: ID!): User @hidden
        usersByIds(ids: [ID!]!): [User] @hidden
    }
    type User @renamed(from: "Account") {
        id: ID!
        name: String
    }
"#;

pub const IDENTITY_UNDERLYING: &str = r#"
    type Query { me: Account userById(id: ID!): Account usersByIds(ids: [ID!]!): [Account] }
    type Account { id: ID! name: String }
"#;

/// Issues hydrating their assignee and watchers from the identity service.
pub fn issues_blueprint() -> ExecutionBlueprint {
    ExecutionBlueprint::builder()
        .service(ServiceSchema::new("issues", ISSUES, ISSUES_UNDERLYING))
        .service(ServiceSchema::new("identity", IDENTITY, IDENTITY_UNDERLYING))
        .build()
        .unwrap()
}

pub fn request(query: &str) -> graphql::Request {
    graphql::Request::builder().query(query).build()
}

/// The query with its whitespace collapsed.
pub fn squash(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}
