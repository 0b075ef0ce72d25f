//! MCP server integration tests, driving the tool logic in-process.

use contextkb::db::Database;
use contextkb::engine::Session;
use contextkb::mcp::*;
use contextkb::models::*;
use serde_json::json;

/// A store with a `lab` context holding `Sensor` and `temp1`.
fn seeded_db() -> Database {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    db.initialise_site("local", false).expect("Failed to initialise");

    let mut session = Session::new(db.clone()).expect("Failed to create session");
    session
        .open(SessionOpenInput {
            user: "curator".into(),
            session_id: None,
        })
        .unwrap();
    session.enter(ROOT_CONTEXT, AccessMode::Write).unwrap();
    session
        .new_context(CreateContextInput {
            prefix: "lab".into(),
            ..Default::default()
        })
        .unwrap();
    session.enter("lab", AccessMode::Write).unwrap();
    session
        .new_concept(CreateConceptInput {
            term: "Sensor".into(),
            optional: [("unit".to_string(), "String".to_string())].into(),
            ..Default::default()
        })
        .unwrap();
    session
        .new_instance(CreateInstanceInput {
            class: "Sensor".into(),
            name: "temp1".into(),
            extras: json!({ "unit": "celsius" }).as_object().cloned().unwrap(),
            mutability: None,
        })
        .unwrap();
    session.leave().unwrap();
    session.close().unwrap();
    db
}

fn setup() -> McpServer {
    McpServer::new(seeded_db(), "agent").expect("Failed to start MCP server")
}

mod resolve {
    use super::*;

    #[test]
    fn bare_name_needs_a_current_context() {
        let server = setup();
        let err = server
            .handle_resolve(ResolveRequest {
                identity: "Sensor".into(),
                base: None,
                kind: None,
            })
            .unwrap_err();
        assert_eq!(err.data.unwrap()["code"], "NoContextSet");
    }

    #[test]
    fn bare_name_resolves_from_an_explicit_base() {
        let server = setup();
        let resolved = server
            .handle_resolve(ResolveRequest {
                identity: "Sensor".into(),
                base: Some("lab".into()),
                kind: Some("concept".into()),
            })
            .unwrap();
        assert_eq!(resolved.pid.to_string(), "local:lab:1:Sensor");
        assert_eq!(resolved.kind, EntryKind::Concept);
    }

    #[test]
    fn rejects_unknown_kind() {
        let server = setup();
        let err = server
            .handle_resolve(ResolveRequest {
                identity: "lab:Sensor".into(),
                base: None,
                kind: Some("everything".into()),
            })
            .unwrap_err();
        assert!(err.message.contains("Invalid kind"));
    }
}

mod entries {
    use super::*;

    #[test]
    fn get_entry_returns_instance_with_extras() {
        let server = setup();
        let entry = server
            .handle_get_entry(GetEntryRequest {
                identity: "lab:temp1".into(),
            })
            .unwrap();
        let Entry::Instance(instance) = entry else {
            panic!("expected an instance");
        };
        assert_eq!(instance.class.to_string(), "local:lab:1:Sensor");
        assert_eq!(instance.extras["unit"], "celsius");
    }

    #[test]
    fn find_instances_by_class_and_field() {
        let server = setup();
        let found = server
            .handle_find_instances(FindInstancesRequest {
                query: json!({ "and": [
                    { "isa": "lab:Sensor" },
                    { "equals": { "field": "unit", "value": "celsius" } }
                ]}),
                pid_only: true,
                only_these: None,
            })
            .unwrap();
        assert_eq!(
            found,
            FindOutput::Pids(vec![Pid::new("local", "lab", 2, "temp1")])
        );
    }

    #[test]
    fn malformed_query_is_invalid_params() {
        let server = setup();
        let err = server
            .handle_find_instances(FindInstancesRequest {
                query: json!({ "near": "lab:Sensor" }),
                pid_only: false,
                only_these: None,
            })
            .unwrap_err();
        assert!(err.message.starts_with("Invalid query"));
    }
}

mod contexts {
    use super::*;

    #[test]
    fn status_lists_every_context() {
        let server = setup();
        let status = server.handle_kb_status().unwrap();
        assert_eq!(status.username, "agent");
        assert_eq!(status.contexts_available, vec!["kb", "lab"]);
        assert!(status.current_context.is_none());
    }

    #[test]
    fn enter_context_makes_bare_names_resolve() {
        let server = setup();
        let status = server
            .handle_enter_context(EnterContextRequest {
                prefix: "lab".into(),
                mode: "R".into(),
            })
            .unwrap();
        assert_eq!(status.mode, Some(AccessMode::Read));
        assert_eq!(status.concepts.keys().collect::<Vec<_>>(), vec!["Sensor"]);

        let resolved = server
            .handle_resolve(ResolveRequest {
                identity: "temp1".into(),
                base: None,
                kind: None,
            })
            .unwrap();
        assert_eq!(resolved.kind, EntryKind::Instance);
    }

    #[test]
    fn context_status_of_missing_context() {
        let server = setup();
        let err = server
            .handle_context_status(ContextStatusRequest {
                prefix: Some("attic".into()),
            })
            .unwrap_err();
        assert_eq!(err.data.unwrap()["code"], "ContextNotFound");
    }

    #[test]
    fn enter_context_rejects_unknown_mode() {
        let server = setup();
        let err = server
            .handle_enter_context(EnterContextRequest {
                prefix: "lab".into(),
                mode: "admin".into(),
            })
            .unwrap_err();
        assert!(err.message.contains("Invalid mode"));
    }
}
