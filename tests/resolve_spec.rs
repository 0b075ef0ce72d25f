use contextkb::db::Database;
use contextkb::engine::Session;
use contextkb::error::KbError;
use contextkb::models::*;
use speculate2::speculate;

fn open_session(db: &Database) -> Session {
    let mut session = Session::new(db.clone()).expect("Failed to create session");
    session
        .open(SessionOpenInput {
            user: "alice".to_string(),
            session_id: None,
        })
        .expect("Failed to open session");
    session
}

fn new_context(session: &mut Session, prefix: &str, search_path: &[&str]) {
    session
        .new_context(CreateContextInput {
            prefix: prefix.to_string(),
            search_path: Some(search_path.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        })
        .expect("Failed to create context");
}

fn new_concept(session: &mut Session, term: &str) -> Pid {
    session
        .new_concept(CreateConceptInput {
            term: term.to_string(),
            ..Default::default()
        })
        .expect("Failed to create concept")
}

fn new_instance(session: &mut Session, class: &str, name: &str) -> Pid {
    session
        .new_instance(CreateInstanceInput {
            class: class.to_string(),
            name: name.to_string(),
            extras: Default::default(),
            mutability: None,
        })
        .expect("Failed to create instance")
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
        db.initialise_site("local", false).expect("Failed to initialise site");
        let mut session = open_session(&db);
        session.enter(ROOT_CONTEXT, AccessMode::Write).unwrap();
    }

    describe "identifier forms" {
        before {
            new_context(&mut session, "lab", &[ROOT_CONTEXT]);
            session.enter("lab", AccessMode::Write).unwrap();
            let sensor = new_concept(&mut session, "Sensor");
            let temp1 = new_instance(&mut session, "Sensor", "temp1");
        }

        it "mints markers in creation order" {
            assert_eq!(sensor.to_string(), "local:lab:1:Sensor");
            assert_eq!(temp1.to_string(), "local:lab:2:temp1");
        }

        it "resolves a full PID to itself" {
            for pid in [&sensor, &temp1] {
                let resolved = session.resolve(&pid.to_string(), None, KindFilter::Both).unwrap();
                assert_eq!(&resolved.pid, pid);
            }
        }

        it "resolves a version-qualified identifier" {
            let resolved = session.resolve("lab:2:temp1", None, KindFilter::Both).unwrap();
            assert_eq!(resolved, Resolved::instance(temp1.clone()));
            assert!(session.resolve("lab:1:temp1", None, KindFilter::Both).is_err());
        }

        it "resolves a context-qualified identifier without traversal" {
            new_context(&mut session, "other", &[]);
            let resolved = session.resolve("lab:temp1", Some("other"), KindFilter::Instance).unwrap();
            assert_eq!(resolved.pid, temp1);
        }

        it "respects the kind filter" {
            let err = session.resolve("Sensor", None, KindFilter::Instance).unwrap_err();
            assert!(matches!(err, KbError::InstanceNotFound(_)));
            let err = session.resolve("temp1", None, KindFilter::Concept).unwrap_err();
            assert!(matches!(err, KbError::ConceptNotFound(_)));
        }

        it "treats five or more segments as a name that never matches" {
            let err = session.resolve("local:lab:1:Sensor:x", None, KindFilter::Both).unwrap_err();
            assert!(err.is_not_found());
        }

        it "fails on an unknown context qualifier" {
            let err = session.resolve("attic:temp1", None, KindFilter::Both).unwrap_err();
            assert!(matches!(err, KbError::ContextNotFound(p) if p == "attic"));
        }
    }

    describe "search paths" {
        it "finds names defined along the search path" {
            new_context(&mut session, "base", &[ROOT_CONTEXT]);
            session.enter("base", AccessMode::Write).unwrap();
            let device = new_concept(&mut session, "Device");

            session.enter(ROOT_CONTEXT, AccessMode::Write).unwrap();
            new_context(&mut session, "lab", &["base"]);
            let resolved = session.resolve("Device", Some("lab"), KindFilter::Concept).unwrap();
            assert_eq!(resolved.pid, device);
        }

        it "prefers the nearest context breadth-first" {
            new_context(&mut session, "far", &[]);
            session.enter("far", AccessMode::Write).unwrap();
            new_concept(&mut session, "Device");

            session.enter(ROOT_CONTEXT, AccessMode::Write).unwrap();
            new_context(&mut session, "middle", &["far"]);
            new_context(&mut session, "near", &[]);
            session.enter("near", AccessMode::Write).unwrap();
            let near_device = new_concept(&mut session, "Device");

            session.enter(ROOT_CONTEXT, AccessMode::Write).unwrap();
            new_context(&mut session, "lab", &["middle", "near"]);
            let resolved = session.resolve("Device", Some("lab"), KindFilter::Concept).unwrap();
            assert_eq!(resolved.pid, near_device);
        }

        it "terminates on cyclic search paths" {
            new_context(&mut session, "a", &[]);
            new_context(&mut session, "b", &["a"]);
            session.enter("a", AccessMode::Write).unwrap();
            session.set_search_path(vec!["b".to_string()]).unwrap();

            let err = session.resolve("Ghost", Some("a"), KindFilter::Both).unwrap_err();
            assert!(matches!(err, KbError::InstanceNotFound(_)));
        }

        it "finds the root concept through kb" {
            new_context(&mut session, "lab", &[ROOT_CONTEXT]);
            let resolved = session.resolve(ROOT_CONCEPT, Some("lab"), KindFilter::Concept).unwrap();
            assert_eq!(resolved.pid.to_string(), "local:kb:0:Concept");
        }

        it "finds the root concept even from an isolated context" {
            new_context(&mut session, "island", &[]);
            let resolved = session.resolve(ROOT_CONCEPT, Some("island"), KindFilter::Concept).unwrap();
            assert_eq!(resolved.kind, EntryKind::Concept);
        }

        it "skips search-path entries whose context was reset" {
            new_context(&mut session, "gone", &[]);
            new_context(&mut session, "kept", &[]);
            session.enter("kept", AccessMode::Write).unwrap();
            let widget = new_concept(&mut session, "Widget");

            session.enter(ROOT_CONTEXT, AccessMode::Write).unwrap();
            new_context(&mut session, "lab", &["gone", "kept"]);
            session.enter("gone", AccessMode::Write).unwrap();
            session.reset_context().unwrap();

            let resolved = session.resolve("Widget", Some("lab"), KindFilter::Concept).unwrap();
            assert_eq!(resolved.pid, widget);
        }

        it "resolves a bare instance name through the search path" {
            new_context(&mut session, "base", &[]);
            session.enter("base", AccessMode::Write).unwrap();
            new_concept(&mut session, "Device");
            let gauge = new_instance(&mut session, "Device", "gauge");

            session.enter(ROOT_CONTEXT, AccessMode::Write).unwrap();
            new_context(&mut session, "lab", &["base"]);
            let resolved = session.resolve("gauge", Some("lab"), KindFilter::Instance).unwrap();
            assert_eq!(resolved, Resolved::instance(gauge.clone()));
            let resolved = session.resolve("gauge", Some("lab"), KindFilter::Both).unwrap();
            assert_eq!(resolved, Resolved::instance(gauge));
        }

        it "takes the nearest context when kinds differ between contexts" {
            new_context(&mut session, "things", &[]);
            session.enter("things", AccessMode::Write).unwrap();
            new_concept(&mut session, "Device");
            let meter_instance = new_instance(&mut session, "Device", "Meter");

            session.enter(ROOT_CONTEXT, AccessMode::Write).unwrap();
            new_context(&mut session, "types", &[]);
            session.enter("types", AccessMode::Write).unwrap();
            let meter_concept = new_concept(&mut session, "Meter");

            session.enter(ROOT_CONTEXT, AccessMode::Write).unwrap();
            new_context(&mut session, "typesfirst", &["types", "things"]);
            new_context(&mut session, "thingsfirst", &["things", "types"]);

            let resolved = session.resolve("Meter", Some("typesfirst"), KindFilter::Both).unwrap();
            assert_eq!(resolved.kind, EntryKind::Concept);
            assert_eq!(resolved.pid, meter_concept);

            let resolved = session.resolve("Meter", Some("thingsfirst"), KindFilter::Both).unwrap();
            assert_eq!(resolved.kind, EntryKind::Instance);
            assert_eq!(resolved.pid, meter_instance);

            let resolved = session.resolve("Meter", Some("thingsfirst"), KindFilter::Concept).unwrap();
            assert_eq!(resolved.pid, meter_concept);
        }

        it "checks concepts before instances within one context" {
            new_context(&mut session, "lab", &[]);
            session.enter("lab", AccessMode::Write).unwrap();
            let meter_concept = new_concept(&mut session, "Meter");
            let meter_instance = new_instance(&mut session, "Meter", "Meter");

            let resolved = session.resolve("Meter", Some("lab"), KindFilter::Both).unwrap();
            assert_eq!(resolved, Resolved::concept(meter_concept));
            let resolved = session.resolve("Meter", Some("lab"), KindFilter::Instance).unwrap();
            assert_eq!(resolved, Resolved::instance(meter_instance));
        }

        it "fails when the base context does not exist" {
            let err = session.resolve("Device", Some("attic"), KindFilter::Both).unwrap_err();
            assert!(matches!(err, KbError::ContextNotFound(_)));
        }

        it "needs a base for bare names" {
            session.leave().unwrap();
            let err = session.resolve("Device", None, KindFilter::Both).unwrap_err();
            assert!(matches!(err, KbError::NoContextSet(_)));
        }
    }
}
