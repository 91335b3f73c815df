use proptest::prelude::*;
use std::collections::BTreeSet;
use tagnest_core::db::{open_db, open_db_in_memory};
use tagnest_core::{
    CycleReason, EngineConfig, EngineError, EntityRef, GroupId, MissingEntity,
    SqliteWorkspaceRepository, WorkspaceEngine,
};
use uuid::Uuid;

type Engine = WorkspaceEngine<SqliteWorkspaceRepository>;

fn setup() -> (Engine, Uuid) {
    let repo = SqliteWorkspaceRepository::try_new(open_db_in_memory().unwrap()).unwrap();
    let ws = Uuid::new_v4();
    (Engine::open(ws, repo, EngineConfig::default()).unwrap(), ws)
}

fn tag(name: &str) -> EntityRef {
    EntityRef::Tag(name.to_string())
}

#[test]
fn mutual_nesting_is_rejected_and_only_first_edge_exists() {
    let (engine, ws) = setup();
    let engineering = engine.create_group(ws, "engineering", &[]).unwrap();
    let backend = engine.create_group(ws, "backend", &[]).unwrap();

    assert!(engine
        .propose_membership(ws, engineering, EntityRef::Group(backend))
        .unwrap());
    let err = engine
        .propose_membership(ws, backend, EntityRef::Group(engineering))
        .unwrap_err();
    match err {
        EngineError::CycleRejected {
            parent,
            member,
            reason: CycleReason::Cycle { path },
        } => {
            assert_eq!(parent, backend);
            assert_eq!(member, engineering);
            assert_eq!(path, vec![engineering, backend]);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(
        engine.get_group(ws, engineering).unwrap().members,
        BTreeSet::from([EntityRef::Group(backend)])
    );
    assert!(engine.get_group(ws, backend).unwrap().members.is_empty());
    assert_eq!(
        engine.parents_of(ws, backend).unwrap(),
        BTreeSet::from([engineering])
    );
}

#[test]
fn long_cycle_is_rejected() {
    let (engine, ws) = setup();
    let ids: Vec<GroupId> = (0..5)
        .map(|index| engine.create_group(ws, &format!("g{index}"), &[]).unwrap())
        .collect();
    for pair in ids.windows(2) {
        engine
            .propose_membership(ws, pair[0], EntityRef::Group(pair[1]))
            .unwrap();
    }

    let err = engine
        .propose_membership(ws, ids[4], EntityRef::Group(ids[0]))
        .unwrap_err();
    assert!(matches!(err, EngineError::CycleRejected { .. }));
    assert!(engine.get_group(ws, ids[4]).unwrap().members.is_empty());
}

#[test]
fn batch_with_one_cycle_commits_nothing() {
    let (engine, ws) = setup();
    let top = engine.create_group(ws, "top", &[]).unwrap();
    let child = engine.create_group(ws, "child", &[]).unwrap();
    let free = engine.create_group(ws, "free", &[]).unwrap();
    engine
        .propose_membership(ws, top, EntityRef::Group(child))
        .unwrap();

    let err = engine
        .propose_memberships(
            ws,
            child,
            &[tag("rust"), EntityRef::Group(free), EntityRef::Group(top)],
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::CycleRejected { .. }));
    assert!(engine.get_group(ws, child).unwrap().members.is_empty());

    let added = engine
        .propose_memberships(ws, child, &[tag("Rust"), EntityRef::Group(free), tag("rust")])
        .unwrap();
    assert_eq!(added.len(), 2);
}

#[test]
fn blank_tag_and_missing_group_members_are_rejected() {
    let (engine, ws) = setup();
    let group = engine.create_group(ws, "g", &[]).unwrap();

    assert!(matches!(
        engine.propose_membership(ws, group, tag("   ")),
        Err(EngineError::InvalidTag(_))
    ));
    let missing = Uuid::new_v4();
    assert!(matches!(
        engine.propose_membership(ws, group, EntityRef::Group(missing)),
        Err(EngineError::NotFound(MissingEntity::Group(id))) if id == missing
    ));
    assert!(matches!(
        engine.create_group(ws, "h", &[EntityRef::Group(missing)]),
        Err(EngineError::NotFound(_))
    ));
}

#[test]
fn delete_group_is_shallow() {
    let (engine, ws) = setup();
    let leaf = engine.create_group(ws, "leaf", &[tag("x")]).unwrap();
    let middle = engine
        .create_group(ws, "middle", &[EntityRef::Group(leaf), tag("y")])
        .unwrap();
    let top = engine
        .create_group(ws, "top", &[EntityRef::Group(middle)])
        .unwrap();

    engine.delete_group(ws, middle).unwrap();

    assert!(matches!(
        engine.get_group(ws, middle),
        Err(EngineError::NotFound(_))
    ));
    assert!(engine.get_group(ws, top).unwrap().members.is_empty());
    assert_eq!(
        engine.get_group(ws, leaf).unwrap().members,
        BTreeSet::from([tag("x")])
    );
    assert!(engine.parents_of(ws, leaf).unwrap().is_empty());
}

#[test]
fn remove_membership_reports_whether_edge_existed() {
    let (engine, ws) = setup();
    let group = engine.create_group(ws, "g", &[tag("a")]).unwrap();

    assert!(engine.remove_membership(ws, group, &tag(" A ")).unwrap());
    assert!(!engine.remove_membership(ws, group, &tag("a")).unwrap());
    assert!(engine.get_group(ws, group).unwrap().members.is_empty());
}

#[test]
fn rename_checks_duplicates_and_keeps_identity() {
    let (engine, ws) = setup();
    let first = engine.create_group(ws, "first", &[]).unwrap();
    engine.create_group(ws, "second", &[]).unwrap();

    assert!(matches!(
        engine.rename_group(ws, first, "Second"),
        Err(EngineError::DuplicateName(_))
    ));
    engine.rename_group(ws, first, "  First  ").unwrap();
    engine.rename_group(ws, first, "renamed").unwrap();
    assert_eq!(engine.get_group(ws, first).unwrap().name, "renamed");
    engine.create_group(ws, "first", &[]).unwrap();
}

#[test]
fn graph_reloads_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tagnest.db");
    let ws = Uuid::new_v4();

    let (backend, engineering) = {
        let repo = SqliteWorkspaceRepository::try_new(open_db(&path).unwrap()).unwrap();
        let engine = Engine::open(ws, repo, EngineConfig::default()).unwrap();
        let backend = engine
            .create_group(ws, "backend", &[tag("python")])
            .unwrap();
        let engineering = engine
            .create_group(ws, "engineering", &[EntityRef::Group(backend)])
            .unwrap();
        (backend, engineering)
    };

    let repo = SqliteWorkspaceRepository::try_new(open_db(&path).unwrap()).unwrap();
    let engine = Engine::open(ws, repo, EngineConfig::default()).unwrap();
    assert_eq!(engine.list_groups(ws).unwrap().len(), 2);
    assert_eq!(
        engine.parents_of(ws, backend).unwrap(),
        BTreeSet::from([engineering])
    );
    assert!(matches!(
        engine.propose_membership(ws, backend, EntityRef::Group(engineering)),
        Err(EngineError::CycleRejected { .. })
    ));
}

/// Follows group edges from `from`; true when `to` is reachable.
fn reaches(engine: &Engine, ws: Uuid, from: GroupId, to: GroupId) -> bool {
    let mut stack = vec![from];
    let mut seen = BTreeSet::new();
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        let group = engine.get_group(ws, current).unwrap();
        stack.extend(group.members.iter().filter_map(EntityRef::as_group));
    }
    false
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_proposals_keep_graph_acyclic(
        edges in proptest::collection::vec((0usize..8, 0usize..8), 1..40)
    ) {
        let (engine, ws) = setup();
        let ids: Vec<GroupId> = (0..8)
            .map(|index| engine.create_group(ws, &format!("g{index}"), &[]).unwrap())
            .collect();

        for (parent, child) in edges {
            let (parent, child) = (ids[parent], ids[child]);
            let would_cycle = parent == child || reaches(&engine, ws, child, parent);
            let outcome = engine.propose_membership(ws, parent, EntityRef::Group(child));
            match outcome {
                Ok(_) => prop_assert!(!would_cycle),
                Err(EngineError::CycleRejected { .. }) => prop_assert!(would_cycle),
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }

        for id in &ids {
            let group = engine.get_group(ws, *id).unwrap();
            for child in group.members.iter().filter_map(EntityRef::as_group) {
                prop_assert!(!reaches(&engine, ws, child, *id));
            }
        }
    }
}
