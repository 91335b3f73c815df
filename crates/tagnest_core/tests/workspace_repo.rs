use std::collections::BTreeSet;
use tagnest_core::db::open_db_in_memory;
use tagnest_core::{
    EdgeDelta, EntityRef, SqliteWorkspaceRepository, WorkspaceRepoError, WorkspaceRepository,
};
use uuid::Uuid;

fn setup() -> SqliteWorkspaceRepository {
    SqliteWorkspaceRepository::try_new(open_db_in_memory().unwrap()).unwrap()
}

fn tag(name: &str) -> EntityRef {
    EntityRef::Tag(name.to_string())
}

fn tags(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn create_group_persists_initial_members() {
    let repo = setup();
    let ws = Uuid::new_v4();

    let backend = repo
        .create_group(ws, "backend", &[tag("python"), tag("java")])
        .unwrap();
    let engineering = repo
        .create_group(ws, "engineering", &[EntityRef::Group(backend.id), tag("frontend-tag")])
        .unwrap();

    let members = repo.get_members(ws, engineering.id).unwrap();
    assert_eq!(
        members,
        BTreeSet::from([EntityRef::Group(backend.id), tag("frontend-tag")])
    );
    assert_eq!(repo.list_groups(ws).unwrap().len(), 2);
}

#[test]
fn duplicate_group_name_is_rejected_case_insensitively() {
    let repo = setup();
    let ws = Uuid::new_v4();
    repo.create_group(ws, "Backend", &[]).unwrap();

    match repo.create_group(ws, "BACKEND", &[]) {
        Err(WorkspaceRepoError::DuplicateGroupName(name)) => assert_eq!(name, "BACKEND"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("duplicate name must be rejected"),
    }

    // Names are scoped per workspace.
    repo.create_group(Uuid::new_v4(), "backend", &[]).unwrap();
}

#[test]
fn membership_delta_adds_and_removes_edges() {
    let repo = setup();
    let ws = Uuid::new_v4();
    let parent = repo.create_group(ws, "parent", &[tag("a")]).unwrap();
    let child = repo.create_group(ws, "child", &[]).unwrap();

    repo.persist_membership_change(
        ws,
        parent.id,
        &EdgeDelta::add(vec![EntityRef::Group(child.id), tag("b")]),
    )
    .unwrap();
    repo.persist_membership_change(ws, parent.id, &EdgeDelta::remove(tag("a")))
        .unwrap();

    let members = repo.get_members(ws, parent.id).unwrap();
    assert_eq!(members, BTreeSet::from([EntityRef::Group(child.id), tag("b")]));
}

#[test]
fn delete_group_drops_edges_but_keeps_neighbours() {
    let repo = setup();
    let ws = Uuid::new_v4();
    let leaf = repo.create_group(ws, "leaf", &[tag("x")]).unwrap();
    let middle = repo
        .create_group(ws, "middle", &[EntityRef::Group(leaf.id)])
        .unwrap();
    let top = repo
        .create_group(ws, "top", &[EntityRef::Group(middle.id)])
        .unwrap();

    repo.delete_group(ws, middle.id).unwrap();

    assert!(repo.get_group(ws, middle.id).unwrap().is_none());
    assert!(repo.get_members(ws, top.id).unwrap().is_empty());
    let leaf = repo.get_group(ws, leaf.id).unwrap().unwrap();
    assert_eq!(leaf.members, BTreeSet::from([tag("x")]));
}

#[test]
fn missing_group_is_reported() {
    let repo = setup();
    let ws = Uuid::new_v4();
    let missing = Uuid::new_v4();

    assert!(matches!(
        repo.get_members(ws, missing),
        Err(WorkspaceRepoError::GroupNotFound(id)) if id == missing
    ));
    assert!(matches!(
        repo.delete_group(ws, missing),
        Err(WorkspaceRepoError::GroupNotFound(_))
    ));
}

#[test]
fn groups_are_invisible_across_workspaces() {
    let repo = setup();
    let ws = Uuid::new_v4();
    let other = Uuid::new_v4();
    let group = repo.create_group(ws, "private", &[tag("a")]).unwrap();

    assert!(repo.get_group(other, group.id).unwrap().is_none());
    assert!(repo.list_groups(other).unwrap().is_empty());
    assert!(matches!(
        repo.persist_membership_change(other, group.id, &EdgeDelta::add(vec![tag("b")])),
        Err(WorkspaceRepoError::GroupNotFound(_))
    ));
}

#[test]
fn tag_superset_query_requires_every_tag() {
    let repo = setup();
    let ws = Uuid::new_v4();
    let both = repo
        .create_card(ws, &["python".to_string(), "java".to_string()])
        .unwrap();
    repo.create_card(ws, &["python".to_string()]).unwrap();
    repo.create_card(ws, &[]).unwrap();
    repo.create_card(Uuid::new_v4(), &["python".to_string(), "java".to_string()])
        .unwrap();

    let matched = repo
        .get_cards_with_tag_superset(ws, &tags(&["python", "java"]))
        .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, both.id);

    let everything = repo.get_cards_with_tag_superset(ws, &BTreeSet::new()).unwrap();
    assert_eq!(everything.len(), 3);
}

#[test]
fn add_card_tags_merges_into_existing_tags() {
    let repo = setup();
    let ws = Uuid::new_v4();
    let card = repo.create_card(ws, &["a".to_string()]).unwrap();

    let updated = repo.add_card_tags(ws, card.id, &tags(&["a", "b"])).unwrap();
    assert_eq!(updated.tags, tags(&["a", "b"]));

    assert!(matches!(
        repo.add_card_tags(Uuid::new_v4(), card.id, &tags(&["c"])),
        Err(WorkspaceRepoError::CardNotFound(_))
    ));
}
