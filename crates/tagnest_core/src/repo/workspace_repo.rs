//! Workspace storage contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist groups, membership edges, tags and the card mirror.
//! - Keep SQL details inside the repository boundary.
//!
//! # Invariants
//! - Every query is scoped by `workspace_uuid`; ids from another workspace
//!   behave exactly like missing ids.
//! - Membership deltas and group creation commit in a single transaction.
//! - Deleting a group drops its edges in both directions but never its
//!   member tags or nested groups.
//! - Tags are stored by normalized name and created on first reference.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::card::{Card, CardId};
use crate::model::group::{EdgeDelta, EntityRef, Group, GroupId, WorkspaceId};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const GROUP_SELECT_SQL: &str = "SELECT group_uuid, workspace_uuid, name, created_at FROM groups";

const CARD_SELECT_SQL: &str = "SELECT c.card_uuid AS card_uuid, t.name AS tag_name
     FROM cards c
     LEFT JOIN card_tags ct ON ct.card_uuid = c.card_uuid
     LEFT JOIN tags t ON t.id = ct.tag_id
     WHERE c.workspace_uuid = ?";

/// Result type used by workspace repository operations.
pub type WorkspaceRepoResult<T> = Result<T, WorkspaceRepoError>;

/// Errors from workspace repository operations.
#[derive(Debug)]
pub enum WorkspaceRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Group does not exist in the workspace.
    GroupNotFound(GroupId),
    /// Card does not exist in the workspace.
    CardNotFound(CardId),
    /// Group name already used in the workspace.
    DuplicateGroupName(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for WorkspaceRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::GroupNotFound(id) => write!(f, "group not found: {id}"),
            Self::CardNotFound(id) => write!(f, "card not found: {id}"),
            Self::DuplicateGroupName(name) => write!(f, "group name already in use: `{name}`"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "workspace repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "workspace repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid workspace data: {message}"),
        }
    }
}

impl Error for WorkspaceRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for WorkspaceRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for WorkspaceRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Storage collaborator consumed by the workspace engine.
///
/// Implementations must be `Send` so an engine can be shared across threads;
/// the engine serializes access with its own mutex.
pub trait WorkspaceRepository {
    /// Creates one group with its initial members.
    fn create_group(
        &self,
        workspace_id: WorkspaceId,
        name: &str,
        members: &[EntityRef],
    ) -> WorkspaceRepoResult<Group>;
    /// Renames one group.
    fn rename_group(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
        name: &str,
    ) -> WorkspaceRepoResult<()>;
    /// Loads one group with its members.
    fn get_group(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
    ) -> WorkspaceRepoResult<Option<Group>>;
    /// Loads every group of the workspace.
    fn list_groups(&self, workspace_id: WorkspaceId) -> WorkspaceRepoResult<Vec<Group>>;
    /// Loads direct members of one group.
    fn get_members(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
    ) -> WorkspaceRepoResult<BTreeSet<EntityRef>>;
    /// Applies one membership delta atomically.
    fn persist_membership_change(
        &self,
        workspace_id: WorkspaceId,
        parent_id: GroupId,
        delta: &EdgeDelta,
    ) -> WorkspaceRepoResult<()>;
    /// Deletes one group and every edge touching it.
    fn delete_group(&self, workspace_id: WorkspaceId, group_id: GroupId)
        -> WorkspaceRepoResult<()>;
    /// Mirrors one card with its tags.
    fn create_card(&self, workspace_id: WorkspaceId, tags: &[String])
        -> WorkspaceRepoResult<Card>;
    /// Loads one card.
    fn get_card(
        &self,
        workspace_id: WorkspaceId,
        card_id: CardId,
    ) -> WorkspaceRepoResult<Option<Card>>;
    /// Loads the card universe of the workspace.
    fn list_cards(&self, workspace_id: WorkspaceId) -> WorkspaceRepoResult<Vec<Card>>;
    /// Loads cards whose tag set contains every tag in `required_tags`.
    fn get_cards_with_tag_superset(
        &self,
        workspace_id: WorkspaceId,
        required_tags: &BTreeSet<String>,
    ) -> WorkspaceRepoResult<Vec<Card>>;
    /// Adds tags to one card and returns the updated card.
    fn add_card_tags(
        &self,
        workspace_id: WorkspaceId,
        card_id: CardId,
        tags: &BTreeSet<String>,
    ) -> WorkspaceRepoResult<Card>;
}

/// SQLite-backed workspace repository.
pub struct SqliteWorkspaceRepository {
    conn: Connection,
}

impl SqliteWorkspaceRepository {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: Connection) -> WorkspaceRepoResult<Self> {
        ensure_store_ready(&conn)?;
        Ok(Self { conn })
    }
}

impl WorkspaceRepository for SqliteWorkspaceRepository {
    fn create_group(
        &self,
        workspace_id: WorkspaceId,
        name: &str,
        members: &[EntityRef],
    ) -> WorkspaceRepoResult<Group> {
        let group_id = Uuid::new_v4();
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO groups (group_uuid, workspace_uuid, name) VALUES (?1, ?2, ?3);",
            params![group_id.to_string(), workspace_id.to_string(), name],
        );
        if let Err(err) = inserted {
            return Err(map_unique_violation(err, name));
        }

        for member in members {
            insert_edge(&tx, workspace_id, group_id, member)?;
        }
        tx.commit()?;

        self.get_group(workspace_id, group_id)?
            .ok_or(WorkspaceRepoError::GroupNotFound(group_id))
    }

    fn rename_group(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
        name: &str,
    ) -> WorkspaceRepoResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE groups
                 SET name = ?3,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE group_uuid = ?1
                   AND workspace_uuid = ?2;",
                params![group_id.to_string(), workspace_id.to_string(), name],
            )
            .map_err(|err| map_unique_violation(err, name))?;
        if changed == 0 {
            return Err(WorkspaceRepoError::GroupNotFound(group_id));
        }
        Ok(())
    }

    fn get_group(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
    ) -> WorkspaceRepoResult<Option<Group>> {
        let sql = format!("{GROUP_SELECT_SQL} WHERE group_uuid = ?1 AND workspace_uuid = ?2;");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([group_id.to_string(), workspace_id.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let mut group = parse_group_row(row)?;
        group.members = load_members(&self.conn, group_id)?;
        Ok(Some(group))
    }

    fn list_groups(&self, workspace_id: WorkspaceId) -> WorkspaceRepoResult<Vec<Group>> {
        let workspace = workspace_id.to_string();
        let sql = format!(
            "{GROUP_SELECT_SQL} WHERE workspace_uuid = ?1 ORDER BY created_at ASC, group_uuid ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([workspace.as_str()])?;
        let mut groups = Vec::new();
        while let Some(row) = rows.next()? {
            groups.push(parse_group_row(row)?);
        }

        let mut members = load_workspace_members(&self.conn, workspace.as_str())?;
        for group in &mut groups {
            if let Some(found) = members.remove(&group.id) {
                group.members = found;
            }
        }
        Ok(groups)
    }

    fn get_members(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
    ) -> WorkspaceRepoResult<BTreeSet<EntityRef>> {
        if !group_exists(&self.conn, workspace_id, group_id)? {
            return Err(WorkspaceRepoError::GroupNotFound(group_id));
        }
        load_members(&self.conn, group_id)
    }

    fn persist_membership_change(
        &self,
        workspace_id: WorkspaceId,
        parent_id: GroupId,
        delta: &EdgeDelta,
    ) -> WorkspaceRepoResult<()> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        if !group_exists(&tx, workspace_id, parent_id)? {
            return Err(WorkspaceRepoError::GroupNotFound(parent_id));
        }

        for member in &delta.added {
            insert_edge(&tx, workspace_id, parent_id, member)?;
        }
        for member in &delta.removed {
            delete_edge(&tx, workspace_id, parent_id, member)?;
        }

        tx.execute(
            "UPDATE groups
             SET updated_at = (strftime('%s', 'now') * 1000)
             WHERE group_uuid = ?1;",
            [parent_id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn delete_group(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
    ) -> WorkspaceRepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM groups WHERE group_uuid = ?1 AND workspace_uuid = ?2;",
            [group_id.to_string(), workspace_id.to_string()],
        )?;
        if changed == 0 {
            return Err(WorkspaceRepoError::GroupNotFound(group_id));
        }
        Ok(())
    }

    fn create_card(
        &self,
        workspace_id: WorkspaceId,
        tags: &[String],
    ) -> WorkspaceRepoResult<Card> {
        let card_id = Uuid::new_v4();
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO cards (card_uuid, workspace_uuid) VALUES (?1, ?2);",
            [card_id.to_string(), workspace_id.to_string()],
        )?;
        for tag in tags {
            attach_card_tag(&tx, workspace_id, card_id, tag)?;
        }
        tx.commit()?;

        self.get_card(workspace_id, card_id)?
            .ok_or(WorkspaceRepoError::CardNotFound(card_id))
    }

    fn get_card(
        &self,
        workspace_id: WorkspaceId,
        card_id: CardId,
    ) -> WorkspaceRepoResult<Option<Card>> {
        let cards = query_cards(
            &self.conn,
            workspace_id,
            " AND c.card_uuid = ?",
            vec![Value::Text(card_id.to_string())],
        )?;
        Ok(cards.into_iter().next())
    }

    fn list_cards(&self, workspace_id: WorkspaceId) -> WorkspaceRepoResult<Vec<Card>> {
        query_cards(&self.conn, workspace_id, "", Vec::new())
    }

    fn get_cards_with_tag_superset(
        &self,
        workspace_id: WorkspaceId,
        required_tags: &BTreeSet<String>,
    ) -> WorkspaceRepoResult<Vec<Card>> {
        if required_tags.is_empty() {
            return self.list_cards(workspace_id);
        }

        let placeholders = vec!["?"; required_tags.len()].join(", ");
        let filter = format!(
            " AND (
                SELECT COUNT(*)
                FROM card_tags required_ct
                INNER JOIN tags required_t ON required_t.id = required_ct.tag_id
                WHERE required_ct.card_uuid = c.card_uuid
                  AND required_t.name IN ({placeholders})
            ) = ?"
        );
        let mut bind_values: Vec<Value> = required_tags
            .iter()
            .map(|tag| Value::Text(tag.clone()))
            .collect();
        bind_values.push(Value::Integer(required_tags.len() as i64));

        query_cards(&self.conn, workspace_id, &filter, bind_values)
    }

    fn add_card_tags(
        &self,
        workspace_id: WorkspaceId,
        card_id: CardId,
        tags: &BTreeSet<String>,
    ) -> WorkspaceRepoResult<Card> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let exists: i64 = tx.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM cards WHERE card_uuid = ?1 AND workspace_uuid = ?2
            );",
            [card_id.to_string(), workspace_id.to_string()],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(WorkspaceRepoError::CardNotFound(card_id));
        }

        for tag in tags {
            attach_card_tag(&tx, workspace_id, card_id, tag)?;
        }
        tx.commit()?;

        self.get_card(workspace_id, card_id)?
            .ok_or(WorkspaceRepoError::CardNotFound(card_id))
    }
}

fn map_unique_violation(err: rusqlite::Error, name: &str) -> WorkspaceRepoError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            WorkspaceRepoError::DuplicateGroupName(name.to_string())
        }
        _ => err.into(),
    }
}

fn group_exists(
    conn: &Connection,
    workspace_id: WorkspaceId,
    group_id: GroupId,
) -> WorkspaceRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM groups WHERE group_uuid = ?1 AND workspace_uuid = ?2
        );",
        [group_id.to_string(), workspace_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn ensure_tag_id(
    conn: &Connection,
    workspace_id: WorkspaceId,
    name: &str,
) -> WorkspaceRepoResult<i64> {
    let workspace = workspace_id.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO tags (workspace_uuid, name) VALUES (?1, ?2);",
        params![workspace, name],
    )?;
    let id = conn.query_row(
        "SELECT id FROM tags WHERE workspace_uuid = ?1 AND name = ?2;",
        params![workspace, name],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn find_tag_id(
    conn: &Connection,
    workspace_id: WorkspaceId,
    name: &str,
) -> WorkspaceRepoResult<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM tags WHERE workspace_uuid = ?1 AND name = ?2;",
            params![workspace_id.to_string(), name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn insert_edge(
    conn: &Connection,
    workspace_id: WorkspaceId,
    parent_id: GroupId,
    member: &EntityRef,
) -> WorkspaceRepoResult<()> {
    match member {
        EntityRef::Tag(name) => {
            let tag_id = ensure_tag_id(conn, workspace_id, name)?;
            conn.execute(
                "INSERT OR IGNORE INTO group_member_tags (parent_uuid, tag_id) VALUES (?1, ?2);",
                params![parent_id.to_string(), tag_id],
            )?;
        }
        EntityRef::Group(child_id) => {
            if !group_exists(conn, workspace_id, *child_id)? {
                return Err(WorkspaceRepoError::GroupNotFound(*child_id));
            }
            conn.execute(
                "INSERT OR IGNORE INTO group_member_groups (parent_uuid, child_uuid) VALUES (?1, ?2);",
                [parent_id.to_string(), child_id.to_string()],
            )?;
        }
    }
    Ok(())
}

fn delete_edge(
    conn: &Connection,
    workspace_id: WorkspaceId,
    parent_id: GroupId,
    member: &EntityRef,
) -> WorkspaceRepoResult<()> {
    match member {
        EntityRef::Tag(name) => {
            if let Some(tag_id) = find_tag_id(conn, workspace_id, name)? {
                conn.execute(
                    "DELETE FROM group_member_tags WHERE parent_uuid = ?1 AND tag_id = ?2;",
                    params![parent_id.to_string(), tag_id],
                )?;
            }
        }
        EntityRef::Group(child_id) => {
            conn.execute(
                "DELETE FROM group_member_groups WHERE parent_uuid = ?1 AND child_uuid = ?2;",
                [parent_id.to_string(), child_id.to_string()],
            )?;
        }
    }
    Ok(())
}

fn attach_card_tag(
    conn: &Connection,
    workspace_id: WorkspaceId,
    card_id: CardId,
    tag: &str,
) -> WorkspaceRepoResult<()> {
    let tag_id = ensure_tag_id(conn, workspace_id, tag)?;
    conn.execute(
        "INSERT OR IGNORE INTO card_tags (card_uuid, tag_id) VALUES (?1, ?2);",
        params![card_id.to_string(), tag_id],
    )?;
    Ok(())
}

fn load_members(conn: &Connection, group_id: GroupId) -> WorkspaceRepoResult<BTreeSet<EntityRef>> {
    let parent = group_id.to_string();
    let mut members = BTreeSet::new();

    let mut stmt = conn.prepare(
        "SELECT t.name
         FROM group_member_tags gmt
         INNER JOIN tags t ON t.id = gmt.tag_id
         WHERE gmt.parent_uuid = ?1;",
    )?;
    let mut rows = stmt.query([parent.as_str()])?;
    while let Some(row) = rows.next()? {
        members.insert(EntityRef::Tag(row.get(0)?));
    }

    let mut stmt =
        conn.prepare("SELECT child_uuid FROM group_member_groups WHERE parent_uuid = ?1;")?;
    let mut rows = stmt.query([parent.as_str()])?;
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        members.insert(EntityRef::Group(parse_uuid(
            &value,
            "group_member_groups.child_uuid",
        )?));
    }

    Ok(members)
}

fn load_workspace_members(
    conn: &Connection,
    workspace: &str,
) -> WorkspaceRepoResult<HashMap<GroupId, BTreeSet<EntityRef>>> {
    let mut members: HashMap<GroupId, BTreeSet<EntityRef>> = HashMap::new();

    let mut stmt = conn.prepare(
        "SELECT gmt.parent_uuid, t.name
         FROM group_member_tags gmt
         INNER JOIN groups g ON g.group_uuid = gmt.parent_uuid
         INNER JOIN tags t ON t.id = gmt.tag_id
         WHERE g.workspace_uuid = ?1;",
    )?;
    let mut rows = stmt.query([workspace])?;
    while let Some(row) = rows.next()? {
        let parent: String = row.get(0)?;
        let parent = parse_uuid(&parent, "group_member_tags.parent_uuid")?;
        members
            .entry(parent)
            .or_default()
            .insert(EntityRef::Tag(row.get(1)?));
    }

    let mut stmt = conn.prepare(
        "SELECT gmg.parent_uuid, gmg.child_uuid
         FROM group_member_groups gmg
         INNER JOIN groups g ON g.group_uuid = gmg.parent_uuid
         WHERE g.workspace_uuid = ?1;",
    )?;
    let mut rows = stmt.query([workspace])?;
    while let Some(row) = rows.next()? {
        let parent: String = row.get(0)?;
        let child: String = row.get(1)?;
        members
            .entry(parse_uuid(&parent, "group_member_groups.parent_uuid")?)
            .or_default()
            .insert(EntityRef::Group(parse_uuid(
                &child,
                "group_member_groups.child_uuid",
            )?));
    }

    Ok(members)
}

fn query_cards(
    conn: &Connection,
    workspace_id: WorkspaceId,
    filter: &str,
    filter_values: Vec<Value>,
) -> WorkspaceRepoResult<Vec<Card>> {
    let sql = format!("{CARD_SELECT_SQL}{filter} ORDER BY c.card_uuid ASC;");
    let mut bind_values = vec![Value::Text(workspace_id.to_string())];
    bind_values.extend(filter_values);

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut tags_by_card: BTreeMap<CardId, BTreeSet<String>> = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let card_text: String = row.get("card_uuid")?;
        let card_id = parse_uuid(&card_text, "cards.card_uuid")?;
        let tags = tags_by_card.entry(card_id).or_default();
        if let Some(tag) = row.get::<_, Option<String>>("tag_name")? {
            tags.insert(tag);
        }
    }

    Ok(tags_by_card
        .into_iter()
        .map(|(id, tags)| Card {
            id,
            workspace_id,
            tags,
        })
        .collect())
}

fn parse_group_row(row: &Row<'_>) -> WorkspaceRepoResult<Group> {
    let group_text: String = row.get("group_uuid")?;
    let workspace_text: String = row.get("workspace_uuid")?;
    Ok(Group {
        id: parse_uuid(&group_text, "groups.group_uuid")?,
        workspace_id: parse_uuid(&workspace_text, "groups.workspace_uuid")?,
        name: row.get("name")?,
        members: BTreeSet::new(),
        created_at: row.get("created_at")?,
    })
}

fn parse_uuid(value: &str, column: &'static str) -> WorkspaceRepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| WorkspaceRepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_store_ready(conn: &Connection) -> WorkspaceRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(WorkspaceRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in [
        "groups",
        "tags",
        "group_member_tags",
        "group_member_groups",
        "cards",
        "card_tags",
    ] {
        if !table_exists(conn, table)? {
            return Err(WorkspaceRepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> WorkspaceRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
