use std::collections::BTreeSet;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use sqlx::{postgres::PgRow, Row};
use veritron_api::{
    AuthToken, Comment, CommentId, Error as ApiError, Item, ItemId, NewComment, NewSession,
    NewViewer, StringList, Time, Uuid, Viewer, ViewerId, DEFAULT_ITEM_TITLE,
};
use veritron_core::{
    CommentFeed, CommentStore, Error, IdentityProvider, ItemStore, ViewerDirectory,
};

use crate::feeds::{ItemFeeds, COMMENT_CHANNEL};

const ITEM_COLUMNS: &str = "
    id, created_at, title, url, is_fake, fake_percentage, real_percentage, reasons,
    subject_expertise, author_verified, related_links, cross_check_sources, voters
";

fn percentage(row: &PgRow, field: &str) -> anyhow::Result<u8> {
    let p: i16 = row
        .try_get(field)
        .with_context(|| format!("retrieving the {field} field"))?;
    Ok(p.clamp(0, 100) as u8)
}

fn string_list(row: &PgRow, field: &str) -> anyhow::Result<Vec<String>> {
    let raw: Option<serde_json::Value> = row
        .try_get(field)
        .with_context(|| format!("retrieving the {field} field"))?;
    Ok(StringList::from_json(raw.unwrap_or(serde_json::Value::Null))
        .with_context(|| format!("normalizing the {field} field"))?
        .into_vec())
}

fn voters(row: &PgRow) -> anyhow::Result<BTreeSet<ViewerId>> {
    let voters: Vec<Uuid> = row
        .try_get("voters")
        .context("retrieving the voters field")?;
    Ok(voters.into_iter().map(ViewerId).collect())
}

fn item_from_row(row: &PgRow) -> anyhow::Result<Item> {
    let title: Option<String> = row.try_get("title").context("retrieving the title field")?;
    Ok(Item {
        id: ItemId(row.try_get("id").context("retrieving the id field")?),
        created_at: row
            .try_get("created_at")
            .context("retrieving the created_at field")?,
        title: title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| String::from(DEFAULT_ITEM_TITLE)),
        url: row.try_get("url").context("retrieving the url field")?,
        is_fake: row.try_get("is_fake").context("retrieving the is_fake field")?,
        fake_percentage: percentage(row, "fake_percentage")?,
        real_percentage: percentage(row, "real_percentage")?,
        reasons: row.try_get("reasons").context("retrieving the reasons field")?,
        subject_expertise: row
            .try_get("subject_expertise")
            .context("retrieving the subject_expertise field")?,
        author_verified: row
            .try_get("author_verified")
            .context("retrieving the author_verified field")?,
        related_links: string_list(row, "related_links")?,
        cross_check_sources: string_list(row, "cross_check_sources")?,
        voters: voters(row)?,
    })
}

fn comment_from_row(row: &PgRow) -> anyhow::Result<Comment> {
    Ok(Comment {
        id: CommentId(row.try_get("id").context("retrieving the id field")?),
        item_id: ItemId(row.try_get("item_id").context("retrieving the item_id field")?),
        author_id: ViewerId(
            row.try_get("author_id")
                .context("retrieving the author_id field")?,
        ),
        text: row.try_get("text").context("retrieving the text field")?,
        created_at: row
            .try_get::<Time, _>("created_at")
            .context("retrieving the created_at field")?,
        like_count: row
            .try_get("like_count")
            .context("retrieving the like_count field")?,
    })
}

pub async fn fetch_item(
    conn: &mut sqlx::PgConnection,
    item: ItemId,
) -> anyhow::Result<Option<Item>> {
    sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"))
        .bind(item.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("querying items table for {item:?}"))?
        .map(|row| item_from_row(&row))
        .transpose()
}

pub async fn fetch_items(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<Item>> {
    let mut res = Vec::new();
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY created_at DESC");
    let mut query = sqlx::query(&sql).fetch(conn);
    while let Some(row) = query.try_next().await.context("querying items table")? {
        res.push(item_from_row(&row)?);
    }
    Ok(res)
}

pub async fn create_item(conn: &mut sqlx::PgConnection, item: &Item) -> anyhow::Result<bool> {
    let res = sqlx::query(
        "
            INSERT INTO items
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT DO NOTHING
        ",
    )
    .bind(item.id.0)
    .bind(item.created_at)
    .bind(&item.title)
    .bind(&item.url)
    .bind(item.is_fake)
    .bind(item.fake_percentage as i16)
    .bind(item.real_percentage as i16)
    .bind(&item.reasons)
    .bind(&item.subject_expertise)
    .bind(item.author_verified)
    .bind(serde_json::json!(item.related_links))
    .bind(serde_json::json!(item.cross_check_sources))
    .bind(item.voters.iter().map(|v| v.0).collect::<Vec<Uuid>>())
    .execute(conn)
    .await
    .with_context(|| format!("inserting item {:?}", item.id))?;
    Ok(res.rows_affected() == 1)
}

pub async fn fetch_voters(
    conn: &mut sqlx::PgConnection,
    item: ItemId,
) -> anyhow::Result<Option<BTreeSet<ViewerId>>> {
    sqlx::query("SELECT voters FROM items WHERE id = $1")
        .bind(item.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("fetching voters of {item:?}"))?
        .map(|row| voters(&row))
        .transpose()
}

/// Overwrites the whole voter set. Votes go through the atomic `toggle_voter`,
/// this only backs the read-then-write fallback of `ItemStore`.
pub async fn write_voters(
    conn: &mut sqlx::PgConnection,
    item: ItemId,
    voters: &BTreeSet<ViewerId>,
) -> anyhow::Result<bool> {
    let res = sqlx::query("UPDATE items SET voters = $2 WHERE id = $1")
        .bind(item.0)
        .bind(voters.iter().map(|v| v.0).collect::<Vec<Uuid>>())
        .execute(conn)
        .await
        .with_context(|| format!("writing voters of {item:?}"))?;
    Ok(res.rows_affected() == 1)
}

/// Toggles in one statement, so that concurrent toggles cannot overwrite each other
pub async fn toggle_voter(
    conn: &mut sqlx::PgConnection,
    item: ItemId,
    viewer: ViewerId,
) -> anyhow::Result<Option<BTreeSet<ViewerId>>> {
    sqlx::query(
        "
            UPDATE items
            SET voters = CASE
                WHEN $2 = ANY(voters) THEN array_remove(voters, $2)
                ELSE array_append(voters, $2)
            END
            WHERE id = $1
            RETURNING voters
        ",
    )
    .bind(item.0)
    .bind(viewer.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("toggling vote of {viewer:?} on {item:?}"))?
    .map(|row| voters(&row))
    .transpose()
}

pub async fn fetch_comment(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> anyhow::Result<Option<Comment>> {
    sqlx::query(
        "SELECT id, item_id, author_id, text, created_at, like_count FROM comments WHERE id = $1",
    )
    .bind(comment.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("querying comments table for {comment:?}"))?
    .map(|row| comment_from_row(&row))
    .transpose()
}

pub async fn fetch_comments(
    conn: &mut sqlx::PgConnection,
    item: ItemId,
) -> anyhow::Result<Vec<Comment>> {
    let mut res = Vec::new();
    let mut query = sqlx::query(
        "
            SELECT id, item_id, author_id, text, created_at, like_count
                FROM comments
            WHERE item_id = $1
            ORDER BY created_at DESC, id DESC
        ",
    )
    .bind(item.0)
    .fetch(conn);
    while let Some(row) = query.try_next().await.context("querying comments table")? {
        res.push(comment_from_row(&row)?);
    }
    Ok(res)
}

/// Inserts the comment and announces it on the comment channel, which the
/// database delivers once the transaction commits
pub async fn insert_comment(
    conn: &mut sqlx::PgConnection,
    c: &NewComment,
) -> anyhow::Result<Result<Comment, ApiError>> {
    let exists = sqlx::query("SELECT 1 FROM items WHERE id = $1")
        .bind(c.item_id.0)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("checking existence of {:?}", c.item_id))?;
    if exists.is_none() {
        return Ok(Err(ApiError::NotFound(c.item_id.0)));
    }
    let row = sqlx::query(
        "
            INSERT INTO comments (id, item_id, author_id, text)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            RETURNING id, item_id, author_id, text, created_at, like_count
        ",
    )
    .bind(c.id.0)
    .bind(c.item_id.0)
    .bind(c.author_id.0)
    .bind(&c.text)
    .fetch_optional(&mut *conn)
    .await
    .with_context(|| format!("inserting comment {:?}", c.id))?;
    let comment = match row {
        None => return Ok(Err(ApiError::UuidAlreadyUsed(c.id.0))),
        Some(row) => comment_from_row(&row)?,
    };
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(COMMENT_CHANNEL)
        .bind(comment.id.0.to_string())
        .execute(&mut *conn)
        .await
        .with_context(|| format!("notifying insertion of {:?}", c.id))?;
    Ok(Ok(comment))
}

pub async fn create_viewer(
    conn: &mut sqlx::PgConnection,
    v: &NewViewer,
) -> anyhow::Result<Result<(), ApiError>> {
    let taken = sqlx::query("SELECT id, name FROM viewers WHERE id = $1 OR name = $2")
        .bind(v.id.0)
        .bind(&v.name)
        .fetch_optional(&mut *conn)
        .await
        .context("checking for conflicting viewers")?;
    if let Some(row) = taken {
        let id: Uuid = row.try_get("id").context("retrieving the id field")?;
        return Ok(Err(match id == v.id.0 {
            true => ApiError::UuidAlreadyUsed(id),
            false => ApiError::NameAlreadyUsed(v.name.clone()),
        }));
    }
    sqlx::query("INSERT INTO viewers VALUES ($1, $2, $3, $4)")
        .bind(v.id.0)
        .bind(&v.name)
        .bind(&v.avatar)
        .bind(&v.initial_password_hash)
        .execute(conn)
        .await
        .with_context(|| format!("inserting viewer {:?}", v.id))?;
    Ok(Ok(()))
}

/// Returns `None` on unknown user or wrong password
pub async fn login_viewer(
    conn: &mut sqlx::PgConnection,
    s: &NewSession,
) -> anyhow::Result<Option<AuthToken>> {
    let row = sqlx::query("SELECT id, password_hash FROM viewers WHERE name = $1")
        .bind(&s.user)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("fetching password hash for {:?}", s.user))?;
    let row = match row {
        None => return Ok(None),
        Some(row) => row,
    };
    let id: Uuid = row.try_get("id").context("retrieving the id field")?;
    let hash: String = row
        .try_get("password_hash")
        .context("retrieving the password_hash field")?;
    if !bcrypt::verify(&s.password, &hash).context("verifying password")? {
        return Ok(None);
    }
    let token = AuthToken(Uuid::new_v4());
    let now = Utc::now();
    sqlx::query("INSERT INTO sessions VALUES ($1, $2, $3, $3)")
        .bind(token.0)
        .bind(id)
        .bind(now)
        .execute(conn)
        .await
        .with_context(|| format!("creating session for {:?}", s.user))?;
    Ok(Some(token))
}

pub async fn logout_viewer(conn: &mut sqlx::PgConnection, token: AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(conn)
        .await
        .context("deleting session")?;
    Ok(res.rows_affected() == 1)
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> anyhow::Result<Option<Viewer>> {
    let row = sqlx::query(
        "
            UPDATE sessions s
            SET last_active = $2
            FROM viewers v
            WHERE s.id = $1
            AND v.id = s.viewer_id
            RETURNING v.id, v.name, v.avatar
        ",
    )
    .bind(token.0)
    .bind(Utc::now())
    .fetch_optional(conn)
    .await
    .context("recovering session")?;
    row.map(|row| -> anyhow::Result<Viewer> {
        Ok(Viewer {
            id: ViewerId(row.try_get("id").context("retrieving the id field")?),
            name: row.try_get("name").context("retrieving the name field")?,
            avatar: row.try_get("avatar").context("retrieving the avatar field")?,
        })
    })
    .transpose()
}

/// Postgres implementation of every store
pub struct PgStore {
    pool: sqlx::PgPool,
    feeds: ItemFeeds,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool, feeds: ItemFeeds) -> PgStore {
        PgStore { pool, feeds }
    }

    async fn acquire(&self) -> anyhow::Result<sqlx::pool::PoolConnection<sqlx::Postgres>> {
        self.pool.acquire().await.context("acquiring db connection")
    }
}

#[async_trait]
impl ItemStore for PgStore {
    async fn get_item(&self, item: ItemId) -> anyhow::Result<Option<Item>> {
        fetch_item(&mut *self.acquire().await?, item).await
    }

    async fn list_items(&self) -> anyhow::Result<Vec<Item>> {
        fetch_items(&mut *self.acquire().await?).await
    }

    async fn create_item(&self, item: Item) -> Result<(), Error> {
        match create_item(&mut *self.acquire().await?, &item).await? {
            true => Ok(()),
            false => Err(ApiError::UuidAlreadyUsed(item.id.0).into()),
        }
    }

    async fn fetch_voters(&self, item: ItemId) -> anyhow::Result<Option<BTreeSet<ViewerId>>> {
        fetch_voters(&mut *self.acquire().await?, item).await
    }

    async fn write_voters(&self, item: ItemId, voters: BTreeSet<ViewerId>) -> anyhow::Result<bool> {
        write_voters(&mut *self.acquire().await?, item, &voters).await
    }

    async fn toggle_voter(
        &self,
        item: ItemId,
        viewer: ViewerId,
    ) -> anyhow::Result<Option<BTreeSet<ViewerId>>> {
        toggle_voter(&mut *self.acquire().await?, item, viewer).await
    }
}

#[async_trait]
impl CommentStore for PgStore {
    async fn list_comments(&self, item: ItemId) -> anyhow::Result<Vec<Comment>> {
        fetch_comments(&mut *self.acquire().await?, item).await
    }

    async fn append_comment(&self, comment: NewComment) -> Result<Comment, Error> {
        let mut tx = self.pool.begin().await.context("opening transaction")?;
        let res = insert_comment(&mut *tx, &comment).await?;
        if res.is_ok() {
            tx.commit()
                .await
                .with_context(|| format!("committing comment {:?}", comment.id))?;
        }
        Ok(res?)
    }

    async fn subscribe(&self, item: ItemId) -> anyhow::Result<CommentFeed> {
        Ok(self.feeds.open(item))
    }
}

#[async_trait]
impl IdentityProvider for PgStore {
    async fn current_viewer(&self, token: AuthToken) -> anyhow::Result<Option<Viewer>> {
        recover_session(&mut *self.acquire().await?, token).await
    }
}

#[async_trait]
impl ViewerDirectory for PgStore {
    async fn create_viewer(&self, viewer: NewViewer) -> Result<(), Error> {
        Ok(create_viewer(&mut *self.acquire().await?, &viewer).await??)
    }

    async fn open_session(&self, session: NewSession) -> Result<AuthToken, Error> {
        login_viewer(&mut *self.acquire().await?, &session)
            .await?
            .ok_or_else(Error::permission_denied)
    }

    async fn close_session(&self, token: AuthToken) -> Result<(), Error> {
        match logout_viewer(&mut *self.acquire().await?, token).await? {
            true => Ok(()),
            false => Err(Error::permission_denied()),
        }
    }
}
