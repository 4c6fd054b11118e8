use crate::database::models::{ShareMembership, SharedStoryRecord};
use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

pub(super) struct SqliteSharedStoryRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

const STORY_COLUMNS: &str = r#"
    user_id, story_guid, guid_hash, story_feed_id, shared_date, comments, has_comments,
    story_date, story_title, story_content_z, story_original_content_z, story_content_type,
    story_author_name, story_permalink, story_tags
"#;

/// Row plus its still-encoded tag list.
fn map_row(row: &Row<'_>) -> rusqlite::Result<(SharedStoryRecord, String)> {
    let record = SharedStoryRecord {
        user_id: row.get(0)?,
        story_guid: row.get(1)?,
        guid_hash: row.get(2)?,
        story_feed_id: row.get(3)?,
        shared_date: row.get(4)?,
        comments: row.get(5)?,
        has_comments: row.get(6)?,
        story_date: row.get(7)?,
        story_title: row.get(8)?,
        story_content_z: row.get(9)?,
        story_original_content_z: row.get(10)?,
        story_content_type: row.get(11)?,
        story_author_name: row.get(12)?,
        story_permalink: row.get(13)?,
        story_tags: Vec::new(),
    };
    Ok((record, row.get(14)?))
}

fn decode_tags((mut record, tags): (SharedStoryRecord, String)) -> Result<SharedStoryRecord> {
    record.story_tags = serde_json::from_str(&tags).with_context(|| {
        format!(
            "corrupt story_tags for user {} guid {}",
            record.user_id, record.story_guid
        )
    })?;
    Ok(record)
}

impl<'conn> super::SharedStoryRepository for SqliteSharedStoryRepository<'conn> {
    fn upsert(&self, record: &SharedStoryRecord) -> Result<()> {
        let tags = serde_json::to_string(&record.story_tags)?;
        self.conn.execute(
            r#"
            INSERT INTO shared_stories (user_id, story_guid, guid_hash, story_feed_id, shared_date, comments, has_comments, story_date, story_title, story_content_z, story_original_content_z, story_content_type, story_author_name, story_permalink, story_tags)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(user_id, story_guid) DO UPDATE SET
                guid_hash = excluded.guid_hash,
                story_feed_id = excluded.story_feed_id,
                shared_date = excluded.shared_date,
                comments = excluded.comments,
                has_comments = excluded.has_comments,
                story_date = excluded.story_date,
                story_title = excluded.story_title,
                story_content_z = excluded.story_content_z,
                story_original_content_z = excluded.story_original_content_z,
                story_content_type = excluded.story_content_type,
                story_author_name = excluded.story_author_name,
                story_permalink = excluded.story_permalink,
                story_tags = excluded.story_tags
            "#,
            params![
                record.user_id,
                record.story_guid,
                record.guid_hash,
                record.story_feed_id,
                record.shared_date,
                record.comments,
                record.has_comments,
                record.story_date,
                record.story_title,
                record.story_content_z,
                record.story_original_content_z,
                record.story_content_type,
                record.story_author_name,
                record.story_permalink,
                tags
            ],
        )?;
        Ok(())
    }

    fn get(&self, user_id: i64, story_guid: &str) -> Result<Option<SharedStoryRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {STORY_COLUMNS} FROM shared_stories WHERE user_id = ?1 AND story_guid = ?2"
                ),
                params![user_id, story_guid],
                map_row,
            )
            .optional()?;
        row.map(decode_tags).transpose()
    }

    fn delete(&self, user_id: i64, story_guid: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM shared_stories WHERE user_id = ?1 AND story_guid = ?2",
            params![user_id, story_guid],
        )?;
        Ok(removed > 0)
    }

    fn list_for_user(&self, user_id: i64, limit: usize) -> Result<Vec<SharedStoryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {STORY_COLUMNS}
            FROM shared_stories
            WHERE user_id = ?1
            ORDER BY shared_date DESC
            LIMIT ?2
            "#
        ))?;
        let rows = stmt.query_map(params![user_id, limit as i64], map_row)?;
        let mut stories = Vec::new();
        for row in rows {
            stories.push(decode_tags(row?)?);
        }
        Ok(stories)
    }

    fn list_for_story(
        &self,
        story_feed_id: i64,
        guid_hash: &str,
        user_ids: &[i64],
    ) -> Result<Vec<SharedStoryRecord>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; user_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {STORY_COLUMNS}
            FROM shared_stories
            WHERE story_feed_id = ? AND guid_hash = ? AND user_id IN ({placeholders})
            ORDER BY shared_date ASC
            "#
        ))?;
        let mut values: Vec<Value> = Vec::with_capacity(user_ids.len() + 2);
        values.push(Value::Integer(story_feed_id));
        values.push(Value::Text(guid_hash.to_string()));
        values.extend(user_ids.iter().map(|id| Value::Integer(*id)));
        let rows = stmt.query_map(params_from_iter(values), map_row)?;
        let mut stories = Vec::new();
        for row in rows {
            stories.push(decode_tags(row?)?);
        }
        Ok(stories)
    }

    fn count_for_user(&self, user_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM shared_stories WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn all_memberships(&self) -> Result<Vec<ShareMembership>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT user_id, story_feed_id, guid_hash, has_comments
            FROM shared_stories
            ORDER BY story_feed_id ASC, guid_hash ASC, user_id ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ShareMembership {
                user_id: row.get(0)?,
                story_feed_id: row.get(1)?,
                guid_hash: row.get(2)?,
                has_comments: row.get(3)?,
            })
        })?;
        let mut memberships = Vec::new();
        for row in rows {
            memberships.push(row?);
        }
        Ok(memberships)
    }

    fn membership(
        &self,
        user_id: i64,
        story_feed_id: i64,
        guid_hash: &str,
    ) -> Result<Option<bool>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT has_comments
                FROM shared_stories
                WHERE user_id = ?1 AND story_feed_id = ?2 AND guid_hash = ?3
                ORDER BY has_comments DESC
                LIMIT 1
                "#,
                params![user_id, story_feed_id, guid_hash],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(row)
    }
}
