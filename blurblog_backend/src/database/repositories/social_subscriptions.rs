use crate::database::models::SocialSubscriptionRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqliteSocialSubscriptionRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

const SUBSCRIPTION_COLUMNS: &str = r#"
    user_id, subscription_user_id, last_read_date, mark_read_date,
    unread_count_neutral, unread_count_positive, unread_count_negative,
    unread_count_updated, oldest_unread_story_date, needs_unread_recalc,
    feed_opens, is_trained
"#;

fn map_row(row: &Row<'_>) -> rusqlite::Result<SocialSubscriptionRecord> {
    Ok(SocialSubscriptionRecord {
        user_id: row.get(0)?,
        subscription_user_id: row.get(1)?,
        last_read_date: row.get(2)?,
        mark_read_date: row.get(3)?,
        unread_count_neutral: row.get(4)?,
        unread_count_positive: row.get(5)?,
        unread_count_negative: row.get(6)?,
        unread_count_updated: row.get(7)?,
        oldest_unread_story_date: row.get(8)?,
        needs_unread_recalc: row.get(9)?,
        feed_opens: row.get(10)?,
        is_trained: row.get(11)?,
    })
}

impl<'conn> super::SocialSubscriptionRepository for SqliteSocialSubscriptionRepository<'conn> {
    fn create_if_missing(&self, record: &SocialSubscriptionRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO social_subscriptions (user_id, subscription_user_id, last_read_date, mark_read_date, unread_count_neutral, unread_count_positive, unread_count_negative, unread_count_updated, oldest_unread_story_date, needs_unread_recalc, feed_opens, is_trained)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                record.user_id,
                record.subscription_user_id,
                record.last_read_date,
                record.mark_read_date,
                record.unread_count_neutral,
                record.unread_count_positive,
                record.unread_count_negative,
                record.unread_count_updated,
                record.oldest_unread_story_date,
                record.needs_unread_recalc,
                record.feed_opens,
                record.is_trained
            ],
        )?;
        Ok(inserted > 0)
    }

    fn get(
        &self,
        user_id: i64,
        subscription_user_id: i64,
    ) -> Result<Option<SocialSubscriptionRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM social_subscriptions WHERE user_id = ?1 AND subscription_user_id = ?2"
                ),
                params![user_id, subscription_user_id],
                map_row,
            )
            .optional()?;
        Ok(row)
    }

    fn delete(&self, user_id: i64, subscription_user_id: i64) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM social_subscriptions WHERE user_id = ?1 AND subscription_user_id = ?2",
            params![user_id, subscription_user_id],
        )?;
        Ok(removed > 0)
    }

    fn list_for_user(&self, user_id: i64) -> Result<Vec<SocialSubscriptionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM social_subscriptions
            WHERE user_id = ?1
            ORDER BY subscription_user_id ASC
            "#
        ))?;
        let rows = stmt.query_map(params![user_id], map_row)?;
        let mut subscriptions = Vec::new();
        for row in rows {
            subscriptions.push(row?);
        }
        Ok(subscriptions)
    }
}
