use crate::database::models::{LinkKind, ProfileRecord, ProfileRow};
use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

pub(super) struct SqliteProfileRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

const PROFILE_COLUMNS: &str = r#"
    user_id, username, email, bio, photo_url, photo_service, location, website,
    subscription_count, shared_stories_count, following_count, follower_count,
    stories_last_month, average_stories_per_month, favicon_color
"#;

fn map_row(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        user_id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        bio: row.get(3)?,
        photo_url: row.get(4)?,
        photo_service: row.get(5)?,
        location: row.get(6)?,
        website: row.get(7)?,
        subscription_count: row.get(8)?,
        shared_stories_count: row.get(9)?,
        following_count: row.get(10)?,
        follower_count: row.get(11)?,
        stories_last_month: row.get(12)?,
        average_stories_per_month: row.get(13)?,
        favicon_color: row.get(14)?,
    })
}

impl<'conn> super::ProfileRepository for SqliteProfileRepository<'conn> {
    fn ensure(&self, user_id: i64) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO social_profiles (user_id) VALUES (?1)",
            params![user_id],
        )?;
        Ok(inserted > 0)
    }

    fn get(&self, user_id: i64) -> Result<Option<ProfileRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM social_profiles WHERE user_id = ?1"),
                params![user_id],
                map_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ProfileRecord {
            following_user_ids: self.links(user_id, LinkKind::Following)?,
            follower_user_ids: self.links(user_id, LinkKind::Follower)?,
            unfollowed_user_ids: self.links(user_id, LinkKind::Unfollowed)?,
            row,
        }))
    }

    fn get_rows(&self, user_ids: &[i64]) -> Result<Vec<ProfileRow>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; user_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM social_profiles WHERE user_id IN ({placeholders}) ORDER BY user_id ASC"
        ))?;
        let rows = stmt.query_map(params_from_iter(user_ids.iter()), map_row)?;
        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(row?);
        }
        Ok(profiles)
    }

    fn list_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM social_profiles ORDER BY user_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn update_fields(&self, row: &ProfileRow) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE social_profiles SET
                username = ?2,
                email = ?3,
                bio = ?4,
                photo_url = ?5,
                photo_service = ?6,
                location = ?7,
                website = ?8,
                favicon_color = ?9
            WHERE user_id = ?1
            "#,
            params![
                row.user_id,
                row.username,
                row.email,
                row.bio,
                row.photo_url,
                row.photo_service,
                row.location,
                row.website,
                row.favicon_color
            ],
        )?;
        Ok(())
    }

    fn add_link(&self, user_id: i64, kind: LinkKind, other_id: i64) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO profile_links (user_id, kind, other_id) VALUES (?1, ?2, ?3)",
            params![user_id, kind.as_str(), other_id],
        )?;
        Ok(inserted > 0)
    }

    fn remove_link(&self, user_id: i64, kind: LinkKind, other_id: i64) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM profile_links WHERE user_id = ?1 AND kind = ?2 AND other_id = ?3",
            params![user_id, kind.as_str(), other_id],
        )?;
        Ok(removed > 0)
    }

    fn has_link(&self, user_id: i64, kind: LinkKind, other_id: i64) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM profile_links WHERE user_id = ?1 AND kind = ?2 AND other_id = ?3",
                params![user_id, kind.as_str(), other_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn links(&self, user_id: i64, kind: LinkKind) -> Result<BTreeSet<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT other_id FROM profile_links WHERE user_id = ?1 AND kind = ?2",
        )?;
        let rows = stmt.query_map(params![user_id, kind.as_str()], |row| row.get::<_, i64>(0))?;
        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    fn all_links(&self, kind: LinkKind) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT user_id, other_id
            FROM profile_links
            WHERE kind = ?1
            ORDER BY user_id ASC, other_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![kind.as_str()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut links = Vec::new();
        for row in rows {
            links.push(row?);
        }
        Ok(links)
    }

    fn recompute_counts(&self, user_id: i64, subscription_count: Option<i64>) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE social_profiles SET
                subscription_count = COALESCE(?2, subscription_count),
                shared_stories_count = (
                    SELECT COUNT(*) FROM shared_stories WHERE user_id = ?1
                ),
                following_count = (
                    SELECT COUNT(*) FROM profile_links WHERE user_id = ?1 AND kind = 'following'
                ),
                follower_count = (
                    SELECT COUNT(*) FROM profile_links WHERE user_id = ?1 AND kind = 'follower'
                )
            WHERE user_id = ?1
            "#,
            params![user_id, subscription_count],
        )?;
        Ok(())
    }
}
