use crate::database::models::{NetworkAccount, SocialNetwork, SocialServicesRecord};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

pub(super) struct SqliteSocialServicesRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> super::SocialServicesRepository for SqliteSocialServicesRepository<'conn> {
    fn get(&self, user_id: i64) -> Result<Option<SocialServicesRecord>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT user_id, autofollow,
                       twitter_uid, twitter_picture_url, twitter_username, twitter_refresh_date,
                       facebook_uid, facebook_picture_url, facebook_refresh_date,
                       upload_picture_url
                FROM social_services
                WHERE user_id = ?1
                "#,
                params![user_id],
                |row| {
                    Ok(SocialServicesRecord {
                        user_id: row.get(0)?,
                        autofollow: row.get(1)?,
                        twitter: NetworkAccount {
                            uid: row.get(2)?,
                            picture_url: row.get(3)?,
                            username: row.get(4)?,
                            refresh_date: row.get(5)?,
                        },
                        facebook: NetworkAccount {
                            uid: row.get(6)?,
                            picture_url: row.get(7)?,
                            username: None,
                            refresh_date: row.get(8)?,
                        },
                        upload_picture_url: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn upsert(&self, record: &SocialServicesRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO social_services (user_id, autofollow, twitter_uid, twitter_picture_url, twitter_username, twitter_refresh_date, facebook_uid, facebook_picture_url, facebook_refresh_date, upload_picture_url)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(user_id) DO UPDATE SET
                autofollow = excluded.autofollow,
                twitter_uid = excluded.twitter_uid,
                twitter_picture_url = excluded.twitter_picture_url,
                twitter_username = excluded.twitter_username,
                twitter_refresh_date = excluded.twitter_refresh_date,
                facebook_uid = excluded.facebook_uid,
                facebook_picture_url = excluded.facebook_picture_url,
                facebook_refresh_date = excluded.facebook_refresh_date,
                upload_picture_url = excluded.upload_picture_url
            "#,
            params![
                record.user_id,
                record.autofollow,
                record.twitter.uid,
                record.twitter.picture_url,
                record.twitter.username,
                record.twitter.refresh_date,
                record.facebook.uid,
                record.facebook.picture_url,
                record.facebook.refresh_date,
                record.upload_picture_url
            ],
        )?;
        Ok(())
    }

    fn set_friend_ids(&self, user_id: i64, network: SocialNetwork, ids: &[String]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM social_service_friends WHERE user_id = ?1 AND network = ?2",
            params![user_id, network.as_str()],
        )?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO social_service_friends (user_id, network, position, foreign_id)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for (position, foreign_id) in ids.iter().enumerate() {
                stmt.execute(params![user_id, network.as_str(), position as i64, foreign_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn friend_ids(&self, user_id: i64, network: SocialNetwork) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT foreign_id
            FROM social_service_friends
            WHERE user_id = ?1 AND network = ?2
            ORDER BY position ASC
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, network.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn users_with_uid(&self, network: SocialNetwork, uid: &str) -> Result<Vec<i64>> {
        let column = match network {
            SocialNetwork::Twitter => "twitter_uid",
            SocialNetwork::Facebook => "facebook_uid",
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT user_id FROM social_services WHERE {column} = ?1 ORDER BY user_id ASC"
        ))?;
        let rows = stmt.query_map(params![uid], |row| row.get::<_, i64>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn users_with_friend(&self, network: SocialNetwork, foreign_id: &str) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT user_id
            FROM social_service_friends
            WHERE network = ?1 AND foreign_id = ?2
            ORDER BY user_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![network.as_str(), foreign_id], |row| {
            row.get::<_, i64>(0)
        })?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}
