//! Invariant repair: reconcile the profile store's mirrored lists and
//! counters, then rebuild the set index from the authoritative store.
//!
//! Safe to run alongside live traffic and to repeat. The rebuild only adds
//! members; removal happens in a separate sweep that re-reads the store for
//! every candidate right before removing it, so a mutation that lands
//! between the rebuild and the sweep is never undone.

use crate::database::models::LinkKind;
use crate::database::repositories::{
    ProfileRepository, SharedStoryRepository, SqliteRepositories,
};
use crate::database::Database;
use crate::error::{SocialError, SocialResult};
use crate::index::graph::GRAPH_KEY_PREFIX;
use crate::index::{GraphSet, SetIndex, ShareSet, StoryKey};
use crate::profiles::ProfileService;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

type Expected = BTreeMap<String, BTreeSet<i64>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub profiles: usize,
    pub shares: usize,
    /// Follower rows added to mirror an existing following row.
    pub follower_links_added: usize,
    /// Follower rows with no matching following row.
    pub follower_links_removed: usize,
    pub members_added: usize,
    pub members_removed: usize,
    pub elapsed_ms: u64,
}

impl RepairReport {
    /// True when the pass found nothing to fix.
    pub fn is_clean(&self) -> bool {
        self.follower_links_added == 0
            && self.follower_links_removed == 0
            && self.members_added == 0
            && self.members_removed == 0
    }
}

#[derive(Clone)]
pub struct InvariantRepair {
    database: Database,
    index: Arc<dyn SetIndex>,
    profiles: ProfileService,
}

impl InvariantRepair {
    pub fn new(database: Database, index: Arc<dyn SetIndex>, profiles: ProfileService) -> Self {
        Self {
            database,
            index,
            profiles,
        }
    }

    pub fn run(&self) -> SocialResult<RepairReport> {
        let started = Instant::now();
        let mut report = RepairReport::default();

        self.reconcile_store(&mut report)?;

        let expected = self.expected_index()?;
        for (key, members) in &expected {
            for member in members {
                if self.index.add(key, *member)? {
                    report.members_added += 1;
                }
            }
        }

        // Fresh snapshot so entries re-added for a relationship removed
        // during the rebuild are swept too.
        let expected = self.expected_index()?;
        report.members_removed = self.sweep(&expected)?;
        report.shares = self
            .database
            .with_repositories(|repos| Ok(repos.shared_stories().all_memberships()?.len()))
            .map_err(SocialError::store)?;

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            profiles = report.profiles,
            shares = report.shares,
            follower_links_added = report.follower_links_added,
            follower_links_removed = report.follower_links_removed,
            members_added = report.members_added,
            members_removed = report.members_removed,
            elapsed_ms = report.elapsed_ms,
            "invariant repair finished"
        );
        Ok(report)
    }

    /// Following rows are the source of truth for the mirrored follower
    /// rows. Counters are recomputed for every profile afterwards.
    fn reconcile_store(&self, report: &mut RepairReport) -> SocialResult<()> {
        let ids = self
            .database
            .with_repositories(|repos| repos.profiles().list_ids())
            .map_err(SocialError::store)?;
        let subscriptions: HashMap<i64, Option<i64>> = ids
            .iter()
            .map(|id| (*id, self.profiles.subscription_count(*id)))
            .collect();

        let (added, removed, profiles) = self
            .database
            .with_transaction(|repos| {
                let store = repos.profiles();
                let following = store.all_links(LinkKind::Following)?;
                let mirrored: BTreeSet<(i64, i64)> = following
                    .iter()
                    .map(|(follower, followee)| (*followee, *follower))
                    .collect();

                let mut added = 0;
                for (followee, follower) in &mirrored {
                    store.ensure(*followee)?;
                    if store.add_link(*followee, LinkKind::Follower, *follower)? {
                        added += 1;
                    }
                }
                let mut removed = 0;
                for (user, follower) in store.all_links(LinkKind::Follower)? {
                    if !mirrored.contains(&(user, follower))
                        && store.remove_link(user, LinkKind::Follower, follower)?
                    {
                        removed += 1;
                    }
                }

                let all_ids = store.list_ids()?;
                for id in &all_ids {
                    let count = subscriptions.get(id).copied().flatten();
                    store.recompute_counts(*id, count)?;
                }
                Ok((added, removed, all_ids.len()))
            })
            .map_err(SocialError::store)?;

        if added > 0 || removed > 0 {
            tracing::warn!(added, removed, "repaired follower lists in the profile store");
        }
        report.follower_links_added = added;
        report.follower_links_removed = removed;
        report.profiles = profiles;
        Ok(())
    }

    /// Index contents derived from the store.
    fn expected_index(&self) -> SocialResult<Expected> {
        self.database
            .with_repositories(|repos| {
                let mut expected = Expected::new();
                for (follower, followee) in repos.profiles().all_links(LinkKind::Following)? {
                    expected
                        .entry(GraphSet::Following.key(follower))
                        .or_default()
                        .insert(followee);
                    expected
                        .entry(GraphSet::Followers.key(followee))
                        .or_default()
                        .insert(follower);
                }
                for share in repos.shared_stories().all_memberships()? {
                    let story = StoryKey::new(share.story_feed_id, share.guid_hash);
                    expected
                        .entry(story.key(ShareSet::Sharers))
                        .or_default()
                        .insert(share.user_id);
                    if share.has_comments {
                        expected
                            .entry(story.key(ShareSet::Commenters))
                            .or_default()
                            .insert(share.user_id);
                    }
                }
                Ok(expected)
            })
            .map_err(SocialError::store)
    }

    fn sweep(&self, expected: &Expected) -> SocialResult<usize> {
        let mut keys = self.index.keys_with_prefix(GRAPH_KEY_PREFIX)?;
        for set in [ShareSet::Sharers, ShareSet::Commenters] {
            keys.extend(self.index.keys_with_prefix(&format!("{}:", set.prefix()))?);
        }

        let mut removed = 0;
        for key in keys {
            let wanted = expected.get(&key);
            for member in self.index.members(&key)? {
                if wanted.is_some_and(|wanted| wanted.contains(&member)) {
                    continue;
                }
                // The removal runs under the store handle so no write can
                // commit between the check and the index update.
                let swept = self
                    .database
                    .with_repositories(|repos| {
                        if is_backed(&repos, &key, member)? {
                            return Ok(Ok(false));
                        }
                        Ok(self.index.remove(&key, member))
                    })
                    .map_err(SocialError::store)??;
                if swept {
                    tracing::debug!(key = %key, member, "removed stale index member");
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// Whether the store currently justifies `member` in the set at `key`.
/// Keys that do not parse are never backed.
fn is_backed(repos: &SqliteRepositories<'_>, key: &str, member: i64) -> Result<bool> {
    if let Some((user, set)) = GraphSet::parse_key(key) {
        let profiles = repos.profiles();
        return match set {
            GraphSet::Following => profiles.has_link(user, LinkKind::Following, member),
            GraphSet::Followers => profiles.has_link(member, LinkKind::Following, user),
        };
    }
    if let Some((story, set)) = ShareSet::parse_key(key) {
        let membership = repos
            .shared_stories()
            .membership(member, story.feed_id, &story.guid_hash)?;
        return Ok(match set {
            ShareSet::Sharers => membership.is_some(),
            ShareSet::Commenters => membership == Some(true),
        });
    }
    Ok(false)
}
