use blurblog_backend::bootstrap;
use blurblog_backend::collaborators::{Collaborators, StaticAccountDirectory};
use blurblog_backend::config::{BlurblogConfig, BlurblogPaths};
use blurblog_backend::index::{InMemorySetIndex, SetIndex};
use blurblog_backend::node::Services;
use blurblog_backend::profiles::{FollowOutcome, ProfileView};
use blurblog_backend::shares::{fingerprint, ShareInput, StoryMetadata};
use blurblog_backend::visibility::StorySummary;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

struct TestStore {
    _dir: TempDir,
    config: BlurblogConfig,
}

impl TestStore {
    fn new() -> Self {
        let dir = tempdir().expect("tempdir");
        let config = BlurblogConfig::new(BlurblogPaths::from_base_dir(dir.path()).expect("paths"));
        Self { _dir: dir, config }
    }

    /// Fresh process view: reopen the store with an empty index.
    fn open(&self) -> (Services, Arc<InMemorySetIndex>) {
        let resources = bootstrap::initialize(&self.config).expect("bootstrap");
        let index = Arc::new(InMemorySetIndex::new(&self.config.index));
        let backing: Arc<dyn SetIndex> = index.clone();
        let accounts = Arc::new(StaticAccountDirectory::default());
        accounts.insert(10, "uma", "uma@example.com");
        accounts.insert(20, "vik", "vik@example.com");
        let collaborators = Collaborators {
            accounts,
            ..Collaborators::default()
        };
        (
            Services::new(resources.database, backing, collaborators),
            index,
        )
    }
}

fn share(services: &Services, sharer_id: i64, feed_id: i64, guid: &str, comment: Option<&str>) {
    services
        .shares
        .share(ShareInput {
            sharer_id,
            feed_id,
            guid: guid.into(),
            metadata: StoryMetadata {
                title: Some(format!("story {guid}")),
                content: Some("long body ".repeat(100)),
                ..Default::default()
            },
            comment: comment.map(str::to_string),
        })
        .expect("share");
}

#[test]
fn follow_keeps_profiles_and_index_in_step() {
    let store = TestStore::new();
    let (services, index) = store.open();

    services.profiles.follow(1, 2, false).unwrap();
    services.profiles.follow(1, 3, false).unwrap();
    services.profiles.follow(3, 2, false).unwrap();

    for user in [1, 2, 3] {
        let profile = services.profiles.get(user).unwrap().unwrap();
        assert_eq!(profile.row.following_count, profile.following_user_ids.len() as i64);
        assert_eq!(profile.row.follower_count, profile.follower_user_ids.len() as i64);
        for followee in &profile.following_user_ids {
            assert!(index.contains(&format!("F:{user}:F"), *followee).unwrap());
            let other = services.profiles.get(*followee).unwrap().unwrap();
            assert!(other.follower_user_ids.contains(&user));
        }
    }
}

#[test]
fn unfollow_suppression_lasts_until_an_explicit_follow() {
    let store = TestStore::new();
    let (services, _) = store.open();

    services.profiles.follow(1, 2, false).unwrap();
    services.profiles.unfollow(1, 2).unwrap();
    assert_eq!(
        services.profiles.follow(1, 2, true).unwrap(),
        FollowOutcome::Suppressed
    );
    assert_eq!(
        services.profiles.follow(1, 2, true).unwrap(),
        FollowOutcome::Suppressed
    );
    assert_eq!(
        services.profiles.follow(1, 2, false).unwrap(),
        FollowOutcome::Followed
    );
    services.profiles.unfollow(1, 2).unwrap();
    services.profiles.follow(1, 2, false).unwrap();
    assert_eq!(
        services.profiles.follow(1, 2, true).unwrap(),
        FollowOutcome::AlreadyFollowing
    );
}

#[test]
fn concurrent_follows_of_one_pair_count_once() {
    let store = TestStore::new();
    let (services, index) = store.open();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let profiles = services.profiles.clone();
            scope.spawn(move || profiles.follow(5, 6, false).unwrap());
        }
        for follower in 100..108 {
            let profiles = services.profiles.clone();
            scope.spawn(move || profiles.follow(follower, 6, false).unwrap());
        }
    });

    let six = services.profiles.get(6).unwrap().unwrap();
    assert_eq!(six.follower_user_ids.len(), 9);
    assert_eq!(six.row.follower_count, 9);
    assert_eq!(services.profiles.get(5).unwrap().unwrap().row.following_count, 1);
    assert_eq!(index.members("F:6:f").unwrap().len(), 9);
}

#[test]
fn fingerprints_survive_a_store_restart() {
    let store = TestStore::new();
    {
        let (services, _) = store.open();
        share(&services, 10, 4, "tag:example.com,2012:post-1", Some("good"));
    }

    let (services, index) = store.open();
    let stored = services
        .shares
        .get_share(10, "tag:example.com,2012:post-1")
        .unwrap()
        .unwrap();
    assert_eq!(stored.guid_hash, fingerprint("tag:example.com,2012:post-1"));
    assert_eq!(stored.story_content.as_deref(), Some("long body ".repeat(100).as_str()));

    assert!(index.is_empty(), "a new process starts with a cold index");
    services.repair.run().unwrap();
    let key = format!("C:4:{}", fingerprint("tag:example.com,2012:post-1"));
    assert!(index.contains(&key, 10).unwrap());
}

#[test]
fn follower_sees_friend_comment_end_to_end() {
    let store = TestStore::new();
    let (services, _) = store.open();
    let (u, v) = (10, 20);

    services.profiles.follow(v, u, false).unwrap();
    share(&services, u, 7, "story-s", Some("nice"));

    let story = StorySummary {
        share_count: 1,
        comment_count: 1,
        share_user_ids: vec![u],
        ..StorySummary::new(7, "story-s")
    };
    let annotated = services.visibility.annotate(vec![story], v);
    let story = &annotated[0];

    let comments = story.comments.as_ref().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].user_id, u);
    assert_eq!(comments[0].comments, "nice");
    match comments[0].author.as_ref().unwrap() {
        ProfileView::Compact(author) => assert_eq!(author.username.as_deref(), Some("uma")),
        other => panic!("expected compact author, got {other:?}"),
    }
    assert_eq!(story.comment_count_public, Some(0));
    assert_eq!(story.comment_count_friends, Some(1));
    assert_eq!(story.share_count_friends, Some(1));
}

#[test]
fn guid_with_trailing_space_stays_visible_and_removable() {
    let store = TestStore::new();
    let (services, index) = store.open();
    let guid = "http://example.com/post ";

    services.profiles.follow(20, 10, false).unwrap();
    share(&services, 10, 5, guid, Some("nice"));

    let story = StorySummary {
        share_count: 1,
        comment_count: 1,
        share_user_ids: vec![10],
        ..StorySummary::new(5, guid)
    };
    let annotated = services.visibility.annotate(vec![story], 20);
    assert_eq!(annotated[0].comment_count_friends, Some(1));
    assert_eq!(annotated[0].share_count_friends, Some(1));

    assert!(services.shares.unshare(10, 5, guid).unwrap());
    assert!(services.shares.get_share(10, guid).unwrap().is_none());
    let key = format!("S:5:{}", fingerprint(guid));
    assert!(!index.contains(&key, 10).unwrap());
}

#[test]
fn repair_after_index_loss_matches_a_replay_from_empty() {
    let store = TestStore::new();
    let (services, index) = store.open();

    services.profiles.follow(1, 2, false).unwrap();
    services.profiles.follow(2, 1, false).unwrap();
    services.profiles.follow(3, 1, false).unwrap();
    services.profiles.unfollow(3, 1).unwrap();
    share(&services, 1, 9, "a", Some("first"));
    share(&services, 2, 9, "a", None);
    share(&services, 2, 9, "b", Some("second"));
    share(&services, 2, 9, "b", Some(""));
    share(&services, 3, 9, "c", None);
    services.shares.unshare(3, 9, "c").unwrap();
    let replayed = index.snapshot().unwrap();

    index.clear().unwrap();
    index.add("F:77:F", 1).unwrap();
    services.repair.run().unwrap();
    assert_eq!(index.snapshot().unwrap(), replayed);

    let again = services.repair.run().unwrap();
    assert!(again.is_clean());
    assert_eq!(index.snapshot().unwrap(), replayed);
}

#[test]
fn index_outage_is_invisible_to_writers_and_healed_by_repair() {
    let store = TestStore::new();
    let (services, index) = store.open();

    index.set_online(false);
    services.profiles.follow(1, 2, false).unwrap();
    share(&services, 2, 3, "g", Some("hey"));

    let story = StorySummary {
        share_count: 1,
        comment_count: 1,
        share_user_ids: vec![2],
        ..StorySummary::new(3, "g")
    };
    let degraded = services.visibility.annotate(vec![story.clone()], 1);
    assert_eq!(degraded[0].comment_count_friends, Some(0));
    assert_eq!(degraded[0].comment_count_public, Some(1));

    index.set_online(true);
    let report = services.repair.run().unwrap();
    assert!(report.members_added > 0);
    let healed = services.visibility.annotate(vec![story], 1);
    assert_eq!(healed[0].comment_count_friends, Some(1));
    assert_eq!(healed[0].share_count_friends, Some(1));
}
