//! Relationship behavior observed through the store.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use trellis_core::{DuplicatePolicy, RelationshipError, StoreError};
use trellis_store::{RequestInput, ResourceKey, Store, StoreConfig, ToManyOperation};
use trellis_test_utils::{
    arb_member_op, init_tracing, post_with_comments, reference, refs, social_schema, user,
    user_with_friends, MemberOp, NormalizedPayload, RelationshipData, ResourceRecord,
    ScriptedHandler,
};

fn store_with(config: StoreConfig) -> (Store, Arc<ScriptedHandler>) {
    init_tracing();
    let handler = Arc::new(ScriptedHandler::new());
    let store = Store::builder(social_schema(), handler.clone())
        .with_config(config)
        .build()
        .unwrap();
    (store, handler)
}

fn store() -> Store {
    store_with(StoreConfig::new()).0
}

fn key(store: &Store, resource_type: &str, id: &str) -> ResourceKey {
    store.resolve(&reference(resource_type, id)).unwrap()
}

fn users(store: &Store, ids: &[&str]) -> Vec<ResourceKey> {
    ids.iter().map(|id| key(store, "user", id)).collect()
}

#[test]
fn test_splice_replaces_members_and_inverses() {
    let store = store();
    store
        .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["2", "3"])))
        .unwrap();
    let [u1, u2, u3, u4]: [ResourceKey; 4] =
        users(&store, &["1", "2", "3", "4"]).try_into().unwrap();
    assert_eq!(store.related(&u2, "friends").unwrap(), vec![u1.clone()]);
    assert_eq!(store.related(&u3, "friends").unwrap(), vec![u1.clone()]);

    let outcome = store
        .mutate_to_many(&u1, "friends", ToManyOperation::splice(0, 2, vec![u4.clone()]))
        .unwrap();

    assert_eq!(outcome.added, vec![u4.clone()]);
    assert_eq!(outcome.removed.len(), 2);
    assert_eq!(store.related(&u1, "friends").unwrap(), vec![u4.clone()]);
    assert_eq!(store.related(&u4, "friends").unwrap(), vec![u1.clone()]);
    assert!(store.related(&u2, "friends").unwrap().is_empty());
    assert!(store.related(&u3, "friends").unwrap().is_empty());
    assert!(store.is_dirty(&u1));
}

#[test]
fn test_new_duplicate_rejected_under_default_policy() {
    let store = store();
    let [u1, u2]: [ResourceKey; 2] = users(&store, &["1", "2"]).try_into().unwrap();

    let err = store
        .mutate_to_many(&u1, "friends", ToManyOperation::push(vec![u2.clone(), u2.clone()]))
        .unwrap_err();

    assert!(matches!(
        err,
        StoreError::Relationship(RelationshipError::DuplicateRelationshipMember { .. })
    ));
    assert!(store.related(&u1, "friends").unwrap().is_empty());
    assert!(store.related(&u2, "friends").unwrap().is_empty());
}

#[test]
fn test_existing_duplicate_tolerated_with_deprecation() {
    let store = store();
    store
        .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["2", "3"])))
        .unwrap();
    let [u1, u2, u4]: [ResourceKey; 3] = users(&store, &["1", "2", "4"]).try_into().unwrap();

    let outcome = store
        .mutate_to_many(&u1, "friends", ToManyOperation::push(vec![u2.clone(), u4.clone()]))
        .unwrap();

    let deprecation = outcome.deprecation.unwrap();
    assert_eq!(deprecation.duplicates, vec![u2.lid().to_string()]);
    let friends = store.related(&u1, "friends").unwrap();
    assert_eq!(friends.len(), 3);
    assert_eq!(friends[0], u2);
    assert_eq!(friends[2], u4);
}

#[test]
fn test_reject_policy_refuses_existing_duplicates() {
    let (store, _) = store_with(StoreConfig::new().with_duplicates(DuplicatePolicy::Reject));
    store
        .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["2"])))
        .unwrap();
    let [u1, u2]: [ResourceKey; 2] = users(&store, &["1", "2"]).try_into().unwrap();

    let err = store
        .mutate_to_many(&u1, "friends", ToManyOperation::push(vec![u2.clone()]))
        .unwrap_err();

    match err {
        StoreError::Relationship(RelationshipError::DuplicateRelationshipMember {
            lid,
            field,
            duplicates,
        }) => {
            assert_eq!(lid, u1.lid());
            assert_eq!(field, "friends");
            assert_eq!(duplicates, vec![u2.lid().to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.related(&u1, "friends").unwrap(), vec![u2]);
}

#[test]
fn test_deprecation_report_can_be_silenced() {
    let (store, _) = store_with(StoreConfig::new().with_report_deprecations(false));
    store
        .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["2"])))
        .unwrap();
    let [u1, u2]: [ResourceKey; 2] = users(&store, &["1", "2"]).try_into().unwrap();

    let outcome = store
        .mutate_to_many(&u1, "friends", ToManyOperation::push(vec![u2]))
        .unwrap();
    assert!(outcome.deprecation.is_none());
}

#[test]
fn test_remove_items_updates_inverse() {
    let store = store();
    store
        .push(&NormalizedPayload::single(post_with_comments("1", "Hello", &["10", "11"])))
        .unwrap();
    let post = key(&store, "post", "1");
    let c10 = key(&store, "comment", "10");
    let c11 = key(&store, "comment", "11");
    assert_eq!(store.related(&c10, "post").unwrap(), vec![post.clone()]);

    store
        .mutate_to_many(&post, "comments", ToManyOperation::remove_items(vec![c10.clone()]))
        .unwrap();

    assert_eq!(store.related(&post, "comments").unwrap(), vec![c11.clone()]);
    assert!(store.related(&c10, "post").unwrap().is_empty());
    assert_eq!(store.related(&c11, "post").unwrap(), vec![post]);
}

#[test]
fn test_rollback_restores_both_sides() {
    let store = store();
    store
        .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["2"])))
        .unwrap();
    let [u1, u2, u3]: [ResourceKey; 3] = users(&store, &["1", "2", "3"]).try_into().unwrap();

    store
        .mutate_to_many(&u1, "friends", ToManyOperation::replace(vec![u3.clone()]))
        .unwrap();
    store.set_attribute(&u1, "name", json!("Grace"));
    assert!(store.is_dirty(&u1));

    store.rollback(&u1).unwrap();

    assert!(!store.is_dirty(&u1));
    assert_eq!(store.attribute(&u1, "name"), Some(json!("Ada")));
    assert_eq!(store.related(&u1, "friends").unwrap(), vec![u2.clone()]);
    assert_eq!(store.related(&u2, "friends").unwrap(), vec![u1]);
    assert!(store.related(&u3, "friends").unwrap().is_empty());
}

#[tokio::test]
async fn test_save_commits_local_edits() {
    let (store, handler) = store_with(StoreConfig::new());
    store
        .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["2"])))
        .unwrap();
    let [u1, u3]: [ResourceKey; 2] = users(&store, &["1", "3"]).try_into().unwrap();
    store
        .mutate_to_many(&u1, "friends", ToManyOperation::push(vec![u3.clone()]))
        .unwrap();
    assert!(store.is_dirty(&u1));

    let save = RequestInput::update_record(&u1);
    handler.respond(save.fingerprint(), NormalizedPayload::single(user("1", "Ada")));
    store.request(save).await.unwrap();

    assert!(!store.is_dirty(&u1));
    let state = store.relationship(&u1, "friends").unwrap();
    assert_eq!(state.remote_state(), state.local_state());
    assert_eq!(state.local_state().members().len(), 2);
}

#[test]
fn test_unknown_relationship_rejects_whole_payload() {
    let store = store();
    let record = user("1", "Ada").with_relationship(
        "enemies",
        RelationshipData::to_many(refs("user", &["2"])),
    );

    let err = store.push(&NormalizedPayload::single(record)).unwrap_err();

    assert!(matches!(
        err,
        StoreError::Relationship(RelationshipError::UnknownRelationship { .. })
    ));
    assert!(store.peek_resource(&reference("user", "1")).is_none());
    assert!(store.peek_resource(&reference("user", "2")).is_none());
}

#[test]
fn test_kind_mismatch_in_included_record_rejects_whole_payload() {
    let store = store();
    let bad = user("9", "Bad").with_relationship(
        "bestFriend",
        RelationshipData::to_many(refs("user", &["1"])),
    );
    let payload =
        NormalizedPayload::single(user_with_friends("1", "Ada", &["2"])).with_included(vec![bad]);

    let err = store.push(&payload).unwrap_err();

    assert!(matches!(
        err,
        StoreError::Relationship(RelationshipError::KindMismatch { .. })
    ));
    for id in ["1", "2", "9"] {
        assert!(store.peek_resource(&reference("user", id)).is_none());
    }
}

#[test]
fn test_wrong_member_type_in_payload_leaves_store_untouched() {
    let store = store();
    store
        .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["2"])))
        .unwrap();
    let u1 = key(&store, "user", "1");
    let update = user("1", "Renamed")
        .with_relationship("friends", RelationshipData::to_many(refs("user", &["3"])))
        .with_relationship("posts", RelationshipData::to_many(refs("comment", &["10"])));

    let err = store.push(&NormalizedPayload::single(update)).unwrap_err();

    assert!(matches!(
        err,
        StoreError::Relationship(RelationshipError::UnexpectedType { .. })
    ));
    assert_eq!(store.attribute(&u1, "name"), Some(json!("Ada")));
    assert_eq!(store.related(&u1, "friends").unwrap(), users(&store, &["2"]));
    assert!(store.peek_resource(&reference("user", "3")).is_none());
    assert!(store.peek_resource(&reference("comment", "10")).is_none());
}

#[test]
fn test_identity_conflict_in_payload_leaves_store_untouched() {
    let store = store();
    store
        .push(&NormalizedPayload::collection(vec![user("1", "Ada"), user("2", "Grace")]))
        .unwrap();
    let u1 = key(&store, "user", "1");
    let conflicting = ResourceRecord::new("user", "2").with_lid(u1.lid());
    let payload = NormalizedPayload::single(user("3", "Linus")).with_included(vec![conflicting]);

    assert!(matches!(
        store.push(&payload).unwrap_err(),
        StoreError::Identity(_)
    ));
    assert!(store.peek_resource(&reference("user", "3")).is_none());
    assert_eq!(u1.id(), Some("1"));
}

#[test]
fn test_to_one_moves_member_between_owners() {
    let store = store();
    store
        .push(&NormalizedPayload::single(post_with_comments("1", "a", &["10"])))
        .unwrap();
    let p1 = key(&store, "post", "1");
    let p2 = key(&store, "post", "2");
    let c10 = key(&store, "comment", "10");

    let previous = store.set_to_one(&c10, "post", Some(p2.clone())).unwrap();

    assert_eq!(previous, Some(p1.clone()));
    assert!(store.related(&p1, "comments").unwrap().is_empty());
    assert_eq!(store.related(&p2, "comments").unwrap(), vec![c10]);
}

#[test]
fn test_one_to_one_displaces_previous_owner() {
    let store = store();
    let record = user("1", "Ada").with_relationship(
        "profile",
        RelationshipData::to_one(Some(reference("profile", "p"))),
    );
    store.push(&NormalizedPayload::single(record)).unwrap();
    let [u1, u2]: [ResourceKey; 2] = users(&store, &["1", "2"]).try_into().unwrap();
    let profile = key(&store, "profile", "p");
    assert_eq!(store.related(&profile, "user").unwrap(), vec![u1.clone()]);

    store.set_to_one(&u2, "profile", Some(profile.clone())).unwrap();

    assert_eq!(store.related(&profile, "user").unwrap(), vec![u2.clone()]);
    assert!(store.related(&u1, "profile").unwrap().is_empty());
    assert_eq!(store.related(&u2, "profile").unwrap(), vec![profile]);
}

#[test]
fn test_remote_update_rebases_local_edits() {
    let store = store();
    store
        .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["2", "3"])))
        .unwrap();
    let [u1, u2, u3, u4, u5]: [ResourceKey; 5] =
        users(&store, &["1", "2", "3", "4", "5"]).try_into().unwrap();
    store
        .mutate_to_many(&u1, "friends", ToManyOperation::push(vec![u4.clone()]))
        .unwrap();

    store
        .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["3", "5"])))
        .unwrap();

    let friends = store.related(&u1, "friends").unwrap();
    assert!(!friends.contains(&u2));
    assert!(friends.contains(&u3));
    assert!(friends.contains(&u4));
    assert!(friends.contains(&u5));
    assert!(store.is_dirty(&u1));
    assert!(store.related(&u2, "friends").unwrap().is_empty());
}

#[test]
fn test_wrong_member_type_is_rejected() {
    let store = store();
    let u1 = key(&store, "user", "1");
    let post = key(&store, "post", "1");

    let err = store
        .mutate_to_many(&u1, "friends", ToManyOperation::push(vec![post]))
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Relationship(RelationshipError::UnexpectedType { .. })
    ));
}

fn apply(store: &Store, owner: &ResourceKey, pool: &[ResourceKey], op: &MemberOp) {
    let pick = |indexes: &[usize]| -> Vec<ResourceKey> {
        indexes.iter().map(|i| pool[*i].clone()).collect()
    };
    let operation = match op {
        MemberOp::Push(items) => ToManyOperation::push(pick(items)),
        MemberOp::Insert(at, items) => ToManyOperation::insert_at(*at, pick(items)),
        MemberOp::Splice(start, delete, items) => {
            ToManyOperation::splice(*start, *delete, pick(items))
        }
        MemberOp::Remove(items) => ToManyOperation::remove_items(pick(items)),
        MemberOp::Replace(items) => ToManyOperation::replace(pick(items)),
    };
    // Rejected edits must leave the graph untouched; the invariants below
    // cover both outcomes.
    let _ = store.mutate_to_many(owner, "friends", operation);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any sequence of edits keeps members unique and friendships mutual.
    #[test]
    fn prop_friends_stay_unique_and_symmetric(
        ops in prop::collection::vec(arb_member_op(5), 1..12),
        dedupe_all in any::<bool>(),
    ) {
        let policy = if dedupe_all {
            DuplicatePolicy::DedupeAll
        } else {
            DuplicatePolicy::TolerateExisting
        };
        let (store, _) = store_with(StoreConfig::new().with_duplicates(policy));
        let owner = key(&store, "user", "1");
        let pool = users(&store, &["2", "3", "4", "5", "6"]);

        for op in &ops {
            apply(&store, &owner, &pool, op);

            let friends = store.related(&owner, "friends").unwrap();
            let unique: HashSet<&ResourceKey> = friends.iter().collect();
            prop_assert_eq!(unique.len(), friends.len());

            for member in &pool {
                let back = store.related(member, "friends").unwrap();
                prop_assert_eq!(friends.contains(member), back.contains(&owner));
                prop_assert!(back.len() <= 1);
            }
        }
    }
}

#[test]
fn test_record_without_linkage_keeps_members() {
    let store = store();
    store
        .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["2"])))
        .unwrap();
    let links_only = ResourceRecord::new("user", "1").with_relationship(
        "friends",
        RelationshipData {
            data: None,
            links: Some(json!({ "related": "/users/1/friends" })),
            meta: None,
        },
    );
    store.push(&NormalizedPayload::single(links_only)).unwrap();

    let u1 = key(&store, "user", "1");
    let state = store.relationship(&u1, "friends").unwrap();
    assert_eq!(state.local_state().members().len(), 1);
    assert_eq!(
        state.links(),
        Some(&json!({ "related": "/users/1/friends" }))
    );
}
