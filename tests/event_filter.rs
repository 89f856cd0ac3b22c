#![allow(missing_docs)]

mod common;

use common::test_helpers::{discard, plain_broker};
use mediagate::{
    AccessHook, AccessRequest, ClientInfo, Decision, Event, EventKind, Facility,
};

fn event(kind: EventKind, facility: Facility, client: u32, object: u32) -> AccessRequest {
    AccessRequest::event(client, Event::new(kind, facility), object)
}

#[tokio::test]
async fn first_sight_probes_and_registers_the_object() {
    let (broker, _) = plain_broker();
    broker.client_put(&ClientInfo::new(5));

    // Sink introspection is open, so the NEW event passes and is remembered.
    let new = event(EventKind::New, Facility::Sink, 5, 2);
    assert_eq!(broker.check(&new, discard()).await, Decision::Allow);
    assert!(broker.client_has_seen(5, Facility::Sink, 2));

    let change = event(EventKind::Change, Facility::Sink, 5, 2);
    assert_eq!(broker.check(&change, discard()).await, Decision::Allow);
}

#[tokio::test]
async fn seen_objects_pass_changes_without_a_fresh_probe() {
    let (broker, objects) = plain_broker();
    objects.put_sink_input(7, Some(5));
    broker.client_put(&ClientInfo::new(5));

    let new = event(EventKind::New, Facility::SinkInput, 5, 7);
    assert_eq!(broker.check(&new, discard()).await, Decision::Allow);

    // Even if the probe would now fail, the seen set answers first.
    objects.remove_sink_input(7);
    let change = event(EventKind::Change, Facility::SinkInput, 5, 7);
    assert_eq!(broker.check(&change, discard()).await, Decision::Allow);
}

#[tokio::test]
async fn unseen_change_is_promoted_to_a_probe() {
    let (broker, objects) = plain_broker();
    objects.put_sink_input(7, Some(5));
    objects.put_sink_input(8, Some(6));
    broker.client_put(&ClientInfo::new(5));

    // Own stream: the promoted probe passes and the pair is registered.
    let own = event(EventKind::Change, Facility::SinkInput, 5, 7);
    assert_eq!(broker.check(&own, discard()).await, Decision::Allow);
    assert!(broker.client_has_seen(5, Facility::SinkInput, 7));

    // Someone else's stream: the probe is refused, nothing is registered.
    let foreign = event(EventKind::Change, Facility::SinkInput, 5, 8);
    assert_eq!(broker.check(&foreign, discard()).await, Decision::Block);
    assert!(!broker.client_has_seen(5, Facility::SinkInput, 8));
}

#[tokio::test]
async fn remove_round_trips_the_seen_set() {
    let (broker, _) = plain_broker();
    broker.client_put(&ClientInfo::new(5));

    let new = event(EventKind::New, Facility::Sink, 5, 2);
    assert_eq!(broker.check(&new, discard()).await, Decision::Allow);
    assert!(broker.client_has_seen(5, Facility::Sink, 2));

    let remove = event(EventKind::Remove, Facility::Sink, 5, 2);
    assert_eq!(broker.check(&remove, discard()).await, Decision::Allow);
    assert!(!broker.client_has_seen(5, Facility::Sink, 2));

    // Forgetting twice means the second REMOVE never reaches the client.
    let again = event(EventKind::Remove, Facility::Sink, 5, 2);
    assert_eq!(broker.check(&again, discard()).await, Decision::Block);
}

#[tokio::test]
async fn remove_for_an_unseen_object_is_blocked() {
    let (broker, _) = plain_broker();
    broker.client_put(&ClientInfo::new(5));

    let remove = event(EventKind::Remove, Facility::Sink, 5, 99);
    assert_eq!(broker.check(&remove, discard()).await, Decision::Block);
    assert!(!broker.client_has_seen(5, Facility::Sink, 99));
}

#[tokio::test]
async fn client_events_pass_only_for_the_client_itself() {
    let (broker, _) = plain_broker();
    broker.client_put(&ClientInfo::new(5));

    // The visibility probe for client objects is an ownership check.
    let own = event(EventKind::New, Facility::Client, 5, 5);
    assert_eq!(broker.check(&own, discard()).await, Decision::Allow);

    let other = event(EventKind::New, Facility::Client, 5, 6);
    assert_eq!(broker.check(&other, discard()).await, Decision::Block);
    assert!(!broker.client_has_seen(5, Facility::Client, 6));
}

#[tokio::test]
async fn seen_pairs_are_keyed_by_facility() {
    let (broker, _) = plain_broker();
    broker.client_put(&ClientInfo::new(5));

    let sink = event(EventKind::New, Facility::Sink, 5, 2);
    assert_eq!(broker.check(&sink, discard()).await, Decision::Allow);

    // Same index, different facility: not seen yet.
    let source_remove = event(EventKind::Remove, Facility::Source, 5, 2);
    assert_eq!(broker.check(&source_remove, discard()).await, Decision::Block);
    assert!(broker.client_has_seen(5, Facility::Sink, 2));
}

#[tokio::test]
async fn events_for_unknown_clients_are_blocked() {
    let (broker, _) = plain_broker();

    let new = event(EventKind::New, Facility::Sink, 99, 0);
    assert_eq!(broker.check(&new, discard()).await, Decision::Block);
}

#[tokio::test]
async fn malformed_event_words_are_blocked() {
    let (broker, _) = plain_broker();
    broker.client_put(&ClientInfo::new(5));

    // Kind bits outside NEW/CHANGE/REMOVE.
    let bad_kind = AccessRequest::event(5, Event::from_raw(0x0030), 0);
    assert_eq!(broker.check(&bad_kind, discard()).await, Decision::Block);

    // Facility code outside the known range.
    let bad_facility = AccessRequest::event(5, Event::from_raw(0x000b), 0);
    assert_eq!(broker.check(&bad_facility, discard()).await, Decision::Block);

    // Subscription hook without an event word at all.
    let wordless = AccessRequest::new(5, AccessHook::FilterSubscribeEvent, 0);
    assert_eq!(broker.check(&wordless, discard()).await, Decision::Block);
}

#[tokio::test]
async fn unlink_drops_the_seen_set() {
    let (broker, _) = plain_broker();
    broker.client_put(&ClientInfo::new(5));

    let new = event(EventKind::New, Facility::Sink, 5, 2);
    assert_eq!(broker.check(&new, discard()).await, Decision::Allow);

    broker.client_unlink(5);
    broker.client_put(&ClientInfo::new(5));

    // The fresh entry has no memory; a CHANGE is re-probed as first sight.
    assert!(!broker.client_has_seen(5, Facility::Sink, 2));
    let change = event(EventKind::Change, Facility::Sink, 5, 2);
    assert_eq!(broker.check(&change, discard()).await, Decision::Allow);
    assert!(broker.client_has_seen(5, Facility::Sink, 2));
}
