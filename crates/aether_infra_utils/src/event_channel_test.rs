use pretty_assertions::assert_eq;
use tokio::sync::mpsc::error::TryRecvError;

use crate::event_channel::EventChannel;

#[tokio::test]
async fn values_arrive_in_publish_order() {
    let channel = EventChannel::new();
    let mut subscription = channel.subscribe();

    channel.publish(1);
    channel.publish(2);
    channel.publish(3);

    assert_eq!(subscription.recv().await, Some(1));
    assert_eq!(subscription.recv().await, Some(2));
    assert_eq!(subscription.recv().await, Some(3));
}

#[tokio::test]
async fn all_subscribers_receive_each_value() {
    let channel = EventChannel::new();
    let mut first = channel.subscribe();
    let mut second = channel.subscribe();

    channel.publish("block");

    assert_eq!(first.recv().await, Some("block"));
    assert_eq!(second.recv().await, Some("block"));
}

#[tokio::test]
async fn replay_hands_last_value_to_new_subscriber() {
    let channel = EventChannel::with_replay();
    channel.publish(7);
    channel.publish(8);

    let mut subscription = channel.subscribe();
    // The replayed value is available synchronously, before any later publish.
    assert_eq!(subscription.try_recv(), Ok(8));

    channel.publish(9);
    assert_eq!(subscription.recv().await, Some(9));
}

#[tokio::test]
async fn no_replay_without_prior_publication() {
    let channel = EventChannel::<u64>::with_replay();
    let mut subscription = channel.subscribe();
    assert_eq!(subscription.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn plain_channel_does_not_replay() {
    let channel = EventChannel::new();
    channel.publish(1);

    let mut subscription = channel.subscribe();
    assert_eq!(subscription.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn dropped_subscription_does_not_block_others() {
    let channel = EventChannel::new();
    let first = channel.subscribe();
    let mut second = channel.subscribe();

    drop(first);
    channel.publish(42);

    assert_eq!(second.recv().await, Some(42));
}
