//! Synchronous event dispatch
//!
//! `publish` returns only after every matching subscriber has handled the event.
//! Subscribers run in registration order against a snapshot of the list taken under
//! the registration lock, so a registration made during an in-flight publish is seen
//! by the next publish, not this one.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use super::event::{Event, now_secs};
use crate::subscriber::{Subscriber, lock};

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Arc<dyn Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber; registering the same one twice delivers twice
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) {
        log::debug!("Registering subscriber {}", subscriber.name());
        lock(&self.subscribers).push(subscriber);
    }

    /// Stamp the event if needed and deliver it to every interested subscriber
    ///
    /// Errors and panics raised by a subscriber are logged with its name and do not
    /// reach the caller or stop delivery to the remaining subscribers.
    pub fn publish(&self, mut event: Event) {
        if event.timestamp.is_none() {
            event.timestamp = Some(now_secs());
        }

        let snapshot: Vec<Arc<dyn Subscriber>> = lock(&self.subscribers).clone();

        for subscriber in snapshot.iter().filter(|s| s.should_handle(&event.event_type)) {
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber.handle(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("Error in subscriber {}: {:#}", subscriber.name(), e);
                }
                Err(payload) => {
                    log::error!(
                        "Subscriber {} panicked handling {} event: {}",
                        subscriber.name(),
                        event.event_type,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub fn subscriber_names(&self) -> Vec<String> {
        lock(&self.subscribers).iter().map(|s| s.name().to_string()).collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
