//! Typed update channel between the controller and its subscribers.

use tokio::sync::mpsc;

use super::SessionUpdate;

/// Receiving end of a subscription. Updates arrive in processing order.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<SessionUpdate>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next update; `None` after unsubscribe or controller drop.
    pub async fn recv(&mut self) -> Option<SessionUpdate> {
        self.receiver.recv().await
    }

    /// Next update if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionUpdate> {
        self.receiver.try_recv().ok()
    }

    /// Every update queued right now.
    pub fn drain(&mut self) -> Vec<SessionUpdate> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    senders: Vec<(u64, mpsc::UnboundedSender<SessionUpdate>)>,
}

impl Subscribers {
    pub(crate) fn subscribe(&mut self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        self.senders.push((id, sender));
        Subscription { id, receiver }
    }

    pub(crate) fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.senders.len();
        self.senders.retain(|(existing, _)| *existing != id);
        self.senders.len() != before
    }

    /// Deliver to every live subscriber, pruning dropped receivers.
    pub(crate) fn publish(&mut self, update: SessionUpdate) {
        self.senders
            .retain(|(_, sender)| sender.send(update.clone()).is_ok());
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }
}
