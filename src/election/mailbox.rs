use tokio::sync::mpsc;

use crate::election::message::{Envelope, Message};
use crate::election::Rank;
use crate::error::{ElectionError, Result};

/// Create a mailbox for the node with the given rank.
///
/// The sender half is shared with every peer through the registry; the
/// receiving half is owned by the node's processing loop.
pub fn mailbox(owner: Rank) -> (MailboxSender, Mailbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MailboxSender { owner, tx }, Mailbox { owner, rx })
}

/// Enqueue side of a node's mailbox. Cheap to clone, safe to use from any
/// number of tasks at once.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    owner: Rank,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl MailboxSender {
    pub fn owner(&self) -> Rank {
        self.owner
    }

    /// Append `(from, message)` to the tail of the mailbox.
    ///
    /// Never waits on the receiving node. Fails only once the owner has
    /// terminated and dropped its mailbox, in which case the message is
    /// discarded.
    pub fn receive(&self, from: Rank, message: Message) -> Result<()> {
        self.tx
            .send(Envelope::new(from, message))
            .map_err(|_| ElectionError::MailboxClosed(self.owner))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Dequeue side of a node's mailbox, in arrival order.
#[derive(Debug)]
pub struct Mailbox {
    owner: Rank,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Mailbox {
    pub fn owner(&self) -> Rank {
        self.owner
    }

    /// Remove and return the head entry, or `None` if the mailbox is empty.
    pub fn dequeue(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next entry. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Stop accepting new entries. Already queued entries stay dequeueable.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
