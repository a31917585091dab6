use chatrelay::Response;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("client outbound queue full")]
    QueueFull,

    #[error("connection closed")]
    Closed,
}

/// Handle onto one connection's outbound queue. The connection's writer task
/// owns the receiving end and is the only thing that touches the socket.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::Sender<Response>,
}

impl Outbox {
    pub fn new(tx: mpsc::Sender<Response>) -> Self {
        Self { tx }
    }

    /// Create an outbox and the receiver its writer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Response>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Queue a response without waiting. Never blocks on the peer.
    pub fn deliver(&self, response: Response) -> Result<(), DeliveryError> {
        match self.tx.try_send(response) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(DeliveryError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Queue an answer to the owning connection's own request, waiting for
    /// room. Cross-connection traffic goes through [`Outbox::deliver`].
    pub async fn send(&self, response: Response) -> Result<(), DeliveryError> {
        self.tx
            .send(response)
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay::Operation;

    #[test]
    fn full_and_closed_queues() {
        let (outbox, mut rx) = Outbox::channel(1);
        outbox
            .deliver(Response::ok(Operation::GetUsers, "first"))
            .unwrap();
        assert_eq!(
            outbox.deliver(Response::ok(Operation::GetUsers, "second")),
            Err(DeliveryError::QueueFull)
        );
        assert_eq!(rx.try_recv().unwrap().message, "first");

        drop(rx);
        assert!(outbox.is_closed());
        assert_eq!(
            outbox.deliver(Response::ok(Operation::GetUsers, "third")),
            Err(DeliveryError::Closed)
        );
    }

    #[tokio::test]
    async fn send_waits_for_room() {
        let (outbox, mut rx) = Outbox::channel(1);
        outbox
            .deliver(Response::ok(Operation::GetUsers, "broadcast filler"))
            .unwrap();

        let waiting = {
            let outbox = outbox.clone();
            tokio::spawn(async move { outbox.send(Response::ok(Operation::GetUsers, "answer")).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        assert_eq!(rx.recv().await.unwrap().message, "broadcast filler");
        waiting.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().message, "answer");

        drop(rx);
        assert_eq!(
            outbox.send(Response::ok(Operation::GetUsers, "late")).await,
            Err(DeliveryError::Closed)
        );
    }
}
