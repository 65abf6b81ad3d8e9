use crate::record_store::StoreError;

/// An unbounded MPMC task queue backed by a flume channel.
///
/// Cloned handles share the same channel, so multiple worker tasks holding
/// clones compete for messages — the in-process equivalent of a queue with
/// competing consumers. Delivery is at least once from the pipeline's point
/// of view: a worker that fails mid-task re-enqueues its message.
pub struct TaskQueue<T> {
    name: String,
    tx: flume::Sender<T>,
    rx: flume::Receiver<T>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            name: name.into(),
            tx,
            rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish one task message.
    pub fn send(&self, msg: T) -> Result<(), StoreError> {
        self.tx
            .send(msg)
            .map_err(|_| StoreError::QueueClosed(self.name.clone()))
    }

    /// Await the next task message. Returns `None` once every sender has been
    /// dropped and the queue is drained.
    pub async fn recv(&self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking receive, for tests and drain loops.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_recv() {
        let q: TaskQueue<u32> = TaskQueue::new("to-be-analyzed");
        q.send(7).unwrap();
        q.send(9).unwrap();

        assert_eq!(q.len(), 2);
        assert_eq!(q.recv().await, Some(7));
        assert_eq!(q.recv().await, Some(9));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn clones_compete_for_messages() {
        let q: TaskQueue<u32> = TaskQueue::new("to-illustrate");
        let q2 = q.clone();
        q.send(1).unwrap();

        // Only one of the two handles gets the message.
        assert_eq!(q2.recv().await, Some(1));
        assert_eq!(q.try_recv(), None);
    }
}
