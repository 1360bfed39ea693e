//! Background writer for queued pages.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Message sent to the background writer.
#[derive(Debug)]
pub(crate) enum WriterCommand {
    /// The session has queued pages.
    Flush(String),
    /// Stop after handling everything sent before.
    Shutdown,
}

/// Something holding per-session queues of pages to write.
#[async_trait]
pub(crate) trait PendingPages: Send + Sync {
    /// Writes out the queued pages of a session.
    async fn flush_pending(&self, session_id: &str);
}

/// Task writing queued pages to disk.
pub(crate) struct PageSavingTask {
    handle: JoinHandle<()>,
}

impl PageSavingTask {
    /// Spawns the writer on the current runtime.
    pub fn spawn(
        pending: Arc<dyn PendingPages>,
        commands: mpsc::UnboundedReceiver<WriterCommand>,
    ) -> Self {
        let handle = tokio::spawn(run(pending, commands));
        Self { handle }
    }

    /// Waits for the writer to stop.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            debug!("Page saving task ended abnormally: {}", e);
        }
    }
}

async fn run(pending: Arc<dyn PendingPages>, mut commands: mpsc::UnboundedReceiver<WriterCommand>) {
    debug!("Page saving task started");

    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Flush(session_id) => pending.flush_pending(&session_id).await,
            WriterCommand::Shutdown => break,
        }
    }

    info!("Page saving task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        flushed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PendingPages for Recorder {
        async fn flush_pending(&self, session_id: &str) {
            self.flushed.lock().push(session_id.to_string());
        }
    }

    #[tokio::test]
    async fn test_flushes_in_order_until_shutdown() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let task = PageSavingTask::spawn(recorder.clone(), rx);

        tx.send(WriterCommand::Flush("a".to_string())).unwrap();
        tx.send(WriterCommand::Flush("b".to_string())).unwrap();
        tx.send(WriterCommand::Shutdown).unwrap();
        task.join().await;

        assert_eq!(*recorder.flushed.lock(), vec!["a", "b"]);
        assert!(tx.send(WriterCommand::Flush("c".to_string())).is_err());
    }

    #[tokio::test]
    async fn test_stops_when_sender_is_dropped() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let task = PageSavingTask::spawn(recorder, rx);
        drop(tx);
        task.join().await;
    }
}
