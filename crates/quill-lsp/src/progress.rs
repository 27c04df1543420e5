// ABOUTME: Periodic "still working" notifications while a remote generation call is in flight
// ABOUTME: Heartbeats via window/showMessage and reports total elapsed time on finish

use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use lsp_server::{Message, Notification};
use lsp_types::{MessageType, ShowMessageParams, notification::Notification as _};
use tokio_util::sync::CancellationToken;

/// Heartbeat loop for one in-flight generation. `finish` consumes the
/// reporter, waits for the loop to exit, and only then sends the final
/// message, so no heartbeat can fire afterwards. Dropping the reporter
/// without `finish` (the request unwound) also stops the loop, just
/// without the final message.
pub struct ProgressReporter {
    sender: Sender<Message>,
    started: Instant,
    cancel: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn start(sender: Sender<Message>, interval: Duration) -> Self {
        let started = Instant::now();
        let cancel = CancellationToken::new();

        let loop_sender = sender.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let seconds = started.elapsed().as_secs();
                        show_message(&loop_sender, format!("⏳ AI completion ({seconds}s)"));
                    }
                }
            }
        });

        Self {
            sender,
            started,
            cancel,
            handle: Some(handle),
        }
    }

    pub async fn finish(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        show_message(&self.sender, format!("✓ AI completion ({elapsed:.1}s)"));
    }
}

// The heartbeat task must never outlive its request.
impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn show_message(sender: &Sender<Message>, message: String) {
    let params = ShowMessageParams {
        typ: MessageType::INFO,
        message,
    };
    let _ = sender.send(Message::Notification(Notification {
        method: lsp_types::notification::ShowMessage::METHOD.to_string(),
        params: serde_json::to_value(params).unwrap_or_default(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_heartbeat_after_finish() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let reporter = ProgressReporter::start(sender, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(35)).await;
        reporter.finish().await;

        let drained: Vec<Message> = receiver.try_iter().collect();
        assert!(!drained.is_empty());
        // The completion message is the last thing ever sent.
        assert!(receiver.try_recv().is_err());
        match drained.last().unwrap() {
            Message::Notification(note) => {
                let params: ShowMessageParams = serde_json::from_value(note.params.clone()).unwrap();
                assert!(params.message.starts_with("✓ AI completion"));
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drop_stops_heartbeats_without_final_message() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let reporter = ProgressReporter::start(sender, Duration::from_millis(10));
        drop(reporter);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finish_without_ticks_still_reports() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let reporter = ProgressReporter::start(sender, Duration::from_secs(60));
        reporter.finish().await;

        let drained: Vec<Message> = receiver.try_iter().collect();
        assert_eq!(drained.len(), 1);
    }
}
