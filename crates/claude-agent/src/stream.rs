use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::process::ClaudeProcess;
use crate::types::{Message, QueryOptions};
use crate::Result;

/// Messages from one `claude` run, ending after the terminal `result` line.
///
/// A background task owns the child process. Closing the stream (dropping it
/// or calling [`QueryStream::shutdown`]) stops the task, which kills the child.
pub struct QueryStream {
    rx: mpsc::Receiver<Result<Message>>,
    task: Option<JoinHandle<()>>,
}

impl QueryStream {
    pub(crate) fn spawn(prompt: String, opts: QueryOptions) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            match ClaudeProcess::spawn(&prompt, &opts).await {
                Ok(process) => pump(process, tx).await,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
        Self {
            rx,
            task: Some(task),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_process(process: ClaudeProcess) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(pump(process, tx));
        Self {
            rx,
            task: Some(task),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_channel(rx: mpsc::Receiver<Result<Message>>) -> Self {
        Self { rx, task: None }
    }

    /// Close the stream and wait until the child has been killed and reaped.
    pub async fn shutdown(mut self) {
        self.rx.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "claude stream task failed");
            }
        }
    }
}

/// Forward messages until the result line, EOF, or a closed receiver. A child
/// that exits without a result line surfaces its exit status and stderr.
async fn pump(mut process: ClaudeProcess, tx: mpsc::Sender<Result<Message>>) {
    let mut finished = false;
    loop {
        let next = tokio::select! {
            item = process.next_message() => Some(item),
            _ = tx.closed() => None,
        };
        let Some(item) = next else {
            tracing::debug!("stream closed before the result line, killing claude");
            process.kill().await;
            return;
        };
        let stop = match &item {
            Ok(Some(Message::Result(_))) => {
                finished = true;
                true
            }
            Ok(Some(_)) => false,
            Ok(None) => break,
            Err(_) => true,
        };
        let Some(item) = item.transpose() else {
            break;
        };
        if tx.send(item).await.is_err() || stop {
            break;
        }
    }
    if !finished && !tx.is_closed() {
        if let Some(err) = process.exit_error().await {
            let _ = tx.send(Err(err)).await;
        }
    }
    process.kill().await;
}

impl Stream for QueryStream {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
