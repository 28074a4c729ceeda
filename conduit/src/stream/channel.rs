//! The stream primitive: one owning writer, any number of readers.

use crate::cancellation::CancellationToken;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Capacity used when none is configured.
pub const DEFAULT_CAPACITY: usize = 1;

/// Creates a stream with the given capacity.
///
/// The writer belongs to the producing task; the stream handle can be cloned
/// and shared between consumers. A capacity of zero is treated as one.
#[must_use]
pub fn channel<T>(capacity: usize) -> (StreamWriter<T>, Stream<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        StreamWriter { tx },
        Stream {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Why a value could not be delivered. The value is handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError<T> {
    /// The token fired before the value was accepted.
    Cancelled(T),
    /// Every reader of the stream has been dropped.
    Closed(T),
}

impl<T> SendError<T> {
    /// Returns the undelivered value.
    pub fn into_inner(self) -> T {
        match self {
            Self::Cancelled(value) | Self::Closed(value) => value,
        }
    }
}

/// The producing end of a [`Stream`].
///
/// There is exactly one writer per stream. The stream closes when the writer
/// is closed or dropped, including when its owning task unwinds.
#[derive(Debug)]
pub struct StreamWriter<T> {
    tx: mpsc::Sender<T>,
}

impl<T> StreamWriter<T> {
    /// Delivers `value`, racing the delivery against `token`.
    ///
    /// A token that has already fired wins over free capacity; the pending
    /// value is then returned undelivered.
    pub async fn send(&self, value: T, token: &CancellationToken) -> Result<(), SendError<T>> {
        if token.is_cancelled() {
            return Err(SendError::Cancelled(value));
        }

        tokio::select! {
            biased;
            () = token.cancelled() => Err(SendError::Cancelled(value)),
            permit = self.tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(value);
                    Ok(())
                }
                Err(_) => Err(SendError::Closed(value)),
            },
        }
    }

    /// Returns true once every reader has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Closes the stream. Readers drain buffered values, then see the end.
    pub fn close(self) {
        drop(self);
    }
}

/// The consuming end of an ordered, closable sequence.
///
/// Values arrive in the order they were sent. Clones share the sequence, so
/// each value reaches exactly one of them. Once closed, every `recv` returns
/// `None`, forever.
#[derive(Debug)]
pub struct Stream<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> Stream<T> {
    /// Receives the next value, or `None` once the stream is closed.
    pub async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Receives the next value unless `token` fires first.
    pub async fn recv_or_cancel(&self, token: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            () = token.cancelled() => None,
            value = self.recv() => value,
        }
    }

    /// Reads every remaining value until the stream closes.
    pub async fn collect(self) -> Vec<T> {
        let mut values = Vec::new();
        while let Some(value) = self.recv().await {
            values.push(value);
        }
        values
    }
}

impl<T: Send + 'static> Stream<T> {
    /// Adapts the stream into a [`futures::Stream`].
    pub fn into_values(self) -> impl futures::Stream<Item = T> + Send {
        futures::stream::unfold(self, |stream| async move {
            stream.recv().await.map(|value| (value, stream))
        })
    }
}
