use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

pub fn shutdown_signal() -> (ServerShutdownHandle, ServerShutdownSignal) {
    let (tx, rx) = oneshot::channel();

    (ServerShutdownHandle { tx }, ServerShutdownSignal { rx })
}

/// Triggers the paired `ServerShutdownSignal`, either explicitly or by being dropped.
pub struct ServerShutdownHandle {
    tx: oneshot::Sender<()>,
}

impl ServerShutdownHandle {
    pub fn shutdown(self) {
        let _ = self.tx.send(());
    }
}

/// Resolves once the paired handle is used or dropped. Pass to `HttpServer::run`.
pub struct ServerShutdownSignal {
    rx: oneshot::Receiver<()>,
}

impl Future for ServerShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Sent or dropped, both mean stop.
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn resolves_on_shutdown_or_drop() {
        let (handle, signal) = shutdown_signal();
        handle.shutdown();
        timeout(Duration::from_secs(1), signal).await.unwrap();

        let (handle, signal) = shutdown_signal();
        drop(handle);
        timeout(Duration::from_secs(1), signal).await.unwrap();
    }
}
