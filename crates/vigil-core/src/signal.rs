use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// 运行取消信号，可克隆，所有 worker 共享
#[derive(Debug, Clone)]
pub struct RunSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl RunSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// 取消运行
    pub fn cancel(&self) {
        if !self.is_cancelled() {
            info!("Run cancellation requested");
        }
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// 等待取消
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // 发送端由自身持有，不会提前关闭
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// 监听 SIGTERM / Ctrl+C，收到后取消运行
    pub fn listen_for_os_signals(&self) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                received = wait_for_os_signal() => {
                    if let Some(name) = received {
                        info!("Received {}, cancelling run", name);
                        signal.cancel();
                    }
                }
                _ = signal.cancelled() => {}
            }
        })
    }
}

impl Default for RunSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() -> Option<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).ok()?;
    let mut sigint = signal(SignalKind::interrupt()).ok()?;

    tokio::select! {
        _ = sigterm.recv() => Some("SIGTERM"),
        _ = sigint.recv() => Some("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() -> Option<&'static str> {
    tokio::signal::ctrl_c().await.ok().map(|_| "Ctrl+C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let signal = RunSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };

        assert!(!signal.is_cancelled());
        signal.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let signal = RunSignal::new();
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .unwrap();
    }
}
