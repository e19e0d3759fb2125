use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Re-run `probe` every `interval` until it yields a value or `timeout` elapses.
///
/// The probe always runs at least once.
pub(crate) async fn poll_for<T, F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(found) = probe().await {
            return Some(found);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        sleep(interval.min(deadline - now)).await;
    }
}

/// [`poll_for`] over a yes/no probe.
pub(crate) async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_for(timeout, interval, || {
        let ready = probe();
        async move { ready.await.then_some(()) }
    })
    .await
    .is_some()
}

/// Optional operator-configured pause; zero is a no-op.
pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay).await;
    }
}
