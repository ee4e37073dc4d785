use futures::Future;
use iced_futures::{Executor, MaybeSend};
use tokio::runtime::{Builder, Runtime};

/// Multi-threaded tokio runtime shared by the window and the bluetooth controller.
pub struct MyExecutor(Runtime);

impl Executor for MyExecutor {
    fn new() -> Result<Self, futures::io::Error> {
        Builder::new_multi_thread()
            .enable_all()
            .thread_name("ble-monitor-worker")
            .build()
            .map(MyExecutor)
    }

    fn spawn(&self, future: impl Future<Output = ()> + MaybeSend + 'static) {
        let _ = self.0.spawn(future);
    }

    fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.0.enter();
        f()
    }
}
