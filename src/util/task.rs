//! Task spawning from sync entry points

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Runtime handle captured at construction, so services can spawn their
/// timers and restores when called from a thread outside the runtime
#[derive(Debug, Clone)]
pub struct Spawner {
    runtime: Option<Handle>,
}

impl Spawner {
    /// Capture the runtime of the calling context, if any
    pub fn current() -> Self {
        Self {
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match &self.runtime {
            Some(handle) => handle.spawn(future),
            None => tokio::spawn(future),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawns_from_a_foreign_thread() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let spawner = runtime.block_on(async { Spawner::current() });

        let task = std::thread::spawn(move || spawner.spawn(async { 7 }))
            .join()
            .unwrap();
        assert_eq!(runtime.block_on(task).unwrap(), 7);
    }
}
