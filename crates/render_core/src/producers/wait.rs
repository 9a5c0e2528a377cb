//! Completion signals of asynchronous producer tasks
//!
//! Culling and level-of-detail tasks run outside the render thread. Each
//! task signals a [`CompletionSignal`] when its results are written; pipelines
//! declare which tasks they depend on and block on exactly those before
//! reading producer data.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Asynchronous producer tasks a pipeline can wait on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProducerTask {
    /// Model frustum culling
    ModelCulling,
    /// Vegetation frustum culling
    VegetationCulling,
    /// Vegetation level-of-detail selection
    VegetationLevelOfDetail,
    /// Terrain patch culling
    TerrainCulling,
    /// Culling against shadow-map views
    ShadowCulling,
    /// Interface layout
    UserInterfaceLayout,
}

#[derive(Debug, Default)]
struct SignalState {
    done: bool,
    generation: u64,
}

/// Reusable latch: set once per frame by a producer, waited on by consumers
#[derive(Debug, Default)]
pub struct CompletionSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

impl CompletionSignal {
    /// Create an unsignaled latch
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the work done and wake every waiter
    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.done = true;
        state.generation += 1;
        self.condvar.notify_all();
    }

    /// Re-arm for the next frame
    pub fn reset(&self) {
        self.state.lock().done = false;
    }

    /// Whether the work is done
    pub fn is_signaled(&self) -> bool {
        self.state.lock().done
    }

    /// Number of times the latch was signaled
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Block until signaled. There is no timeout.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while !state.done {
            self.condvar.wait(&mut state);
        }
    }
}

/// Registry of completion signals keyed by task
#[derive(Debug, Default, Clone)]
pub struct WaitPoints {
    signals: HashMap<ProducerTask, Arc<CompletionSignal>>,
}

impl WaitPoints {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal for a task, created on first use.
    ///
    /// Producers keep the returned handle and signal it from their worker.
    pub fn register(&mut self, task: ProducerTask) -> Arc<CompletionSignal> {
        Arc::clone(self.signals.entry(task).or_default())
    }

    /// Signal for a registered task
    pub fn signal_for(&self, task: ProducerTask) -> Option<&Arc<CompletionSignal>> {
        self.signals.get(&task)
    }

    /// Block until `task` is done. Unregistered tasks resolve immediately.
    pub fn wait_for(&self, task: ProducerTask) {
        if let Some(signal) = self.signals.get(&task) {
            log::trace!("Waiting for {:?}", task);
            signal.wait();
        }
    }

    /// Block on every task in order
    pub fn wait_all(&self, tasks: &[ProducerTask]) {
        for &task in tasks {
            self.wait_for(task);
        }
    }

    /// Re-arm every signal for the next frame
    pub fn reset_all(&self) {
        for signal in self.signals.values() {
            signal.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_blocks_until_signaled_from_another_thread() {
        let mut points = WaitPoints::new();
        let signal = points.register(ProducerTask::VegetationCulling);

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signal.signal();
        });

        points.wait_for(ProducerTask::VegetationCulling);
        let signal = points.signal_for(ProducerTask::VegetationCulling).unwrap();
        assert!(signal.is_signaled());
        assert_eq!(signal.generation(), 1);
        worker.join().unwrap();
    }

    #[test]
    fn unregistered_tasks_resolve_immediately() {
        let points = WaitPoints::new();
        points.wait_all(&[ProducerTask::ModelCulling, ProducerTask::ShadowCulling]);
    }

    #[test]
    fn reset_rearms_the_latch() {
        let mut points = WaitPoints::new();
        let signal = points.register(ProducerTask::TerrainCulling);
        signal.signal();
        points.reset_all();
        assert!(!signal.is_signaled());
        assert_eq!(Arc::strong_count(&signal), 2);
        assert!(Arc::ptr_eq(&signal, &points.register(ProducerTask::TerrainCulling)));
    }
}
