use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::error::{MonitorError, MonitorResult};

use super::notifier::ChangeNotifier;
use super::prober::Prober;
use super::store::TargetStore;
use super::types::{NOT_PROBED, StatusClass, Target};

/// Handle to one recurring probe task.
///
/// Clones share the same cancellation state. Once [`TaskHandle::cancel`]
/// returns, no result of that task is written to the store anymore.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    url: String,
    interval: Duration,
    cancelled: Arc<Mutex<bool>>,
}

impl TaskHandle {
    fn new(url: &str, interval: Duration) -> Self {
        Self { url: url.to_string(), interval, cancelled: Arc::new(Mutex::new(false)) }
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn cancel(&self) {
        *self.flag() = true;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag()
    }

    /// Run `apply` while holding the cancellation flag, unless cancelled.
    fn apply_unless_cancelled(&self, apply: impl FnOnce()) -> bool {
        let cancelled = self.flag();
        if *cancelled {
            return false;
        }
        apply();
        true
    }
}

struct ScheduledTask {
    handle: TaskHandle,
    join: JoinHandle<()>,
}

impl ScheduledTask {
    fn cancel(self) {
        self.handle.cancel();
        self.join.abort();
    }
}

/// Everything one probe task needs, moved into the spawned future
struct ProbeCycle {
    handle: TaskHandle,
    prober: Arc<dyn Prober>,
    store: Arc<TargetStore>,
    notifier: ChangeNotifier,
}

impl ProbeCycle {
    async fn run(self) {
        let mut timer = interval(self.handle.interval);
        // A slow probe pushes back only this target's next tick
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            if self.handle.is_cancelled() {
                break;
            }
            self.probe_and_apply().await;
        }

        debug!(url = %self.handle.url, "probe task finished");
    }

    async fn probe_and_apply(&self) {
        let url = self.handle.url();

        let status = match self.prober.probe(url).await {
            Ok(status) => status,
            Err(e) => {
                warn!(url = %url, error = %e, "probe failed");
                NOT_PROBED
            }
        };

        if !self.handle.apply_unless_cancelled(|| self.apply(status)) {
            debug!(url = %url, status, "discarding result of cancelled task");
        }
    }

    /// Delta-only write: the store and listeners are touched only on change
    fn apply(&self, status: u16) {
        let url = self.handle.url();

        let Some(current) = self.store.get(url) else {
            debug!(url = %url, "target no longer in store, ignoring result");
            return;
        };
        if current.last_status_code == status {
            return;
        }
        if !self.store.update_status(url, status) {
            return;
        }

        info!(
            name = %current.name,
            url = %url,
            previous = current.last_status_code,
            status,
            class = %StatusClass::of(status),
            "status changed"
        );
        self.notifier.on_change(&current.name, url, current.last_status_code, status);
    }
}

/// Owns one recurring probe task per target url
pub struct Scheduler {
    prober: Arc<dyn Prober>,
    store: Arc<TargetStore>,
    notifier: ChangeNotifier,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl Scheduler {
    pub fn new(prober: Arc<dyn Prober>, store: Arc<TargetStore>, notifier: ChangeNotifier) -> Self {
        Self { prober, store, notifier, tasks: Mutex::new(HashMap::new()) }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start probing `target` now and then every `target.frequency` seconds.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, target: &Target) -> MonitorResult<TaskHandle> {
        if target.frequency == 0 {
            return Err(MonitorError::InvalidTarget(format!(
                "frequency of {} must be at least one second",
                target.url
            )));
        }

        let mut tasks = self.tasks();

        if let Some(existing) = tasks.get(&target.url) {
            if !existing.handle.is_cancelled() {
                return Err(MonitorError::AlreadyScheduled(target.url.clone()));
            }
        }
        // A handle cancelled directly leaves a stale entry behind
        if let Some(stale) = tasks.remove(&target.url) {
            stale.cancel();
        }

        let handle = TaskHandle::new(&target.url, target.interval());
        let cycle = ProbeCycle {
            handle: handle.clone(),
            prober: self.prober.clone(),
            store: self.store.clone(),
            notifier: self.notifier.clone(),
        };
        let join = tokio::spawn(cycle.run());

        tasks.insert(target.url.clone(), ScheduledTask { handle: handle.clone(), join });
        info!(url = %target.url, frequency = target.frequency, "scheduled probe task");

        Ok(handle)
    }

    /// Cancel the task for `url`; an in-flight probe discards its result
    pub fn stop(&self, url: &str) -> MonitorResult<()> {
        let task = self
            .tasks()
            .remove(url)
            .ok_or_else(|| MonitorError::NotFound(url.to_string()))?;
        task.cancel();
        info!(url = %url, "stopped probe task");
        Ok(())
    }

    pub fn is_scheduled(&self, url: &str) -> bool {
        self.tasks().get(url).is_some_and(|task| !task.handle.is_cancelled())
    }

    /// Urls with a live task, sorted
    pub fn active_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .tasks()
            .iter()
            .filter(|(_, task)| !task.handle.is_cancelled())
            .map(|(url, _)| url.clone())
            .collect();
        urls.sort();
        urls
    }

    pub fn len(&self) -> usize {
        self.active_urls().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every task. Returns how many were registered.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<ScheduledTask> = self.tasks().drain().map(|(_, task)| task).collect();
        let count = drained.len();
        for task in drained {
            task.cancel();
        }
        if count > 0 {
            info!(count, "cancelled all probe tasks");
        }
        count
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::prober::ProbeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio::sync::broadcast::error::TryRecvError;

    const URL: &str = "http://x/health";

    /// Replays a fixed sequence of outcomes, repeating the last one
    struct ScriptedProber {
        responses: Vec<Result<u16, ProbeError>>,
        calls: AtomicUsize,
    }

    impl ScriptedProber {
        fn new(responses: Vec<Result<u16, ProbeError>>) -> Arc<Self> {
            Arc::new(Self { responses, calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, _url: &str) -> Result<u16, ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses[n.min(self.responses.len() - 1)].clone()
        }
    }

    /// Answers the first probe with 200; later probes block until released
    #[derive(Default)]
    struct GatedProber {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Prober for GatedProber {
        async fn probe(&self, _url: &str) -> Result<u16, ProbeError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(200);
            }
            self.entered.notify_one();
            self.release.notified().await;
            Ok(503)
        }
    }

    fn unreachable() -> ProbeError {
        ProbeError::Connect { url: URL.to_string(), reason: "connection refused".to_string() }
    }

    fn setup(prober: Arc<dyn Prober>) -> (Scheduler, Arc<TargetStore>, ChangeNotifier) {
        let store = Arc::new(TargetStore::new());
        let notifier = ChangeNotifier::new(16);
        let scheduler = Scheduler::new(prober, store.clone(), notifier.clone());
        (scheduler, store, notifier)
    }

    fn api_target(store: &TargetStore) -> Target {
        let target = Target::new("api", URL, 30);
        store.add(target.clone()).unwrap();
        target
    }

    #[tokio::test(start_paused = true)]
    async fn only_status_changes_are_written_and_announced() {
        let prober = ScriptedProber::new(vec![Ok(200), Ok(200), Ok(503)]);
        let (scheduler, store, notifier) = setup(prober.clone());
        let mut events = notifier.subscribe();
        let target = api_target(&store);

        scheduler.start(&target).unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!((first.previous, first.current), (0, 200));
        assert_eq!(first.name, "api");
        assert_eq!(store.status_of(URL), Some(200));

        // t+30 probe returns 200 again
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(prober.calls(), 2);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        // t+60 probe returns 503
        let second = events.recv().await.unwrap();
        assert_eq!((second.previous, second.current), (200, 503));
        assert_eq!(store.status_of(URL), Some(503));
        assert_eq!(prober.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_probe() {
        let prober = Arc::new(GatedProber::default());
        let (scheduler, store, notifier) = setup(prober.clone());
        let mut events = notifier.subscribe();
        let target = api_target(&store);

        scheduler.start(&target).unwrap();
        assert_eq!(events.recv().await.unwrap().current, 200);

        prober.entered.notified().await;
        scheduler.stop(URL).unwrap();
        prober.release.notify_one();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.status_of(URL), Some(200));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        assert!(!scheduler.is_scheduled(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_handle_blocks_late_write() {
        let prober = Arc::new(GatedProber::default());
        let (scheduler, store, notifier) = setup(prober.clone());
        let mut events = notifier.subscribe();
        let target = api_target(&store);

        let handle = scheduler.start(&target).unwrap();
        assert_eq!(events.recv().await.unwrap().current, 200);

        prober.entered.notified().await;
        // The task is not aborted here, so the probe really completes
        handle.cancel();
        prober.release.notify_one();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.status_of(URL), Some(200));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        assert!(handle.is_cancelled());
        assert!(!scheduler.is_scheduled(URL));
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let prober = ScriptedProber::new(vec![Ok(200)]);
        let (scheduler, store, _notifier) = setup(prober);
        let target = api_target(&store);

        scheduler.start(&target).unwrap();
        assert_eq!(
            scheduler.start(&target).unwrap_err(),
            MonitorError::AlreadyScheduled(URL.to_string())
        );
        assert_eq!(scheduler.active_urls(), vec![URL.to_string()]);
    }

    #[tokio::test]
    async fn start_replaces_a_cancelled_handle() {
        let prober = ScriptedProber::new(vec![Ok(200)]);
        let (scheduler, store, _notifier) = setup(prober);
        let target = api_target(&store);

        let first = scheduler.start(&target).unwrap();
        first.cancel();
        assert!(!scheduler.is_scheduled(URL));

        let second = scheduler.start(&target).unwrap();
        assert!(!second.is_cancelled());
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test]
    async fn stopping_twice_fails_cleanly() {
        let prober = ScriptedProber::new(vec![Ok(200)]);
        let (scheduler, store, _notifier) = setup(prober);
        let target = api_target(&store);

        scheduler.start(&target).unwrap();
        scheduler.stop(URL).unwrap();
        assert_eq!(scheduler.stop(URL), Err(MonitorError::NotFound(URL.to_string())));
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn zero_frequency_is_rejected() {
        let prober = ScriptedProber::new(vec![Ok(200)]);
        let (scheduler, _store, _notifier) = setup(prober);

        let result = scheduler.start(&Target::new("api", URL, 0));
        assert!(matches!(result, Err(MonitorError::InvalidTarget(_))));
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_records_sentinel_and_task_survives() {
        let prober = ScriptedProber::new(vec![Ok(200), Err(unreachable()), Ok(200)]);
        let (scheduler, store, notifier) = setup(prober.clone());
        let mut events = notifier.subscribe();
        let target = api_target(&store);

        scheduler.start(&target).unwrap();

        let transitions: Vec<(u16, u16)> = [
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| (e.previous, e.current))
        .collect();

        assert_eq!(transitions, vec![(0, 200), (200, NOT_PROBED), (NOT_PROBED, 200)]);
        assert!(scheduler.is_scheduled(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn result_for_unknown_target_is_ignored() {
        let prober = ScriptedProber::new(vec![Ok(200)]);
        let (scheduler, store, notifier) = setup(prober.clone());
        let mut events = notifier.subscribe();

        // Scheduled without a store entry
        scheduler.start(&Target::new("api", URL, 30)).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(prober.calls(), 1);
        assert!(store.is_empty());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_target_does_not_affect_others() {
        struct SplitProber;

        #[async_trait::async_trait]
        impl Prober for SplitProber {
            async fn probe(&self, url: &str) -> Result<u16, ProbeError> {
                if url.contains("down") {
                    Err(ProbeError::Timeout { url: url.to_string() })
                } else {
                    Ok(204)
                }
            }
        }

        let (scheduler, store, notifier) = setup(Arc::new(SplitProber));
        let mut events = notifier.subscribe();
        let down = Target::new("down", "http://down/", 5);
        let up = Target::new("up", "http://up/", 5);
        store.add(down.clone()).unwrap();
        store.add(up.clone()).unwrap();

        scheduler.start(&down).unwrap();
        scheduler.start(&up).unwrap();

        let change = events.recv().await.unwrap();
        assert_eq!(change.url, "http://up/");
        assert_eq!(change.current, 204);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(scheduler.active_urls(), vec!["http://down/".to_string(), "http://up/".to_string()]);
        assert_eq!(store.status_of("http://down/"), Some(NOT_PROBED));
    }

    #[tokio::test]
    async fn shutdown_cancels_every_task() {
        let prober = ScriptedProber::new(vec![Ok(200)]);
        let (scheduler, store, _notifier) = setup(prober);
        let mut handles = Vec::new();
        for i in 0..3 {
            let target = Target::new(format!("t{i}"), format!("http://t{i}/"), 10);
            store.add(target.clone()).unwrap();
            handles.push(scheduler.start(&target).unwrap());
        }

        assert_eq!(scheduler.shutdown(), 3);
        assert!(scheduler.is_empty());
        assert!(handles.iter().all(TaskHandle::is_cancelled));
    }
}
