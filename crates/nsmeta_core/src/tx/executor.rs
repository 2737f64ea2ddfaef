//! Retrying transaction executor.

use crate::error::{CoreError, CoreResult, FailureKind};
use crate::tx::aware::TransactionAware;
use crate::tx::interrupt::Interrupt;
use crate::tx::manager::TransactionManager;
use crate::tx::retry::RetryPolicy;
use crate::tx::state::Transaction;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A context for one attempt plus the participants enlisted with it.
pub struct Bound<C> {
    context: C,
    participants: Vec<Arc<dyn TransactionAware>>,
}

impl<C> Bound<C> {
    /// Wraps a context with no participants.
    pub fn new(context: C) -> Self {
        Self {
            context,
            participants: Vec::new(),
        }
    }

    /// Enlists a participant.
    #[must_use]
    pub fn with_participant(mut self, participant: Arc<dyn TransactionAware>) -> Self {
        self.participants.push(participant);
        self
    }

    /// Returns the context.
    pub fn context(&self) -> &C {
        &self.context
    }
}

type Binder<C> = Box<dyn Fn() -> CoreResult<Bound<C>> + Send + Sync>;

/// Runs closures inside transactions, retrying failed attempts as the
/// policy allows.
///
/// Every attempt gets a freshly bound context, so no buffered state leaks
/// from a failed attempt into the next. Sleeps between attempts happen on
/// the calling thread and can be cut short through
/// [`RetryingExecutor::interrupt_handle`], which stops the calls running
/// when it is raised, or through a caller's own token passed to
/// [`RetryingExecutor::execute_with`].
pub struct RetryingExecutor<C> {
    manager: Arc<TransactionManager>,
    policy: Arc<dyn RetryPolicy>,
    binder: Binder<C>,
    interrupt: Interrupt,
}

impl<C> RetryingExecutor<C> {
    /// Creates an executor.
    pub fn new<B>(manager: Arc<TransactionManager>, policy: Arc<dyn RetryPolicy>, binder: B) -> Self
    where
        B: Fn() -> CoreResult<Bound<C>> + Send + Sync + 'static,
    {
        Self {
            manager,
            policy,
            binder: Box::new(binder),
            interrupt: Interrupt::new(),
        }
    }

    /// Returns the handle that interrupts the retry sleeps of calls in
    /// progress. Calls started after a raise are not affected.
    #[must_use]
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Returns the transaction manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Runs `body` in a transaction until it commits or the policy gives up.
    ///
    /// # Errors
    ///
    /// Returns the failure of the last attempt: a conflict, an application
    /// failure raised by `body`, an initialization failure from binding the
    /// context, or [`CoreError::Interrupted`] if a retry sleep was
    /// interrupted.
    pub fn execute<R, F>(&self, body: F) -> CoreResult<R>
    where
        F: Fn(&C) -> CoreResult<R>,
    {
        let watch = self.interrupt.watch();
        self.retry(&body, |delay| watch.sleep(delay))
    }

    /// Like [`RetryingExecutor::execute`], but retry sleeps are cut short
    /// by `interrupt` instead of the executor's handle.
    ///
    /// A token that is already raised stops the call at its first retry.
    ///
    /// # Errors
    ///
    /// Same as [`RetryingExecutor::execute`].
    pub fn execute_with<R, F>(&self, interrupt: &Interrupt, body: F) -> CoreResult<R>
    where
        F: Fn(&C) -> CoreResult<R>,
    {
        self.retry(&body, |delay| interrupt.sleep(delay))
    }

    fn retry<R, F, S>(&self, body: &F, sleep: S) -> CoreResult<R>
    where
        F: Fn(&C) -> CoreResult<R>,
        S: Fn(Duration) -> CoreResult<()>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failure = match self.run_once(body) {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            match self.policy.next_delay(&failure, attempt) {
                Some(delay) => {
                    debug!(attempt, ?delay, error = %failure, "retrying transaction");
                    sleep(delay)?;
                }
                None => {
                    if failure.is_conflict() {
                        warn!(attempts = attempt, "giving up after repeated conflicts");
                    }
                    return Err(failure);
                }
            }
        }
    }

    fn run_once<R, F>(&self, body: &F) -> CoreResult<R>
    where
        F: Fn(&C) -> CoreResult<R>,
    {
        let bound = (self.binder)().map_err(|e| match e.kind() {
            FailureKind::Initialization => e,
            _ => CoreError::initialization("transaction context", e),
        })?;

        let mut tx = self.manager.begin();
        let outcome = match self.attempt(&bound, &mut tx, body) {
            Ok(value) => Ok(value),
            Err(failure) => {
                self.fail(&bound, &mut tx);
                Err(failure)
            }
        };
        self.reclaim(&bound);
        outcome
    }

    fn reclaim(&self, bound: &Bound<C>) {
        if bound.participants.is_empty() {
            return;
        }
        let horizon = self.manager.prune_horizon();
        for participant in &bound.participants {
            participant.reclaim(&horizon);
        }
    }

    fn attempt<R, F>(&self, bound: &Bound<C>, tx: &mut Transaction, body: &F) -> CoreResult<R>
    where
        F: Fn(&C) -> CoreResult<R>,
    {
        for participant in &bound.participants {
            participant.start_tx(tx)?;
        }

        let value = body(&bound.context).map_err(CoreError::into_application)?;

        let changes: HashSet<Vec<u8>> = bound
            .participants
            .iter()
            .flat_map(|p| p.tx_changes())
            .collect();
        self.manager.can_commit(tx, changes)?;

        for participant in &bound.participants {
            participant.commit_tx()?;
        }
        self.manager.commit(tx)?;

        for participant in &bound.participants {
            participant.post_tx_commit();
        }
        Ok(value)
    }

    fn fail(&self, bound: &Bound<C>, tx: &mut Transaction) {
        let mut clean = true;
        for participant in &bound.participants {
            if let Err(e) = participant.rollback_tx() {
                warn!(
                    txid = %tx.id(),
                    participant = participant.participant_name(),
                    error = %e,
                    "rollback failed"
                );
                clean = false;
            }
        }

        if clean {
            if let Err(e) = self.manager.abort(tx) {
                warn!(txid = %tx.id(), error = %e, "abort failed");
            }
        } else {
            warn!(txid = %tx.id(), "invalidating transaction");
            self.manager.invalidate(tx);
        }
    }
}

impl<C> fmt::Debug for RetryingExecutor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingExecutor")
            .field("policy", &self.policy)
            .field("interrupted", &self.interrupt.is_interrupted())
            .finish_non_exhaustive()
    }
}

/// Produces executors sharing one transaction manager and retry policy.
#[derive(Debug, Clone)]
pub struct TransactionExecutorFactory {
    manager: Arc<TransactionManager>,
    policy: Arc<dyn RetryPolicy>,
}

impl TransactionExecutorFactory {
    /// Creates a factory.
    pub fn new(manager: Arc<TransactionManager>, policy: Arc<dyn RetryPolicy>) -> Self {
        Self { manager, policy }
    }

    /// Creates an executor that binds a fresh context per attempt.
    pub fn create<C, B>(&self, binder: B) -> RetryingExecutor<C>
    where
        B: Fn() -> CoreResult<Bound<C>> + Send + Sync + 'static,
    {
        RetryingExecutor::new(Arc::clone(&self.manager), Arc::clone(&self.policy), binder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::retry::{NoRetry, RetryConfig};
    use crate::types::TransactionId;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use crate::tx::manager::PruneHorizon;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<&'static str>>,
        changes: Vec<Vec<u8>>,
        fail_rollback: bool,
        reclaims: AtomicU32,
    }

    impl Recorder {
        fn with_changes(keys: &[&str]) -> Self {
            Self {
                changes: keys.iter().map(|k| k.as_bytes().to_vec()).collect(),
                ..Self::default()
            }
        }

        fn events(&self) -> Vec<&'static str> {
            self.events.lock().clone()
        }
    }

    impl TransactionAware for Recorder {
        fn participant_name(&self) -> &str {
            "recorder"
        }

        fn start_tx(&self, _tx: &Transaction) -> CoreResult<()> {
            self.events.lock().push("start");
            Ok(())
        }

        fn tx_changes(&self) -> Vec<Vec<u8>> {
            self.changes.clone()
        }

        fn commit_tx(&self) -> CoreResult<()> {
            self.events.lock().push("commit");
            Ok(())
        }

        fn post_tx_commit(&self) {
            self.events.lock().push("post");
        }

        fn rollback_tx(&self) -> CoreResult<()> {
            self.events.lock().push("rollback");
            if self.fail_rollback {
                Err(CoreError::invalid_operation("cannot roll back"))
            } else {
                Ok(())
            }
        }

        fn reclaim(&self, _horizon: &PruneHorizon) {
            self.reclaims.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn conflict() -> CoreError {
        CoreError::Conflict {
            txid: TransactionId::new(1),
            conflicts: 1,
        }
    }

    fn executor(
        policy: Arc<dyn RetryPolicy>,
        participant: Arc<Recorder>,
    ) -> RetryingExecutor<()> {
        let manager = Arc::new(TransactionManager::new());
        RetryingExecutor::new(manager, policy, move || {
            Ok(Bound::new(()).with_participant(participant.clone()))
        })
    }

    #[test]
    fn successful_attempt_drives_participant() {
        let recorder = Arc::new(Recorder::with_changes(&["a"]));
        let exec = executor(Arc::new(RetryConfig::default()), recorder.clone());

        let value = exec.execute(|_| Ok(7)).unwrap();

        assert_eq!(value, 7);
        assert_eq!(recorder.events(), vec!["start", "commit", "post"]);
        assert_eq!(recorder.reclaims.load(Ordering::SeqCst), 1);
        assert_eq!(exec.manager().stats().committed, 1);
        assert_eq!(exec.manager().in_progress_count(), 0);
    }

    #[test]
    fn conflicts_retry_exactly_max_attempts() {
        let attempts = 4;
        let delay = Duration::from_millis(15);
        let recorder = Arc::new(Recorder::default());
        let exec = executor(
            Arc::new(RetryConfig::new().max_attempts(attempts).delay(delay)),
            recorder.clone(),
        );
        let calls = AtomicU32::new(0);

        let start = Instant::now();
        let err = exec
            .execute(|_| -> CoreResult<()> {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(conflict())
            })
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), attempts);
        assert!(start.elapsed() >= delay * (attempts - 1));
        assert_eq!(exec.manager().stats().aborted, u64::from(attempts));
    }

    #[test]
    fn application_failures_are_not_retried() {
        let recorder = Arc::new(Recorder::default());
        let exec = executor(Arc::new(RetryConfig::default()), recorder.clone());
        let calls = AtomicU32::new(0);

        let err = exec
            .execute(|_| -> CoreResult<()> {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::codec("boom"))
            })
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Application);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.events(), vec!["start", "rollback"]);
    }

    #[test]
    fn real_conflict_retried_until_commit() {
        let recorder = Arc::new(Recorder::with_changes(&["k"]));
        let exec = executor(
            Arc::new(RetryConfig::new().delay(Duration::ZERO)),
            recorder.clone(),
        );
        let manager = Arc::clone(exec.manager());
        let calls = AtomicU32::new(0);

        exec.execute(|_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let mut rival = manager.begin();
                manager.can_commit(&rival, HashSet::from([b"k".to_vec()]))?;
                manager.commit(&mut rival)?;
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.stats().conflicts, 1);
        assert_eq!(
            recorder.events(),
            vec!["start", "rollback", "start", "commit", "post"]
        );
    }

    #[test]
    fn failed_rollback_invalidates() {
        let recorder = Arc::new(Recorder {
            fail_rollback: true,
            ..Recorder::default()
        });
        let exec = executor(Arc::new(NoRetry), recorder);

        let err = exec
            .execute(|_| -> CoreResult<()> { Err(CoreError::codec("boom")) })
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Application);
        assert_eq!(exec.manager().stats().invalidated, 1);
        assert_eq!(exec.manager().invalid_count(), 1);
    }

    #[test]
    fn binder_failure_is_initialization() {
        let manager = Arc::new(TransactionManager::new());
        let exec: RetryingExecutor<()> =
            RetryingExecutor::new(manager, Arc::new(RetryConfig::default()), || {
                Err(CoreError::StoreLocked)
            });

        let err = exec.execute(|_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Initialization);
        assert_eq!(exec.manager().stats().started, 0);
    }

    #[test]
    fn interrupt_cuts_retry_sleep_short() {
        let recorder = Arc::new(Recorder::default());
        let exec = Arc::new(executor(
            Arc::new(RetryConfig::new().delay(Duration::from_secs(30))),
            recorder,
        ));
        let interrupt = exec.interrupt_handle();

        let start = Instant::now();
        let worker = {
            let exec = Arc::clone(&exec);
            thread::spawn(move || exec.execute(|_| -> CoreResult<()> { Err(conflict()) }))
        };
        thread::sleep(Duration::from_millis(30));
        interrupt.interrupt();

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, CoreError::Interrupted));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    fn conflict_once(calls: &AtomicU32) -> CoreResult<()> {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(conflict())
        } else {
            Ok(())
        }
    }

    #[test]
    fn earlier_interrupt_does_not_stop_later_call() {
        let recorder = Arc::new(Recorder::default());
        let exec = executor(
            Arc::new(RetryConfig::new().delay(Duration::from_millis(5))),
            recorder,
        );
        exec.interrupt_handle().interrupt();

        let calls = AtomicU32::new(0);
        exec.execute(|_| conflict_once(&calls)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let calls = AtomicU32::new(0);
        exec.execute(|_| conflict_once(&calls)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn caller_token_stops_only_its_own_call() {
        let recorder = Arc::new(Recorder::default());
        let exec = executor(
            Arc::new(RetryConfig::new().delay(Duration::from_millis(5))),
            recorder,
        );
        let token = Interrupt::new();
        token.interrupt();

        let calls = AtomicU32::new(0);
        let err = exec
            .execute_with(&token, |_| conflict_once(&calls))
            .unwrap_err();
        assert!(matches!(err, CoreError::Interrupted));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = AtomicU32::new(0);
        exec.execute(|_| conflict_once(&calls)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!exec.interrupt_handle().is_interrupted());
    }

    #[test]
    fn unbounded_retry_delay_is_interruptible() {
        let recorder = Arc::new(Recorder::default());
        let exec = Arc::new(executor(
            Arc::new(RetryConfig::new().delay(Duration::MAX)),
            recorder,
        ));
        let interrupt = exec.interrupt_handle();

        let worker = {
            let exec = Arc::clone(&exec);
            thread::spawn(move || exec.execute(|_| -> CoreResult<()> { Err(conflict()) }))
        };
        thread::sleep(Duration::from_millis(30));
        interrupt.interrupt();

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, CoreError::Interrupted));
    }

    #[test]
    fn rejected_writer_never_reaches_commit_tx() {
        let recorder = Arc::new(Recorder::with_changes(&["k"]));
        let exec = executor(Arc::new(NoRetry), recorder.clone());
        let manager = Arc::clone(exec.manager());

        let mut rival = manager.begin();
        manager
            .can_commit(&rival, HashSet::from([b"k".to_vec()]))
            .unwrap();

        let err = exec.execute(|_| Ok(())).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(recorder.events(), vec!["start", "rollback"]);
        manager.commit(&mut rival).unwrap();
    }

    #[test]
    fn factory_shares_manager() {
        let manager = Arc::new(TransactionManager::new());
        let factory = TransactionExecutorFactory::new(Arc::clone(&manager), Arc::new(NoRetry));
        let a: RetryingExecutor<u8> = factory.create(|| Ok(Bound::new(1)));
        let b: RetryingExecutor<u8> = factory.create(|| Ok(Bound::new(2)));

        assert_eq!(a.execute(|c| Ok(*c)).unwrap(), 1);
        assert_eq!(b.execute(|c| Ok(*c)).unwrap(), 2);
        assert_eq!(manager.stats().committed, 2);
    }
}
