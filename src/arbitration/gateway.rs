use crate::arbitration::arbiter::{
    Arbiter, ArbiterBinding, ArbiterError, ArbitrationRequest, ArbitrationResponse,
};
use crate::core::error::LedgerError;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Note attached to settlements that had no arbiter.
pub const IDENTITY_NOTE: &str = "no arbiter";

const OUTSTANDING: &str = "previous call still outstanding";

type Reply = Result<ArbitrationResponse, ArbiterError>;

struct Job {
    request: ArbitrationRequest,
    reply: Sender<Reply>,
}

/// The single thread that talks to one registered arbiter.
///
/// `busy` is set by the caller before a job is queued and cleared by the
/// thread once the arbiter returns, so at most one call is ever pending.
struct Worker {
    arbiter: Arc<dyn Arbiter>,
    jobs: Sender<Job>,
    busy: Arc<AtomicBool>,
}

/// Decrements the live-worker count when a worker thread exits.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registry of arbiters and the bounded, retrying call path into them.
pub struct ArbiterGateway {
    workers: DashMap<String, Worker>,
    live: Arc<AtomicUsize>,
    timeout: Duration,
    retries: u32,
}

impl ArbiterGateway {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self {
            workers: DashMap::new(),
            live: Arc::new(AtomicUsize::new(0)),
            timeout,
            retries,
        }
    }

    /// Register an arbiter under its `arbiter_id()` and start its worker.
    ///
    /// Replacing an arbiter closes the old worker's queue; that thread exits
    /// once any call it is still running returns.
    pub fn register(&self, arbiter: Arc<dyn Arbiter>) -> Result<(), LedgerError> {
        let id = arbiter.arbiter_id().to_string();
        let (jobs_tx, jobs_rx) = channel::unbounded::<Job>();
        let busy = Arc::new(AtomicBool::new(false));

        let thread_arbiter = Arc::clone(&arbiter);
        let thread_busy = Arc::clone(&busy);
        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(Arc::clone(&self.live));
        thread::Builder::new()
            .name(format!("arbiter-{id}"))
            .spawn(move || {
                let _guard = guard;
                for job in jobs_rx {
                    let result = thread_arbiter.arbitrate(&job.request);
                    thread_busy.store(false, Ordering::SeqCst);
                    // The caller may have timed out and gone.
                    let _ = job.reply.send(result);
                }
            })
            .map_err(|e| LedgerError::ArbiterUnavailable {
                arbiter: id.clone(),
                reason: format!("could not start arbiter worker: {e}"),
            })?;

        info!("registering arbiter {}", id);
        self.workers.insert(
            id,
            Worker {
                arbiter,
                jobs: jobs_tx,
                busy,
            },
        );
        Ok(())
    }

    pub fn unregister(&self, arbiter_id: &str) -> bool {
        self.workers.remove(arbiter_id).is_some()
    }

    pub fn is_registered(&self, arbiter_id: &str) -> bool {
        self.workers.contains_key(arbiter_id)
    }

    pub fn arbiter_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Worker threads still alive, including ones draining a call for an
    /// arbiter that has since been replaced or unregistered.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Whether the arbiter is still working on a call.
    pub fn in_flight(&self, arbiter_id: &str) -> bool {
        self.workers
            .get(arbiter_id)
            .map_or(false, |worker| worker.busy.load(Ordering::SeqCst))
    }

    /// Resolve a rail's arbiter reference into a binding.
    pub fn resolve(&self, arbiter_id: Option<&str>) -> Result<ArbiterBinding, LedgerError> {
        match arbiter_id {
            None => Ok(ArbiterBinding::Identity),
            Some(id) => self
                .workers
                .get(id)
                .map(|entry| ArbiterBinding::External(Arc::clone(&entry.value().arbiter)))
                .ok_or_else(|| LedgerError::ArbiterUnavailable {
                    arbiter: id.to_string(),
                    reason: "not registered".to_string(),
                }),
        }
    }

    /// Arbitrate one settlement span.
    ///
    /// The identity binding passes the request through unchanged. External
    /// arbiters get `1 + retries` attempts, each bounded by the timeout; the
    /// raw response is returned for the ledger to clamp. An arbiter still
    /// busy with an earlier call fails fast without queueing another.
    pub fn arbitrate(
        &self,
        binding: &ArbiterBinding,
        request: &ArbitrationRequest,
    ) -> Result<ArbitrationResponse, LedgerError> {
        let arbiter = match binding {
            ArbiterBinding::Identity => {
                return Ok(ArbitrationResponse {
                    modified_amount: request.amount,
                    settle_upto: request.to_epoch,
                    note: IDENTITY_NOTE.to_string(),
                })
            }
            ArbiterBinding::External(arbiter) => arbiter,
        };
        let id = arbiter.arbiter_id();

        let mut last_failure = String::new();
        for attempt in 0..=self.retries {
            match self.call_with_timeout(id, request) {
                Ok(response) => {
                    debug!(
                        "arbiter {} answered rail {} (attempt {}): {} up to {}",
                        id,
                        request.rail_id,
                        attempt + 1,
                        response.modified_amount,
                        response.settle_upto
                    );
                    return Ok(response);
                }
                Err(CallFailure::Busy) => {
                    warn!("arbiter {} busy, rail {} not arbitrated", id, request.rail_id);
                    if last_failure.is_empty() {
                        last_failure = OUTSTANDING.to_string();
                    } else {
                        last_failure = format!("{last_failure}; {OUTSTANDING}");
                    }
                    break;
                }
                Err(CallFailure::Failed(reason)) => {
                    warn!(
                        "arbiter {} failed for rail {} (attempt {}): {}",
                        id,
                        request.rail_id,
                        attempt + 1,
                        reason
                    );
                    last_failure = reason;
                }
            }
        }
        Err(LedgerError::ArbiterUnavailable {
            arbiter: id.to_string(),
            reason: last_failure,
        })
    }

    /// Hand the request to the arbiter's worker and wait at most `timeout`.
    ///
    /// A timed-out call keeps the worker busy until the arbiter returns;
    /// its late answer is dropped.
    fn call_with_timeout(
        &self,
        arbiter_id: &str,
        request: &ArbitrationRequest,
    ) -> Result<ArbitrationResponse, CallFailure> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        {
            let worker = self
                .workers
                .get(arbiter_id)
                .ok_or_else(|| CallFailure::Failed("not registered".to_string()))?;
            if worker
                .busy
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(CallFailure::Busy);
            }
            let job = Job {
                request: request.clone(),
                reply: reply_tx,
            };
            if worker.jobs.send(job).is_err() {
                worker.busy.store(false, Ordering::SeqCst);
                return Err(CallFailure::Failed("arbiter worker stopped".to_string()));
            }
        }

        match reply_rx.recv_timeout(self.timeout) {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(ArbiterError::Rejected(reason))) => {
                Err(CallFailure::Failed(format!("rejected: {reason}")))
            }
            Ok(Err(ArbiterError::Backend(reason))) => {
                Err(CallFailure::Failed(format!("backend failure: {reason}")))
            }
            Err(RecvTimeoutError::Timeout) => Err(CallFailure::Failed(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CallFailure::Failed("arbiter worker died".to_string()))
            }
        }
    }
}

enum CallFailure {
    Busy,
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::party::PartyId;
    use crate::core::token::TokenId;
    use crate::rail::model::RailId;
    use rust_decimal_macros::dec;
    use crossbeam::channel::Receiver;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    fn request() -> ArbitrationRequest {
        ArbitrationRequest {
            token: TokenId::new("USDFC"),
            payer: PartyId::new("client"),
            payee: PartyId::new("provider"),
            rail_id: RailId::new(1),
            from_epoch: 0,
            to_epoch: 10,
            amount: dec!(100),
        }
    }

    struct Halving;

    impl Arbiter for Halving {
        fn arbiter_id(&self) -> &str {
            "halving"
        }

        fn arbitrate(
            &self,
            request: &ArbitrationRequest,
        ) -> Result<ArbitrationResponse, ArbiterError> {
            Ok(ArbitrationResponse {
                modified_amount: request.amount / dec!(2),
                settle_upto: request.to_epoch,
                note: "half service".to_string(),
            })
        }
    }

    /// Fails a fixed number of times before answering.
    struct Flaky {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl Arbiter for Flaky {
        fn arbiter_id(&self) -> &str {
            "flaky"
        }

        fn arbitrate(
            &self,
            request: &ArbitrationRequest,
        ) -> Result<ArbitrationResponse, ArbiterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ArbiterError::Backend("proof log unreachable".into()));
            }
            Ok(ArbitrationResponse {
                modified_amount: request.amount,
                settle_upto: request.to_epoch,
                note: "ok".to_string(),
            })
        }
    }

    struct Sleepy;

    impl Arbiter for Sleepy {
        fn arbiter_id(&self) -> &str {
            "sleepy"
        }

        fn arbitrate(
            &self,
            request: &ArbitrationRequest,
        ) -> Result<ArbitrationResponse, ArbiterError> {
            thread::sleep(Duration::from_millis(500));
            Ok(ArbitrationResponse {
                modified_amount: request.amount,
                settle_upto: request.to_epoch,
                note: "late".to_string(),
            })
        }
    }

    #[test]
    fn test_identity_passes_through() {
        let gateway = ArbiterGateway::new(Duration::from_millis(100), 1);
        let response = gateway
            .arbitrate(&ArbiterBinding::Identity, &request())
            .unwrap();
        assert_eq!(response.modified_amount, dec!(100));
        assert_eq!(response.settle_upto, 10);
        assert_eq!(response.note, IDENTITY_NOTE);
    }

    #[test]
    fn test_resolve_registered_and_missing() {
        let gateway = ArbiterGateway::new(Duration::from_millis(100), 1);
        gateway.register(Arc::new(Halving)).unwrap();
        assert!(matches!(gateway.resolve(None), Ok(ArbiterBinding::Identity)));
        assert_eq!(gateway.resolve(Some("halving")).unwrap().name(), "halving");
        assert!(matches!(
            gateway.resolve(Some("missing")),
            Err(LedgerError::ArbiterUnavailable { .. })
        ));
        assert_eq!(gateway.arbiter_ids(), vec!["halving".to_string()]);
        assert!(gateway.unregister("halving"));
        assert!(!gateway.is_registered("halving"));
    }

    #[test]
    fn test_external_arbiter_response_returned() {
        let gateway = ArbiterGateway::new(Duration::from_millis(500), 0);
        gateway.register(Arc::new(Halving)).unwrap();
        let binding = gateway.resolve(Some("halving")).unwrap();
        let response = gateway.arbitrate(&binding, &request()).unwrap();
        assert_eq!(response.modified_amount, dec!(50));
        assert_eq!(response.note, "half service");
    }

    #[test]
    fn test_retry_once_then_succeed() {
        let gateway = ArbiterGateway::new(Duration::from_millis(500), 1);
        let flaky = Arc::new(Flaky {
            failures_left: AtomicU32::new(1),
            calls: AtomicU32::new(0),
        });
        gateway.register(flaky.clone()).unwrap();
        let binding = gateway.resolve(Some("flaky")).unwrap();
        assert!(gateway.arbitrate(&binding, &request()).is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retries_exhausted() {
        let gateway = ArbiterGateway::new(Duration::from_millis(500), 1);
        let flaky = Arc::new(Flaky {
            failures_left: AtomicU32::new(5),
            calls: AtomicU32::new(0),
        });
        gateway.register(flaky.clone()).unwrap();
        let binding = gateway.resolve(Some("flaky")).unwrap();
        let err = gateway.arbitrate(&binding, &request()).unwrap_err();
        assert!(matches!(err, LedgerError::ArbiterUnavailable { ref arbiter, .. } if arbiter == "flaky"));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_timeout_reports_unavailable() {
        let gateway = ArbiterGateway::new(Duration::from_millis(20), 0);
        gateway.register(Arc::new(Sleepy)).unwrap();
        let binding = gateway.resolve(Some("sleepy")).unwrap();
        match gateway.arbitrate(&binding, &request()) {
            Err(LedgerError::ArbiterUnavailable { reason, .. }) => {
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    /// Blocks every call until the gate is released or dropped.
    struct Hanging {
        gate: Receiver<()>,
        calls: AtomicU32,
    }

    impl Arbiter for Hanging {
        fn arbiter_id(&self) -> &str {
            "hanging"
        }

        fn arbitrate(
            &self,
            request: &ArbitrationRequest,
        ) -> Result<ArbitrationResponse, ArbiterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.recv();
            Ok(ArbitrationResponse {
                modified_amount: request.amount,
                settle_upto: request.to_epoch,
                note: "released".to_string(),
            })
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_hanging_arbiter_keeps_one_worker() {
        let gateway = ArbiterGateway::new(Duration::from_millis(200), 2);
        let (release, gate) = channel::unbounded();
        let hanging = Arc::new(Hanging {
            gate,
            calls: AtomicU32::new(0),
        });
        gateway.register(hanging.clone()).unwrap();
        let binding = gateway.resolve(Some("hanging")).unwrap();
        let workers = gateway.live_workers();

        for _ in 0..5 {
            match gateway.arbitrate(&binding, &request()) {
                Err(LedgerError::ArbiterUnavailable { reason, .. }) => {
                    assert!(reason.contains(OUTSTANDING), "{reason}");
                }
                other => panic!("expected unavailable, got {other:?}"),
            }
            assert_eq!(gateway.live_workers(), workers);
            assert!(gateway.in_flight("hanging"));
        }
        assert_eq!(hanging.calls.load(Ordering::SeqCst), 1);

        release.send(()).unwrap();
        wait_until(|| !gateway.in_flight("hanging"));
        release.send(()).unwrap();
        let response = gateway.arbitrate(&binding, &request()).unwrap();
        assert_eq!(response.note, "released");
        assert_eq!(hanging.calls.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.live_workers(), workers);
    }

    #[test]
    fn test_unregister_stops_worker() {
        let gateway = ArbiterGateway::new(Duration::from_millis(100), 0);
        gateway.register(Arc::new(Halving)).unwrap();
        assert_eq!(gateway.live_workers(), 1);
        gateway.register(Arc::new(Halving)).unwrap();
        wait_until(|| gateway.live_workers() == 1);
        assert!(gateway.unregister("halving"));
        wait_until(|| gateway.live_workers() == 0);
    }
}
