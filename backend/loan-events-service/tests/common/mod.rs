//! In-memory stand-ins for Kafka and Postgres
#![allow(dead_code)]

use async_trait::async_trait;
use loan_events_service::error::{PersistenceError, PublishError, TransportError};
use loan_events_service::services::{
    ConsumerSettings, DeadLetterRecord, DeadLetterSink, EventPublisher, EventSink, EventSource,
    MessagePosition, SourceMessage, WriteMode,
};
use loan_events_service::{DeliveryGuarantee, LoanEvent, LoanStatus};
use resilience::RetryConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TOPIC: &str = "loan-events";

pub fn settings(delivery: DeliveryGuarantee) -> ConsumerSettings {
    ConsumerSettings {
        poll_timeout: Duration::from_millis(100),
        error_backoff: Duration::from_millis(10),
        persist_timeout: Duration::from_secs(1),
        delivery,
        retry: RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
        },
    }
}

pub fn loan(loan_id: &str, amount: f64, status: LoanStatus) -> LoanEvent {
    LoanEvent {
        loan_id: loan_id.to_string(),
        user_id: format!("user-{}", loan_id),
        amount,
        status,
        timestamp: 1_700_000_000,
    }
}

#[derive(Default)]
struct BusState {
    log: Vec<Vec<u8>>,
    /// Next offset to read after a restart
    committed: Option<i64>,
    commit_calls: u32,
    failing_polls: u32,
}

/// Single-partition topic shared by publishers and consumers
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_raw(&self, payload: &[u8]) {
        self.state.lock().unwrap().log.push(payload.to_vec());
    }

    pub fn push_event(&self, event: &LoanEvent) {
        self.push_raw(&event.to_payload().unwrap());
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().log.len()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn committed(&self) -> Option<i64> {
        self.state.lock().unwrap().committed
    }

    pub fn commit_calls(&self) -> u32 {
        self.state.lock().unwrap().commit_calls
    }

    /// Make the next `n` polls fail with a transport error
    pub fn fail_next_polls(&self, n: u32) {
        self.state.lock().unwrap().failing_polls = n;
    }

    /// A consumer starting from the committed offset, like a fresh group member
    pub fn consumer(&self) -> BusConsumer {
        let cursor = self.committed().unwrap_or(0);
        BusConsumer {
            bus: self.clone(),
            cursor,
        }
    }
}

impl EventPublisher for InMemoryBus {
    fn publish(&self, event: &LoanEvent) -> Result<(), PublishError> {
        let payload = event.to_payload()?;
        self.state.lock().unwrap().log.push(payload);
        Ok(())
    }
}

pub struct BusConsumer {
    bus: InMemoryBus,
    cursor: i64,
}

#[async_trait]
impl EventSource for BusConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<SourceMessage>, TransportError> {
        let next = {
            let mut state = self.bus.state.lock().unwrap();
            if state.failing_polls > 0 {
                state.failing_polls -= 1;
                return Err(TransportError::Other("broker unreachable".to_string()));
            }
            state.log.get(self.cursor as usize).cloned()
        };

        match next {
            Some(payload) => {
                let offset = self.cursor;
                self.cursor += 1;
                Ok(Some(SourceMessage {
                    position: MessagePosition {
                        topic: TOPIC.to_string(),
                        partition: 0,
                        offset,
                    },
                            payload: Some(payload),
                }))
            }
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    fn commit(&mut self, position: &MessagePosition) -> Result<(), TransportError> {
        let mut state = self.bus.state.lock().unwrap();
        state.commit_calls += 1;
        let next = position.offset + 1;
        state.committed = Some(state.committed.map_or(next, |c| c.max(next)));
        Ok(())
    }
}

/// Failure kinds the in-memory store can inject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Unavailable,
    Constraint,
}

impl Failure {
    fn to_error(self) -> PersistenceError {
        match self {
            Failure::Unavailable => PersistenceError::Unavailable("connection refused".to_string()),
            Failure::Constraint => {
                PersistenceError::Constraint("violates check constraint".to_string())
            }
        }
    }
}

struct StoreState {
    rows: HashMap<String, LoanEvent>,
    failing_writes: u32,
    outage: Option<Failure>,
    delay: Option<Duration>,
}

/// Table keyed by loan_id with the same insert/upsert semantics as Postgres
#[derive(Clone)]
pub struct InMemoryStore {
    mode: WriteMode,
    state: Arc<Mutex<StoreState>>,
    attempts: Arc<AtomicU32>,
    in_flight: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new(mode: WriteMode) -> Self {
        Self {
            mode,
            state: Arc::new(Mutex::new(StoreState {
                rows: HashMap::new(),
                failing_writes: 0,
                outage: None,
                delay: None,
            })),
            attempts: Arc::new(AtomicU32::new(0)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.state.lock().unwrap().failing_writes = n;
    }

    /// Every write fails with `failure` until cleared with `None`
    pub fn set_outage(&self, failure: Option<Failure>) {
        self.state.lock().unwrap().outage = failure;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn row(&self, loan_id: &str) -> Option<LoanEvent> {
        self.state.lock().unwrap().rows.get(loan_id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_writing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for InMemoryStore {
    async fn persist(&self, event: &LoanEvent) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.lock().unwrap().delay;
        if let Some(delay) = delay {
            self.in_flight.store(true, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.store(false, Ordering::SeqCst);
        }

        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.outage {
            return Err(failure.to_error());
        }
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(Failure::Unavailable.to_error());
        }

        match self.mode {
            WriteMode::Insert if state.rows.contains_key(&event.loan_id) => {
                Err(PersistenceError::Duplicate(event.loan_id.clone()))
            }
            _ => {
                state.rows.insert(event.loan_id.clone(), event.clone());
                Ok(())
            }
        }
    }
}

/// Captures dead-letter records, optionally refusing them
#[derive(Clone, Default)]
pub struct RecordingDeadLetter {
    records: Arc<Mutex<Vec<DeadLetterRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl RecordingDeadLetter {
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetter {
    async fn send(&self, record: &DeadLetterRecord) -> Result<(), TransportError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Other("dead-letter topic unreachable".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
