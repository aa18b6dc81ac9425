use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use meterlab_core::{Clock, ClientId, Lease, LeaseKey, ReadingId, SessionId, SystemClock};

use super::r#trait::{LeaseError, LeaseLedger};

/// In-memory lease ledger for tests and single-process dev setups.
///
/// One mutex guards the whole table, which makes check-and-insert atomic.
pub struct InMemoryLeaseLedger {
    leases: Mutex<HashMap<LeaseKey, Lease>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLeaseLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn table(&self) -> Result<MutexGuard<'_, HashMap<LeaseKey, Lease>>, LeaseError> {
        self.leases
            .lock()
            .map_err(|_| LeaseError::Unavailable("lease table lock poisoned".to_string()))
    }

    /// Number of rows held, expired or not.
    pub fn len(&self) -> usize {
        self.leases.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryLeaseLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for InMemoryLeaseLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryLeaseLedger")
            .field("rows", &self.len())
            .finish()
    }
}

impl LeaseLedger for InMemoryLeaseLedger {
    fn acquire(
        &self,
        key: &LeaseKey,
        image_url: &str,
        session: &SessionId,
        ttl: chrono::Duration,
    ) -> Result<Lease, LeaseError> {
        let mut table = self.table()?;
        let now = self.clock.now();

        if let Some(existing) = table.get(key) {
            if !existing.is_expired_at(now) {
                return Err(LeaseError::AlreadyLeased(key.clone()));
            }
        }

        let lease = Lease::new(key.clone(), image_url, session.clone(), now, ttl)
            .map_err(|e| LeaseError::InvalidTtl(e.to_string()))?;
        table.insert(key.clone(), lease.clone());
        Ok(lease)
    }

    fn release(&self, key: &LeaseKey, session: &SessionId) -> Result<(), LeaseError> {
        let mut table = self.table()?;
        let now = self.clock.now();

        match table.get(key) {
            Some(lease) if lease.is_expired_at(now) => {
                table.remove(key);
                Err(LeaseError::NotFound(key.clone()))
            }
            Some(lease) if !lease.is_held_by(session) => Err(LeaseError::NotHolder(key.clone())),
            Some(_) => {
                table.remove(key);
                Ok(())
            }
            None => Err(LeaseError::NotFound(key.clone())),
        }
    }

    fn get(&self, key: &LeaseKey) -> Result<Option<Lease>, LeaseError> {
        let table = self.table()?;
        let now = self.clock.now();
        Ok(table.get(key).filter(|l| !l.is_expired_at(now)).cloned())
    }

    fn active_ids(&self, client: &ClientId) -> Result<HashSet<ReadingId>, LeaseError> {
        let table = self.table()?;
        let now = self.clock.now();
        Ok(table
            .values()
            .filter(|l| &l.key.source_client == client && !l.is_expired_at(now))
            .map(|l| l.key.source_reading_id)
            .collect())
    }

    fn purge_expired(&self) -> Result<usize, LeaseError> {
        let mut table = self.table()?;
        let now = self.clock.now();
        let before = table.len();
        table.retain(|_, l| !l.is_expired_at(now));
        Ok(before - table.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterlab_core::ManualClock;
    use std::sync::Barrier;
    use std::thread;

    fn key(id: i64) -> LeaseKey {
        LeaseKey::new(ClientId::new("Huurkor").unwrap(), ReadingId::new(id))
    }

    fn session(s: &str) -> SessionId {
        SessionId::new(s).unwrap()
    }

    fn ttl(secs: i64) -> chrono::Duration {
        chrono::Duration::seconds(secs)
    }

    #[test]
    fn concurrent_acquire_has_exactly_one_winner() {
        let ledger = Arc::new(InMemoryLeaseLedger::new());
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let ledger = ledger.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    ledger.acquire(&key(1), "u", &session(&format!("s{i}")), ttl(60))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        for r in results.iter().filter(|r| r.is_err()) {
            assert_eq!(r.as_ref().unwrap_err(), &LeaseError::AlreadyLeased(key(1)));
        }
    }

    #[test]
    fn lease_becomes_claimable_exactly_at_ttl() {
        let clock = Arc::new(ManualClock::default());
        let ledger = InMemoryLeaseLedger::with_clock(clock.clone());

        ledger.acquire(&key(2), "u", &session("a"), ttl(30)).unwrap();

        clock.advance(chrono::Duration::milliseconds(29_999));
        assert!(matches!(
            ledger.acquire(&key(2), "u", &session("b"), ttl(30)),
            Err(LeaseError::AlreadyLeased(_))
        ));
        assert!(ledger.active_ids(&key(2).source_client).unwrap().contains(&ReadingId::new(2)));

        clock.advance(chrono::Duration::milliseconds(1));
        assert!(ledger.get(&key(2)).unwrap().is_none());
        assert!(ledger.active_ids(&key(2).source_client).unwrap().is_empty());

        let taken_over = ledger.acquire(&key(2), "u", &session("b"), ttl(30)).unwrap();
        assert!(taken_over.is_held_by(&session("b")));
    }

    #[test]
    fn only_the_holder_may_release() {
        let ledger = InMemoryLeaseLedger::new();
        ledger.acquire(&key(3), "u", &session("a"), ttl(60)).unwrap();

        assert_eq!(
            ledger.release(&key(3), &session("b")),
            Err(LeaseError::NotHolder(key(3)))
        );
        ledger.release(&key(3), &session("a")).unwrap();
        assert_eq!(
            ledger.release(&key(3), &session("a")),
            Err(LeaseError::NotFound(key(3)))
        );

        // Immediately claimable again.
        ledger.acquire(&key(3), "u", &session("b"), ttl(60)).unwrap();
    }

    #[test]
    fn releasing_an_expired_lease_reports_not_found() {
        let clock = Arc::new(ManualClock::default());
        let ledger = InMemoryLeaseLedger::with_clock(clock.clone());
        ledger.acquire(&key(4), "u", &session("a"), ttl(10)).unwrap();
        clock.advance(ttl(10));
        assert_eq!(
            ledger.release(&key(4), &session("a")),
            Err(LeaseError::NotFound(key(4)))
        );
    }

    #[test]
    fn oversized_ttl_is_refused_and_the_ledger_keeps_working() {
        let ledger = InMemoryLeaseLedger::new();
        assert!(matches!(
            ledger.acquire(&key(7), "u", &session("a"), ttl(10_000_000_000_000)),
            Err(LeaseError::InvalidTtl(_))
        ));
        assert!(ledger.is_empty());

        let lease = ledger.acquire(&key(7), "u", &session("a"), ttl(60)).unwrap();
        assert_eq!(ledger.get(&key(7)).unwrap(), Some(lease));
    }

    #[test]
    fn purge_drops_only_expired_rows() {
        let clock = Arc::new(ManualClock::default());
        let ledger = InMemoryLeaseLedger::with_clock(clock.clone());
        ledger.acquire(&key(5), "u", &session("a"), ttl(10)).unwrap();
        ledger.acquire(&key(6), "u", &session("a"), ttl(100)).unwrap();

        clock.advance(ttl(50));
        assert_eq!(ledger.purge_expired().unwrap(), 1);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.get(&key(6)).unwrap().is_some());
    }

    #[test]
    fn reacquisition_mints_a_fresh_nonce() {
        let clock = Arc::new(ManualClock::default());
        let ledger = InMemoryLeaseLedger::with_clock(clock.clone());
        let first = ledger.acquire(&key(7), "u", &session("a"), ttl(5)).unwrap();
        clock.advance(ttl(5));
        let second = ledger.acquire(&key(7), "u", &session("a"), ttl(5)).unwrap();
        assert_ne!(first.nonce, second.nonce);
        assert!(!second.matches_token(&first.token()));
    }
}
