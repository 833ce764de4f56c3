use std::sync::{Mutex, PoisonError};

use crate::models::TokenUsage;

#[derive(Debug, Default)]
struct LedgerState {
    total: TokenUsage,
    calls: usize,
}

/// Token usage of one extraction run. Shared by reference between the
/// concurrent page pipelines of that run and dropped with it.
#[derive(Debug, Default)]
pub struct UsageLedger {
    state: Mutex<LedgerState>,
}

impl UsageLedger {
    pub fn new() -> Self {
        UsageLedger::default()
    }

    pub fn record(&self, usage: TokenUsage) {
        debug_assert!(usage.is_consistent(), "inconsistent token usage: {usage:?}");
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.total += usage;
        state.calls += 1;
        debug_assert!(state.total.is_consistent(), "ledger total drifted: {:?}", state.total);
    }

    pub fn total(&self) -> TokenUsage {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).total
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn total_is_sum_of_recorded_calls() {
        let calls = [TokenUsage::new(100, 20), TokenUsage::new(50, 10), TokenUsage::default()];
        let ledger = UsageLedger::new();
        for usage in calls {
            ledger.record(usage);
        }

        let total = ledger.total();
        assert_eq!(total, TokenUsage::new(150, 30));
        assert_eq!(calls.into_iter().sum::<TokenUsage>(), total);
        assert_eq!(total.total_tokens(), 180);
        assert_eq!(ledger.call_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_are_not_lost() {
        let ledger = Arc::new(UsageLedger::new());
        let mut handles = Vec::new();
        for task in 0..8u64 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    ledger.record(TokenUsage::new(task + 1, 1));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let expected_input: u64 = (1..=8u64).map(|n| n * 250).sum();
        assert_eq!(ledger.total(), TokenUsage::new(expected_input, 2000));
        assert_eq!(ledger.call_count(), 2000);
    }

    #[test]
    fn ledgers_are_independent() {
        let first = UsageLedger::new();
        let second = UsageLedger::new();
        first.record(TokenUsage::new(7, 3));
        assert_eq!(second.total(), TokenUsage::default());
    }
}
