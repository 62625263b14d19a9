//! Local phase engine.
//!
//! Applies the locally routed postings of a transaction to the balance store
//! in two steps:
//!
//! ```text
//!   phase 1 (reserve)     available += min(0, amount)      reject if < 0
//!   phase 2 (apply)       balance   += amount
//!                         available += max(0, amount)
//!   release (abort)       available -= min(0, amount)
//! ```
//!
//! Net effect of phase 1 followed by phase 2 on one posting is
//! `balance += amount` and `available += amount`. Release exactly undoes
//! phase 1. Phase 2 and release never re-validate: they trust that phase 1
//! voted YES for the same transaction.
//!
//! Postings routed elsewhere are skipped. Memory-hole postings are accepted
//! without touching any balance.

use interbank_store::UnitOfWork;
use interbank_types::{
    Account, AccountNumber, InterbankError, NoVoteReason, Posting, Result, RoutingNumber,
    Transaction, TxAccount,
};
use rust_decimal::Decimal;
use tracing::{debug, trace};

/// Runs the local phases for one bank.
#[derive(Debug, Clone, Copy)]
pub struct LocalPhaseEngine {
    ours: RoutingNumber,
}

impl LocalPhaseEngine {
    #[must_use]
    pub fn new(ours: RoutingNumber) -> Self {
        Self { ours }
    }

    #[must_use]
    pub fn routing_number(&self) -> RoutingNumber {
        self.ours
    }

    /// Phase 1: validate the local part and reserve credited amounts.
    ///
    /// Returns the NO reasons; an empty list is a YES vote. An unbalanced
    /// transaction yields `UnbalancedTx` alone and touches nothing. On a NO
    /// vote some reservations may already be staged in `unit`; the caller
    /// must roll it back.
    ///
    /// # Errors
    /// `Unsupported` for locally routed person or option postings, or any
    /// storage error. Both abort the enclosing unit.
    pub fn prepare(&self, unit: &mut UnitOfWork<'_>, tx: &Transaction) -> Result<Vec<NoVoteReason>> {
        unit.ensure_writable()?;
        if !tx.is_balanced() {
            debug!(transaction_id = ?tx.transaction_id, "Phase 1: unbalanced");
            return Ok(vec![NoVoteReason::UnbalancedTx]);
        }

        let mut reasons = Vec::new();
        for posting in tx.local_postings(self.ours) {
            match &posting.account {
                TxAccount::Account { num } => {
                    if let Some(reason) = Self::reserve(unit, num, posting)? {
                        reasons.push(reason);
                    }
                }
                TxAccount::MemoryHole { .. } => {}
                other => return Err(unsupported(other)),
            }
        }

        debug!(
            transaction_id = ?tx.transaction_id,
            reasons = reasons.len(),
            "Phase 1 complete"
        );
        Ok(reasons)
    }

    /// Phase 2: make the transaction's local effect final.
    pub fn commit(&self, unit: &mut UnitOfWork<'_>, tx: &Transaction) -> Result<()> {
        self.for_each_local_account(unit, tx, |account, amount| {
            account.balance += amount;
            account.available_balance += amount.max(Decimal::ZERO);
        })?;
        debug!(transaction_id = ?tx.transaction_id, "Phase 2 applied");
        Ok(())
    }

    /// Undo the reservations phase 1 made.
    pub fn release(&self, unit: &mut UnitOfWork<'_>, tx: &Transaction) -> Result<()> {
        self.for_each_local_account(unit, tx, |account, amount| {
            account.available_balance -= amount.min(Decimal::ZERO);
        })?;
        debug!(transaction_id = ?tx.transaction_id, "Reservations released");
        Ok(())
    }

    fn reserve(
        unit: &mut UnitOfWork<'_>,
        number: &AccountNumber,
        posting: &Posting,
    ) -> Result<Option<NoVoteReason>> {
        let Some(mut account) = unit.lock_account(number)? else {
            return Ok(Some(NoVoteReason::NoSuchAccount {
                posting: posting.clone(),
            }));
        };

        if posting.asset.currency() != Some(account.currency.as_str()) {
            return Ok(Some(NoVoteReason::UnacceptableAsset {
                posting: posting.clone(),
            }));
        }

        let new_available = account.available_balance + posting.amount.min(Decimal::ZERO);
        if new_available < Decimal::ZERO {
            return Ok(Some(NoVoteReason::InsufficientAsset {
                posting: posting.clone(),
            }));
        }

        trace!(account = %number, available = %new_available, "Reserved");
        account.available_balance = new_available;
        unit.save_account(account)?;
        Ok(None)
    }

    fn for_each_local_account(
        &self,
        unit: &mut UnitOfWork<'_>,
        tx: &Transaction,
        mut apply: impl FnMut(&mut Account, Decimal),
    ) -> Result<()> {
        unit.ensure_writable()?;
        for posting in tx.local_postings(self.ours) {
            match &posting.account {
                TxAccount::Account { num } => {
                    let mut account = unit.lock_account(num)?.ok_or_else(|| {
                        InterbankError::Internal(format!("prepared account {num} disappeared"))
                    })?;
                    apply(&mut account, posting.amount);
                    unit.save_account(account)?;
                }
                TxAccount::MemoryHole { .. } => {}
                other => return Err(unsupported(other)),
            }
        }
        Ok(())
    }
}

fn unsupported(account: &TxAccount) -> InterbankError {
    match account {
        TxAccount::Person { .. } => InterbankError::Unsupported("local person postings".into()),
        TxAccount::Option { .. } => InterbankError::Unsupported("local option postings".into()),
        other => InterbankError::Internal(format!("unexpected account kind: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use interbank_store::Database;
    use interbank_types::{ForeignBankId, TxAsset};
    use rand::Rng;

    use super::*;

    const OURS: RoutingNumber = RoutingNumber(444);

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn bank(accounts: &[(&str, &str, i64)]) -> Database {
        let db = Database::in_memory();
        let mut unit = db.begin();
        for (num, currency, balance) in accounts {
            unit.insert_account(Account::fixture(num, currency, *balance))
                .unwrap();
        }
        unit.commit().unwrap();
        db
    }

    fn account(db: &Database, num: &str) -> Account {
        db.account(&AccountNumber::new(num)).unwrap().unwrap()
    }

    fn deposit(amount: i64) -> Transaction {
        Transaction::new(
            vec![
                Posting::memory_hole(OURS, dec(-amount), "RSD"),
                Posting::monetary("444001", dec(amount), "RSD"),
            ],
            "deposit",
        )
    }

    #[test]
    fn deposit_commits_in_two_steps() {
        let db = bank(&[("444001", "RSD", 1000)]);
        let engine = LocalPhaseEngine::new(OURS);
        let tx = deposit(10);

        let mut unit = db.begin();
        assert!(engine.prepare(&mut unit, &tx).unwrap().is_empty());
        // A debit leaves available untouched until phase 2.
        let staged = unit.account(&AccountNumber::new("444001")).unwrap().unwrap();
        assert_eq!(staged.available_balance, dec(1000));
        engine.commit(&mut unit, &tx).unwrap();
        unit.commit().unwrap();

        let acct = account(&db, "444001");
        assert_eq!(acct.balance, dec(1010));
        assert_eq!(acct.available_balance, dec(1010));
    }

    #[test]
    fn overdraft_votes_insufficient_asset() {
        let db = bank(&[("444001", "RSD", 1000)]);
        let engine = LocalPhaseEngine::new(OURS);
        let tx = Transaction::new(
            vec![
                Posting::memory_hole(OURS, dec(1100), "RSD"),
                Posting::monetary("444001", dec(-1100), "RSD"),
            ],
            "withdraw",
        );

        let mut unit = db.begin();
        let reasons = engine.prepare(&mut unit, &tx).unwrap();
        assert_eq!(reasons.len(), 1);
        assert!(matches!(reasons[0], NoVoteReason::InsufficientAsset { .. }));
        unit.rollback();
        assert_eq!(account(&db, "444001").available_balance, dec(1000));
    }

    #[test]
    fn wrong_currency_votes_unacceptable_asset() {
        let db = bank(&[("444001", "RSD", 1000)]);
        let engine = LocalPhaseEngine::new(OURS);
        let tx = Transaction::new(
            vec![
                Posting::memory_hole(OURS, dec(-10), "EUR"),
                Posting::monetary("444001", dec(10), "EUR"),
            ],
            "eur deposit",
        );

        let mut unit = db.begin();
        let reasons = engine.prepare(&mut unit, &tx).unwrap();
        assert_eq!(reasons.len(), 1);
        assert_eq!(
            reasons[0].posting().map(|p| &p.asset),
            Some(&TxAsset::monetary("EUR"))
        );
        assert!(matches!(reasons[0], NoVoteReason::UnacceptableAsset { .. }));
    }

    #[test]
    fn unbalanced_is_the_only_reason() {
        let db = bank(&[]);
        let engine = LocalPhaseEngine::new(OURS);
        // Missing account would be a second reason if checked.
        let tx = Transaction::new(
            vec![Posting::monetary("444404", dec(10), "RSD")],
            "lopsided",
        );
        let mut unit = db.begin();
        assert_eq!(
            engine.prepare(&mut unit, &tx).unwrap(),
            vec![NoVoteReason::UnbalancedTx]
        );
        assert_eq!(unit.pending_writes(), 0);
    }

    #[test]
    fn missing_account_votes_no_such_account() {
        let db = bank(&[]);
        let engine = LocalPhaseEngine::new(OURS);
        let tx = deposit(5);
        let mut unit = db.begin();
        let reasons = engine.prepare(&mut unit, &tx).unwrap();
        assert!(matches!(reasons.as_slice(), [NoVoteReason::NoSuchAccount { .. }]));
    }

    #[test]
    fn foreign_postings_are_skipped() {
        let db = bank(&[("444001", "RSD", 100)]);
        let engine = LocalPhaseEngine::new(OURS);
        let tx = Transaction::new(
            vec![
                Posting::monetary("444001", dec(-40), "RSD"),
                Posting::monetary("111001", dec(40), "RSD"),
            ],
            "outbound",
        );
        let mut unit = db.begin();
        assert!(engine.prepare(&mut unit, &tx).unwrap().is_empty());
        unit.commit().unwrap();

        let acct = account(&db, "444001");
        assert_eq!(acct.balance, dec(100));
        assert_eq!(acct.available_balance, dec(60));
    }

    #[test]
    fn release_restores_available() {
        let db = bank(&[("444001", "RSD", 100)]);
        let engine = LocalPhaseEngine::new(OURS);
        let tx = Transaction::new(
            vec![
                Posting::monetary("444001", dec(-40), "RSD"),
                Posting::monetary("111001", dec(40), "RSD"),
            ],
            "outbound",
        );
        let mut unit = db.begin();
        engine.prepare(&mut unit, &tx).unwrap();
        unit.commit().unwrap();

        let mut unit = db.begin();
        engine.release(&mut unit, &tx).unwrap();
        unit.commit().unwrap();
        assert_eq!(account(&db, "444001").available_balance, dec(100));
    }

    #[test]
    fn local_person_posting_is_unsupported() {
        let db = bank(&[]);
        let engine = LocalPhaseEngine::new(OURS);
        let tx = Transaction::new(
            vec![
                Posting::new(
                    TxAccount::Person {
                        id: ForeignBankId::new(OURS, "p-1"),
                    },
                    dec(1),
                    TxAsset::monetary("RSD"),
                ),
                Posting::memory_hole(OURS, dec(-1), "RSD"),
            ],
            "person",
        );
        let mut unit = db.begin();
        assert!(matches!(
            engine.prepare(&mut unit, &tx),
            Err(InterbankError::Unsupported(_))
        ));
    }

    #[test]
    fn rollback_only_unit_is_refused() {
        let db = bank(&[("444001", "RSD", 100)]);
        let engine = LocalPhaseEngine::new(OURS);
        let mut unit = db.begin();
        unit.set_rollback_only();
        assert!(matches!(
            engine.prepare(&mut unit, &deposit(1)),
            Err(InterbankError::RollbackOnly)
        ));
        assert!(matches!(
            engine.commit(&mut unit, &deposit(1)),
            Err(InterbankError::RollbackOnly)
        ));
    }

    #[test]
    fn random_amounts_keep_balance_arithmetic() {
        let mut rng = rand::thread_rng();
        let engine = LocalPhaseEngine::new(OURS);

        for _ in 0..200 {
            let start = rng.gen_range(0..10_000_i64);
            let amount = Decimal::new(rng.gen_range(-20_000..20_000_i64), 2);
            let db = bank(&[("444001", "RSD", start)]);
            let tx = Transaction::new(
                vec![
                    Posting::monetary("444001", amount, "RSD"),
                    Posting::memory_hole(OURS, -amount, "RSD"),
                ],
                "random",
            );

            let mut unit = db.begin();
            let reasons = engine.prepare(&mut unit, &tx).unwrap();
            let expected_reserved = dec(start) + amount.min(Decimal::ZERO);
            if expected_reserved < Decimal::ZERO {
                assert!(matches!(
                    reasons.as_slice(),
                    [NoVoteReason::InsufficientAsset { .. }]
                ));
                continue;
            }
            assert!(reasons.is_empty());
            let reserved = unit.account(&AccountNumber::new("444001")).unwrap().unwrap();
            assert_eq!(reserved.available_balance, expected_reserved);
            assert_eq!(reserved.balance, dec(start));

            engine.commit(&mut unit, &tx).unwrap();
            unit.commit().unwrap();
            let done = account(&db, "444001");
            assert_eq!(done.balance, dec(start) + amount);
            assert_eq!(done.available_balance, dec(start) + amount);
        }
    }
}
