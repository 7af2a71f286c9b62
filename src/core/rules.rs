//! Business rules for change requests
//!
//! Pure functions mapping (previous account state, change request) to a
//! [`TransactionEffect`]. No I/O, no clocks, no randomness.
//!
//! # Rule table
//!
//! Rules are grouped into a [`RuleProfile`] selected by the request's
//! `project` tag. For an existing account the branches are tried in order:
//!
//! | Branch | Standard | Sport |
//! |---|---|---|
//! | credit | Deposit/LotteryWin with change > 0, FreebetWin | same |
//! | debit | Bet: bet ≤ balance and (change > 0 or change + balance ≥ 0); Withdraw: bet ≤ balance and change + balance ≥ 0 | change > 0, any Bet, Withdraw with change + balance ≥ 0 |
//! | pincoin-only | (pincoin + pincoin balance ≥ 0 and pincoin ≠ 0) or pincoin > 0 | same |
//!
//! Anything else fails with `fail_balance`. The credit branch touches the
//! balance (and deposit bookkeeping for Deposit); the debit branch touches
//! balance and pincoins; the fallback touches pincoins only.
//!
//! A request against an account that does not exist yet goes through the
//! creation path instead: admissible iff the type is not Bet and neither
//! change is negative.

use crate::types::{
    AccountLedger, ChangeRequest, LedgerDelta, Precondition, TransactionEffect, TransactionType,
};
use rust_decimal::Decimal;

/// Project tag that selects the sport rule profile
pub const SPORT_PROJECT: &str = "sport";

/// Round a monetary value to two decimals, half-up
///
/// Computed as `floor(value * 100 + 0.5) / 100` in exact decimal
/// arithmetic: `.5` always rounds toward positive infinity, so `10.005`
/// becomes `10.01` and `-10.005` becomes `-10.00`.
pub fn round_money(value: Decimal) -> Decimal {
    let scaled = value * Decimal::ONE_HUNDRED + Decimal::new(5, 1);
    let mut rounded = scaled.floor() / Decimal::ONE_HUNDRED;
    rounded.rescale(2);
    rounded
}

/// Which rule set applies to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleProfile {
    /// Default rules: Bet and Withdraw must be covered by the balance
    Standard,

    /// Sport betting rules: no stake check, bets may overdraw
    Sport,
}

/// Balance-affecting branch chosen for an existing account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Credit,
    Debit,
}

impl RuleProfile {
    /// Select the profile for a project tag
    pub fn for_project(project: &str) -> Self {
        if project.eq_ignore_ascii_case(SPORT_PROJECT) {
            RuleProfile::Sport
        } else {
            RuleProfile::Standard
        }
    }

    /// Pick the balance branch, and whether the choice read the balance
    ///
    /// Compares the requested change as given; only the delta is rounded.
    fn balance_branch(
        &self,
        previous: &AccountLedger,
        request: &ChangeRequest,
    ) -> Option<(Branch, bool)> {
        let change = request.change;
        if credits_unconditionally(request.transaction_type, change) {
            return Some((Branch::Credit, false));
        }

        let covers = change + previous.balance >= Decimal::ZERO;
        let stake_covered = request.bet_amount <= previous.balance;

        match self {
            RuleProfile::Standard => {
                let admitted = match request.transaction_type {
                    TransactionType::Bet => stake_covered && (change > Decimal::ZERO || covers),
                    TransactionType::Withdraw => stake_covered && covers,
                    _ => false,
                };
                admitted.then_some((Branch::Debit, true))
            }
            RuleProfile::Sport => match request.transaction_type {
                _ if change > Decimal::ZERO => Some((Branch::Debit, false)),
                TransactionType::Bet => Some((Branch::Debit, false)),
                TransactionType::Withdraw if covers => Some((Branch::Debit, true)),
                _ => None,
            },
        }
    }

    /// Evaluate a request against an existing account
    pub fn evaluate(&self, previous: &AccountLedger, request: &ChangeRequest) -> TransactionEffect {
        if let Some((branch, reads_state)) = self.balance_branch(previous, request) {
            let change = round_money(request.change);
            let delta = match branch {
                Branch::Credit if request.transaction_type == TransactionType::Deposit => {
                    LedgerDelta::deposit(change)
                }
                Branch::Credit => LedgerDelta::balance(change),
                Branch::Debit => {
                    let mut delta = LedgerDelta::balance(change);
                    add_pincoins(&mut delta, request.pincoin_change);
                    delta
                }
            };

            let precondition = if reads_state {
                Precondition::matching(previous)
            } else {
                Precondition::None
            };
            return TransactionEffect::Success {
                delta,
                precondition,
            };
        }

        if pincoin_admissible(previous, request.pincoin_change) {
            let mut delta = LedgerDelta::default();
            add_pincoins(&mut delta, request.pincoin_change);
            return TransactionEffect::Success {
                delta,
                precondition: Precondition::matching(previous),
            };
        }

        TransactionEffect::fail_balance()
    }
}

/// Evaluate a change request against the previous account state
///
/// `None` means the account does not exist yet and selects the creation
/// path; otherwise the profile chosen by `request.project` decides.
pub fn evaluate(previous: Option<&AccountLedger>, request: &ChangeRequest) -> TransactionEffect {
    match previous {
        None => evaluate_new_account(request),
        Some(previous) => RuleProfile::for_project(&request.project).evaluate(previous, request),
    }
}

/// Evaluate a request against a zero-valued account that does not exist yet
pub fn evaluate_new_account(request: &ChangeRequest) -> TransactionEffect {
    let change = request.change;

    if request.transaction_type == TransactionType::Bet
        || change < Decimal::ZERO
        || request.pincoin_change < Decimal::ZERO
    {
        return TransactionEffect::fail_balance();
    }

    let rounded = round_money(change);
    let is_deposit = request.transaction_type == TransactionType::Deposit;
    let mut delta = if is_deposit && change > Decimal::ZERO {
        LedgerDelta::deposit(rounded)
    } else {
        LedgerDelta::balance(rounded)
    };
    add_pincoins(&mut delta, request.pincoin_change);

    // A pure credit yields the same delta on an existing account, so it does
    // not need the account to still be absent
    let precondition = if request.pincoin_change.is_zero()
        && credits_unconditionally(request.transaction_type, change)
    {
        Precondition::None
    } else {
        Precondition::Absent
    };

    TransactionEffect::Success {
        delta,
        precondition,
    }
}

fn credits_unconditionally(tx_type: TransactionType, change: Decimal) -> bool {
    match tx_type {
        TransactionType::Deposit | TransactionType::LotteryWin => change > Decimal::ZERO,
        TransactionType::FreebetWin => true,
        TransactionType::Bet | TransactionType::Withdraw => false,
    }
}

fn pincoin_admissible(previous: &AccountLedger, pincoin_change: Decimal) -> bool {
    (pincoin_change + previous.pincoin_balance >= Decimal::ZERO && !pincoin_change.is_zero())
        || pincoin_change > Decimal::ZERO
}

fn add_pincoins(delta: &mut LedgerDelta, pincoin_change: Decimal) {
    delta.pincoin_balance += pincoin_change;
    delta.pincoins_all_sum += pincoin_change.max(Decimal::ZERO);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailReason;
    use rstest::rstest;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ledger(balance: &str, pincoin_balance: &str) -> AccountLedger {
        let mut ledger = AccountLedger::new(1);
        ledger.balance = dec(balance);
        ledger.pincoin_balance = dec(pincoin_balance);
        ledger
    }

    fn applied(previous: &AccountLedger, effect: &TransactionEffect) -> AccountLedger {
        let mut next = previous.clone();
        effect
            .delta()
            .expect("expected a successful effect")
            .apply_to(&mut next);
        next
    }

    #[rstest]
    #[case::half_rounds_up("10.005", "10.01")]
    #[case::below_half_rounds_down("10.004", "10.00")]
    #[case::exact("10.00", "10.00")]
    #[case::negative_half_rounds_up("-10.005", "-10.00")]
    #[case::negative_below_half("-10.004", "-10.00")]
    #[case::negative_above_half("-10.006", "-10.01")]
    #[case::integer("7", "7.00")]
    fn test_round_money(#[case] input: &str, #[case] expected: &str) {
        let rounded = round_money(dec(input));
        assert_eq!(rounded, dec(expected));
        assert_eq!(rounded.scale(), 2);
    }

    #[rstest]
    #[case::sport("sport", RuleProfile::Sport)]
    #[case::sport_upper("SPORT", RuleProfile::Sport)]
    #[case::casino("casino", RuleProfile::Standard)]
    #[case::default("default", RuleProfile::Standard)]
    fn test_profile_selection(#[case] project: &str, #[case] expected: RuleProfile) {
        assert_eq!(RuleProfile::for_project(project), expected);
    }

    #[test]
    fn test_deposit_on_fresh_account() {
        let request = ChangeRequest::new(1, 1, TransactionType::Deposit, dec("100.00"));

        let effect = evaluate(None, &request);

        assert!(effect.is_success());
        let ledger = applied(&AccountLedger::new(1), &effect);
        assert_eq!(ledger.balance, dec("100.00"));
        assert_eq!(ledger.deposit_all_sum, dec("100.00"));
        assert_eq!(ledger.deposit_count, 1);
    }

    #[test]
    fn test_deposit_rounding() {
        let previous = ledger("0", "0");
        let up = ChangeRequest::new(1, 1, TransactionType::Deposit, dec("10.005"));
        let down = ChangeRequest::new(1, 2, TransactionType::Deposit, dec("10.004"));

        assert_eq!(applied(&previous, &evaluate(Some(&previous), &up)).balance, dec("10.01"));
        assert_eq!(applied(&previous, &evaluate(Some(&previous), &down)).balance, dec("10.00"));
    }

    #[rstest]
    #[case::sub_cent_deposit(TransactionType::Deposit, "10", "0.004", true, "10.00")]
    #[case::sub_cent_overdraw(TransactionType::Withdraw, "100", "-100.004", false, "100")]
    #[case::rounds_to_exact_cover(TransactionType::Withdraw, "10.01", "-10.005", true, "0.01")]
    fn test_admissibility_uses_requested_change(
        #[case] tx_type: TransactionType,
        #[case] balance: &str,
        #[case] change: &str,
        #[case] admitted: bool,
        #[case] expected_balance: &str,
    ) {
        let previous = ledger(balance, "0");
        let request =
            ChangeRequest::new(1, 1, tx_type, dec(change)).with_bet_amount(Decimal::ZERO);

        let effect = evaluate(Some(&previous), &request);

        assert_eq!(effect.is_success(), admitted);
        let next = if admitted {
            applied(&previous, &effect)
        } else {
            previous.clone()
        };
        assert_eq!(next.balance, dec(expected_balance));
    }

    #[test]
    fn test_sub_cent_deposit_counts_as_deposit() {
        let previous = ledger("10", "0");
        let request = ChangeRequest::new(1, 1, TransactionType::Deposit, dec("0.004"));

        let next = applied(&previous, &evaluate(Some(&previous), &request));

        assert_eq!(next.deposit_count, 1);
        assert_eq!(next.deposit_all_sum, dec("0.00"));
    }

    #[test]
    fn test_bet_within_balance() {
        let previous = ledger("100.00", "0");
        let request = ChangeRequest::new(1, 1, TransactionType::Bet, dec("-50.00"))
            .with_bet_amount(dec("50"));

        let effect = evaluate(Some(&previous), &request);

        assert_eq!(applied(&previous, &effect).balance, dec("50.00"));
        assert!(matches!(
            effect,
            TransactionEffect::Success {
                precondition: Precondition::Matches { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_withdraw_over_limit_fails() {
        let previous = ledger("100.00", "0");
        let request = ChangeRequest::new(1, 1, TransactionType::Withdraw, dec("-150.00"))
            .with_bet_amount(dec("0"));

        let effect = evaluate(Some(&previous), &request);

        assert_eq!(
            effect,
            TransactionEffect::Fail {
                reason: FailReason::FailBalance
            }
        );
    }

    #[test]
    fn test_pincoin_only() {
        let mut previous = ledger("0", "10");
        previous.pincoins_all_sum = dec("5");
        let request = ChangeRequest::new(1, 1, TransactionType::Deposit, Decimal::ZERO)
            .with_pincoin_change(dec("20"));

        let effect = evaluate(Some(&previous), &request);
        let next = applied(&previous, &effect);

        assert_eq!(next.pincoin_balance, dec("30"));
        assert_eq!(next.pincoins_all_sum, dec("25"));
        assert_eq!(next.balance, Decimal::ZERO);
        assert_eq!(next.deposit_count, 0);
    }

    #[test]
    fn test_negative_pincoin_does_not_reduce_all_sum() {
        let mut previous = ledger("0", "10");
        previous.pincoins_all_sum = dec("10");
        let request = ChangeRequest::new(1, 1, TransactionType::Deposit, Decimal::ZERO)
            .with_pincoin_change(dec("-4"));

        let next = applied(&previous, &evaluate(Some(&previous), &request));

        assert_eq!(next.pincoin_balance, dec("6"));
        assert_eq!(next.pincoins_all_sum, dec("10"));
    }

    #[test]
    fn test_pincoin_overdraft_fails() {
        let previous = ledger("0", "3");
        let request = ChangeRequest::new(1, 1, TransactionType::Deposit, Decimal::ZERO)
            .with_pincoin_change(dec("-4"));

        assert!(!evaluate(Some(&previous), &request).is_success());
    }

    #[rstest]
    #[case::deposit_positive(TransactionType::Deposit, "5", true)]
    #[case::deposit_zero(TransactionType::Deposit, "0", false)]
    #[case::deposit_negative(TransactionType::Deposit, "-5", false)]
    #[case::lottery_positive(TransactionType::LotteryWin, "5", true)]
    #[case::lottery_zero(TransactionType::LotteryWin, "0", false)]
    #[case::freebet_positive(TransactionType::FreebetWin, "5", true)]
    #[case::freebet_negative(TransactionType::FreebetWin, "-5", true)]
    fn test_credit_admissibility(
        #[case] tx_type: TransactionType,
        #[case] change: &str,
        #[case] admitted: bool,
    ) {
        let previous = ledger("0", "0");
        let request = ChangeRequest::new(1, 1, tx_type, dec(change));

        assert_eq!(evaluate(Some(&previous), &request).is_success(), admitted);
    }

    #[rstest]
    #[case::bet_covered(TransactionType::Bet, "10", "-10", true)]
    #[case::bet_stake_too_large(TransactionType::Bet, "101", "-10", false)]
    #[case::bet_overdraw(TransactionType::Bet, "10", "-101", false)]
    #[case::bet_positive_change(TransactionType::Bet, "10", "25", true)]
    #[case::bet_positive_change_stake_too_large(TransactionType::Bet, "500", "25", false)]
    #[case::withdraw_exact(TransactionType::Withdraw, "0", "-100", true)]
    #[case::withdraw_overdraw(TransactionType::Withdraw, "0", "-100.01", false)]
    #[case::withdraw_stake_too_large(TransactionType::Withdraw, "100.01", "-1", false)]
    fn test_standard_debit_admissibility(
        #[case] tx_type: TransactionType,
        #[case] bet: &str,
        #[case] change: &str,
        #[case] admitted: bool,
    ) {
        let previous = ledger("100", "0");
        let request = ChangeRequest::new(1, 1, tx_type, dec(change)).with_bet_amount(dec(bet));

        assert_eq!(evaluate(Some(&previous), &request).is_success(), admitted);
    }

    #[test]
    fn test_debit_branch_applies_pincoins() {
        let previous = ledger("100", "0");
        let request = ChangeRequest::new(1, 1, TransactionType::Bet, dec("-10"))
            .with_bet_amount(dec("10"))
            .with_pincoin_change(dec("2"));

        let next = applied(&previous, &evaluate(Some(&previous), &request));

        assert_eq!(next.balance, dec("90.00"));
        assert_eq!(next.pincoin_balance, dec("2"));
        assert_eq!(next.pincoins_all_sum, dec("2"));
    }

    #[test]
    fn test_credit_branch_ignores_pincoins() {
        let previous = ledger("0", "0");
        let request = ChangeRequest::new(1, 1, TransactionType::LotteryWin, dec("10"))
            .with_pincoin_change(dec("2"));

        let effect = evaluate(Some(&previous), &request);
        let next = applied(&previous, &effect);

        assert_eq!(next.balance, dec("10.00"));
        assert_eq!(next.pincoin_balance, Decimal::ZERO);
        assert!(matches!(
            effect,
            TransactionEffect::Success {
                precondition: Precondition::None,
                ..
            }
        ));
    }

    #[rstest]
    #[case::bet_overdraws(TransactionType::Bet, "999", "-150", true)]
    #[case::withdraw_covered(TransactionType::Withdraw, "999", "-100", true)]
    #[case::withdraw_overdraw(TransactionType::Withdraw, "0", "-150", false)]
    #[case::withdraw_positive(TransactionType::Withdraw, "999", "5", true)]
    fn test_sport_debit_admissibility(
        #[case] tx_type: TransactionType,
        #[case] bet: &str,
        #[case] change: &str,
        #[case] admitted: bool,
    ) {
        let previous = ledger("100", "0");
        let request = ChangeRequest::new(1, 1, tx_type, dec(change))
            .with_bet_amount(dec(bet))
            .with_project(SPORT_PROJECT);

        assert_eq!(evaluate(Some(&previous), &request).is_success(), admitted);
    }

    #[test]
    fn test_sport_bet_can_overdraw() {
        let previous = ledger("100", "0");
        let request = ChangeRequest::new(1, 1, TransactionType::Bet, dec("-150"))
            .with_project(SPORT_PROJECT);

        let next = applied(&previous, &evaluate(Some(&previous), &request));

        assert_eq!(next.balance, dec("-50.00"));
    }

    #[rstest]
    #[case::deposit(TransactionType::Deposit, "10", "0", true)]
    #[case::zero_deposit(TransactionType::Deposit, "0", "0", true)]
    #[case::lottery(TransactionType::LotteryWin, "10", "1", true)]
    #[case::withdraw_zero(TransactionType::Withdraw, "0", "0", true)]
    #[case::bet(TransactionType::Bet, "10", "0", false)]
    #[case::negative_change(TransactionType::Withdraw, "-1", "0", false)]
    #[case::negative_pincoin(TransactionType::Deposit, "10", "-1", false)]
    fn test_new_account_admissibility(
        #[case] tx_type: TransactionType,
        #[case] change: &str,
        #[case] pincoin: &str,
        #[case] admitted: bool,
    ) {
        let request =
            ChangeRequest::new(1, 1, tx_type, dec(change)).with_pincoin_change(dec(pincoin));

        assert_eq!(evaluate(None, &request).is_success(), admitted);
    }

    #[test]
    fn test_new_account_lottery_win_has_no_deposit_bookkeeping() {
        let request = ChangeRequest::new(1, 1, TransactionType::LotteryWin, dec("10"));

        let next = applied(&AccountLedger::new(1), &evaluate(None, &request));

        assert_eq!(next.balance, dec("10.00"));
        assert_eq!(next.deposit_all_sum, Decimal::ZERO);
        assert_eq!(next.deposit_count, 0);
    }

    #[rstest]
    #[case::plain_deposit(TransactionType::Deposit, "10", "0", Precondition::None)]
    #[case::deposit_with_pincoins(TransactionType::Deposit, "10", "1", Precondition::Absent)]
    #[case::zero_withdraw(TransactionType::Withdraw, "0", "0", Precondition::Absent)]
    fn test_new_account_precondition(
        #[case] tx_type: TransactionType,
        #[case] change: &str,
        #[case] pincoin: &str,
        #[case] expected: Precondition,
    ) {
        let request =
            ChangeRequest::new(1, 1, tx_type, dec(change)).with_pincoin_change(dec(pincoin));

        match evaluate(None, &request) {
            TransactionEffect::Success { precondition, .. } => assert_eq!(precondition, expected),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_cumulative_counters_never_decrease() {
        let mut state = AccountLedger::new(1);
        let requests = [
            ChangeRequest::new(1, 1, TransactionType::Deposit, dec("50")),
            ChangeRequest::new(1, 2, TransactionType::Withdraw, dec("-20")),
            ChangeRequest::new(1, 3, TransactionType::Bet, dec("-10"))
                .with_bet_amount(dec("10"))
                .with_pincoin_change(dec("-3")),
            ChangeRequest::new(1, 4, TransactionType::FreebetWin, dec("-5")),
            ChangeRequest::new(1, 5, TransactionType::Deposit, dec("0"))
                .with_pincoin_change(dec("7")),
        ];

        for request in &requests {
            let before = state.clone();
            if let Some(delta) = evaluate(Some(&state), request).delta() {
                delta.apply_to(&mut state);
            }
            assert!(state.deposit_all_sum >= before.deposit_all_sum);
            assert!(state.deposit_count >= before.deposit_count);
            assert!(state.pincoins_all_sum >= before.pincoins_all_sum);
        }
        assert_eq!(state.balance, dec("15.00"));
        assert_eq!(state.deposit_count, 1);
    }
}
