use crate::config::GeneratorSettings;
use rand::Rng;
use thiserror::Error;

/// Tolerance for the net-sum postcondition.
pub const NET_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("cannot reach target profit {target:.2} with zero winning trades")]
    InfeasibleTarget { target: f64 },
    #[error("cannot allocate nonzero target {target:.2} across zero trades")]
    NoTrades { target: f64 },
}

/// Signed P&L magnitudes for one account's run. All values are positive;
/// the sign lives in which list a value sits in.
#[derive(Debug, Clone)]
pub struct TradeAllocation {
    pub win_amounts: Vec<f64>,
    pub loss_amounts: Vec<f64>,
}

impl TradeAllocation {
    pub fn net(&self) -> f64 {
        let wins: f64 = self.win_amounts.iter().sum();
        let losses: f64 = self.loss_amounts.iter().sum();
        wins - losses
    }

    pub fn trade_count(&self) -> usize {
        self.win_amounts.len() + self.loss_amounts.len()
    }
}

/// Distributes `target_profit` across `win_count` wins and `loss_count`
/// losses. Losses are drawn uniformly from the loss band; only their sum
/// matters, as the cost the wins must cover. Wins are drawn from the win
/// band with each draw capped so enough budget remains for the draws after
/// it; the last win absorbs the exact remainder. The absorbing amount is
/// clamped to a strictly positive floor, so the net lands exactly on target
/// whenever the budget admits `win_count` positive amounts at all and
/// overshoots only when it does not.
///
/// `win_count == 0` with a positive target is a hard precondition violation:
/// the caller must force a win (the orchestrator's policy) or reject the run.
pub fn allocate(
    target_profit: f64,
    win_count: usize,
    loss_count: usize,
    settings: &GeneratorSettings,
    rng: &mut impl Rng,
) -> Result<TradeAllocation, AllocationError> {
    if win_count == 0 && target_profit > 0.0 {
        return Err(AllocationError::InfeasibleTarget {
            target: target_profit,
        });
    }
    if win_count == 0 && loss_count == 0 && target_profit.abs() > NET_TOLERANCE {
        return Err(AllocationError::NoTrades {
            target: target_profit,
        });
    }

    if win_count == 0 {
        // Loss-only run with a non-positive target: the losses themselves
        // must sum to the (positive) budget, absorbing draw included.
        let loss_amounts = draw_covering(
            loss_count,
            -target_profit,
            settings.loss_amount_min,
            settings.loss_amount_max,
            settings.min_final_amount,
            rng,
        );
        return Ok(TradeAllocation {
            win_amounts: Vec::new(),
            loss_amounts,
        });
    }

    let loss_amounts: Vec<f64> = (0..loss_count)
        .map(|_| rng.gen_range(settings.loss_amount_min..=settings.loss_amount_max))
        .collect();
    let total_losses: f64 = loss_amounts.iter().sum();

    let win_amounts = draw_covering(
        win_count,
        target_profit + total_losses,
        settings.win_amount_min,
        settings.win_amount_max,
        settings.min_final_amount,
        rng,
    );

    Ok(TradeAllocation {
        win_amounts,
        loss_amounts,
    })
}

/// Draws `count` positive amounts summing to `budget`: `count - 1` banded
/// draws, each capped so the remaining draws keep at least their band
/// minimum (and the absorbing draw its floor), then the absorbing remainder.
/// When the budget cannot cover the band minimums the banded draws collapse
/// to `band_min` and the clamped absorbing amount overshoots the budget.
fn draw_covering(
    count: usize,
    budget: f64,
    band_min: f64,
    band_max: f64,
    min_final: f64,
    rng: &mut impl Rng,
) -> Vec<f64> {
    let mut values = Vec::with_capacity(count);
    let mut remaining = budget;
    for i in 0..count.saturating_sub(1) {
        let draws_after = (count - i - 2) as f64;
        let reserve = band_min * draws_after + min_final;
        let upper = (remaining - reserve).min(band_max);
        let draw = if upper <= band_min {
            band_min
        } else {
            rng.gen_range(band_min..=upper)
        };
        values.push(draw);
        remaining -= draw;
    }
    if count > 0 {
        values.push(remaining.max(min_final));
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings() -> GeneratorSettings {
        GeneratorSettings::default()
    }

    #[test]
    fn net_hits_target_exactly() {
        let settings = settings();
        for seed in 0..100u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let allocation = allocate(50.0, 3, 2, &settings, &mut rng).unwrap();
            assert_eq!(allocation.win_amounts.len(), 3);
            assert_eq!(allocation.loss_amounts.len(), 2);
            assert!((allocation.net() - 50.0).abs() < NET_TOLERANCE);
            assert!(allocation.win_amounts.iter().all(|w| *w > 0.0));
            assert!(allocation
                .loss_amounts
                .iter()
                .all(|l| (1.0..=10.0).contains(l)));
        }
    }

    #[test]
    fn all_win_run_still_lands_on_target() {
        // The orchestrator's 100% win-rate case: five wins, no losses, and a
        // budget that admits five positive amounts, so the net is exact.
        let settings = settings();
        for seed in 0..100u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let allocation = allocate(20.0, 5, 0, &settings, &mut rng).unwrap();
            assert_eq!(allocation.win_amounts.len(), 5);
            assert!((allocation.net() - 20.0).abs() < NET_TOLERANCE);
            assert!(allocation.win_amounts.iter().all(|w| *w > 0.0));
        }
    }

    #[test]
    fn single_win_absorbs_everything() {
        let settings = settings();
        let mut rng = StdRng::seed_from_u64(7);
        let allocation = allocate(7.5, 1, 3, &settings, &mut rng).unwrap();
        assert_eq!(allocation.win_amounts.len(), 1);
        assert!((allocation.net() - 7.5).abs() < NET_TOLERANCE);
        assert!(allocation.win_amounts[0] > 7.5);
    }

    #[test]
    fn loss_only_allocation_hits_negative_target() {
        let settings = settings();
        for seed in 0..100u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let allocation = allocate(-25.0, 0, 3, &settings, &mut rng).unwrap();
            assert!(allocation.win_amounts.is_empty());
            assert_eq!(allocation.loss_amounts.len(), 3);
            assert!((allocation.net() + 25.0).abs() < NET_TOLERANCE);
            assert!(allocation.loss_amounts.iter().all(|l| *l > 0.0));
        }
    }

    #[test]
    fn zero_wins_with_positive_target_is_rejected() {
        let settings = settings();
        let mut rng = StdRng::seed_from_u64(1);
        let result = allocate(10.0, 0, 5, &settings, &mut rng);
        assert!(matches!(
            result,
            Err(AllocationError::InfeasibleTarget { .. })
        ));
    }

    #[test]
    fn zero_trades_with_nonzero_target_is_rejected() {
        let settings = settings();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            allocate(-3.0, 0, 0, &settings, &mut rng),
            Err(AllocationError::NoTrades { .. })
        ));
        assert!(allocate(0.0, 0, 0, &settings, &mut rng).is_ok());
    }

    #[test]
    fn clamp_keeps_absorbing_win_strictly_positive() {
        let settings = settings();
        for seed in 0..20u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            // A 0.5 budget cannot cover two positive wins with a 2.0 band
            // minimum; the absorbing draw clamps and the net overshoots.
            let allocation = allocate(0.5, 2, 0, &settings, &mut rng).unwrap();
            let last = *allocation.win_amounts.last().unwrap();
            assert_eq!(last, settings.min_final_amount);
            assert!(allocation.net() >= 0.5);
            assert!(allocation.win_amounts.iter().all(|w| *w > 0.0));
        }
    }
}
