use crate::config::GeneratorSettings;
use crate::models::{Candle, GeneratedTrade, TradeSide};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use thiserror::Error;

pub const PRICE_EPSILON: f64 = 1e-9;

/// Entry candles are picked from this leading share of the sorted series so
/// the exit search has room to the right.
const ENTRY_ZONE_RATIO: f64 = 0.7;
/// Exit candidates are examined at these offsets after the entry index.
const EXIT_MIN_OFFSET: usize = 5;
const EXIT_MAX_OFFSET: usize = 40;
/// The simulated fallback anchors its exit at least this far after entry.
const SIM_ANCHOR_OFFSET: usize = 10;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("no candles available for {symbol}")]
    NoCandles { symbol: String },
    #[error("candle series for {symbol} contains no usable prices")]
    InvalidSeries { symbol: String },
    #[error("could not produce a {outcome} trade for {symbol}")]
    OutcomeUnreachable {
        symbol: String,
        outcome: &'static str,
    },
}

/// Signed price movement of a closed trade relative to its side: positive
/// when the side made money on the move.
fn signed_move(side: TradeSide, entry_price: f64, exit_price: f64) -> f64 {
    match side {
        TradeSide::Buy => exit_price - entry_price,
        TradeSide::Sell => entry_price - exit_price,
    }
}

/// Quantity that brings |realized P&L| to `target`. Wins and losses are not
/// symmetric once a fee term exists: fees eat into a win but add to a loss,
/// so the denominators differ even though robot trades run at zero fees.
pub fn solve_quantity(
    target: f64,
    abs_move: f64,
    entry_price: f64,
    is_win: bool,
    settings: &GeneratorSettings,
) -> f64 {
    let fee_term = entry_price * settings.fee_rate;
    let denominator = if is_win {
        abs_move - fee_term
    } else {
        abs_move + fee_term
    };
    if denominator.abs() < PRICE_EPSILON {
        return settings.min_quantity;
    }
    (target / denominator).abs().max(settings.min_quantity)
}

fn realized_pnl(move_signed: f64, quantity: f64, entry_price: f64, fee_rate: f64) -> (f64, f64) {
    let fees = quantity * entry_price * fee_rate;
    (move_signed * quantity - fees, fees)
}

/// Scans exit candidates at offsets 5..=40 after `entry_idx` and returns the
/// index whose solved economics land closest to `target` with the required
/// sign, or `None` when the window is too thin or flat. Every offset is
/// examined; the closest fit wins over the first fit.
pub fn find_real_exit(
    sorted: &[&Candle],
    entry_idx: usize,
    side: TradeSide,
    is_win: bool,
    target: f64,
    settings: &GeneratorSettings,
) -> Option<usize> {
    let entry_price = sorted[entry_idx].close;
    let required_sign = if is_win { 1.0 } else { -1.0 };
    let mut best: Option<(usize, f64)> = None;

    for offset in EXIT_MIN_OFFSET..=EXIT_MAX_OFFSET {
        let idx = entry_idx + offset;
        if idx >= sorted.len() {
            break;
        }
        let exit_price = sorted[idx].close;
        if !exit_price.is_finite() || exit_price <= 0.0 {
            continue;
        }
        let move_signed = signed_move(side, entry_price, exit_price);
        if move_signed * required_sign <= 0.0 {
            continue;
        }
        let quantity = solve_quantity(target, move_signed.abs(), entry_price, is_win, settings);
        let (realized, _) = realized_pnl(move_signed, quantity, entry_price, settings.fee_rate);
        // The min-lot floor (or a fee term) can flip a tiny move back across
        // zero; such candidates are not valid exits.
        if realized * required_sign <= 0.0 {
            continue;
        }
        let error = (realized.abs() - target).abs();
        if best.map_or(true, |(_, best_error)| error < best_error) {
            best = Some((idx, error));
        }
    }

    best.map(|(idx, _)| idx)
}

fn clamp_timestamp(
    ts: DateTime<Utc>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> DateTime<Utc> {
    ts.max(window_start).min(window_end)
}

/// Converts one signed P&L magnitude into a concrete trade priced against the
/// given candle series. Candles may arrive in any order. When no real price
/// path matches the required outcome the exit is simulated with a small
/// random move in the required direction; that is a designed degradation for
/// thin or flat windows, not an error.
pub fn materialize(
    symbol: &str,
    target_magnitude: f64,
    is_win: bool,
    candles: &[Candle],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    settings: &GeneratorSettings,
    rng: &mut impl Rng,
) -> Result<GeneratedTrade, MaterializeError> {
    if candles.is_empty() {
        return Err(MaterializeError::NoCandles {
            symbol: symbol.to_string(),
        });
    }

    let mut sorted: Vec<&Candle> = candles.iter().collect();
    sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let len = sorted.len();

    let entry_zone = ((len as f64 * ENTRY_ZONE_RATIO) as usize).max(1);
    let entry_idx = rng.gen_range(0..entry_zone);
    let entry = sorted[entry_idx];
    let entry_price = entry.close;
    if !entry_price.is_finite() || entry_price <= 0.0 {
        return Err(MaterializeError::InvalidSeries {
            symbol: symbol.to_string(),
        });
    }

    let side = if rng.gen_bool(0.5) {
        TradeSide::Buy
    } else {
        TradeSide::Sell
    };

    let (exit_idx, exit_price) = match find_real_exit(
        &sorted,
        entry_idx,
        side,
        is_win,
        target_magnitude,
        settings,
    ) {
        Some(idx) => (idx, sorted[idx].close),
        None => {
            let anchor_idx = (entry_idx + SIM_ANCHOR_OFFSET).min(len - 1);
            let pct = rng.gen_range(settings.sim_move_min..=settings.sim_move_max);
            let direction = match (side, is_win) {
                (TradeSide::Buy, true) | (TradeSide::Sell, false) => 1.0,
                _ => -1.0,
            };
            (anchor_idx, entry_price * (1.0 + direction * pct))
        }
    };

    let move_signed = signed_move(side, entry_price, exit_price);
    let quantity = solve_quantity(
        target_magnitude,
        move_signed.abs(),
        entry_price,
        is_win,
        settings,
    );
    let (realized, fees) = realized_pnl(move_signed, quantity, entry_price, settings.fee_rate);
    let required_sign = if is_win { 1.0 } else { -1.0 };
    if realized * required_sign <= 0.0 {
        return Err(MaterializeError::OutcomeUnreachable {
            symbol: symbol.to_string(),
            outcome: if is_win { "winning" } else { "losing" },
        });
    }

    let opened_at = clamp_timestamp(entry.timestamp, window_start, window_end);
    let mut closed_at = clamp_timestamp(sorted[exit_idx].timestamp, window_start, window_end);
    if closed_at <= opened_at {
        closed_at = opened_at + Duration::minutes(5);
    }

    Ok(GeneratedTrade {
        symbol: symbol.to_string(),
        side,
        quantity,
        open_price: entry_price,
        close_price: exit_price,
        opened_at,
        closed_at,
        realized_pnl: realized,
        fees,
        is_win: realized > 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings() -> GeneratorSettings {
        GeneratorSettings::default()
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 6, 9, 1, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 9, 4, 0, 0).unwrap(),
        )
    }

    fn series(closes: &[f64]) -> Vec<Candle> {
        let (start, _) = window();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Candle {
                symbol: "EURUSD".to_string(),
                timestamp: start + Duration::minutes(i as i64),
                open: *close,
                high: close + 0.5,
                low: close - 0.5,
                close: *close,
            })
            .collect()
    }

    /// Alternating closes with growing amplitude: every candle is followed by
    /// both strictly higher and strictly lower closes, so a real exit exists
    /// for any side/outcome combination from any entry.
    fn zigzag(len: usize) -> Vec<Candle> {
        let closes: Vec<f64> = (0..len)
            .map(|i| {
                let amplitude = 5.0 + i as f64 * 0.1;
                if i % 2 == 0 {
                    100.0 - amplitude
                } else {
                    100.0 + amplitude
                }
            })
            .collect();
        series(&closes)
    }

    #[test]
    fn real_exit_is_found_in_a_zigzag_series() {
        let candles = zigzag(60);
        let sorted: Vec<&Candle> = candles.iter().collect();
        for side in [TradeSide::Buy, TradeSide::Sell] {
            for is_win in [true, false] {
                let exit = find_real_exit(&sorted, 3, side, is_win, 10.0, &settings());
                assert!(exit.is_some(), "no exit for {:?}/{}", side, is_win);
                let idx = exit.unwrap();
                assert!((8..=43).contains(&idx));
            }
        }
    }

    #[test]
    fn flat_series_yields_no_real_exit() {
        let candles = series(&[100.0; 60]);
        let sorted: Vec<&Candle> = candles.iter().collect();
        assert!(find_real_exit(&sorted, 0, TradeSide::Buy, true, 10.0, &settings()).is_none());
    }

    #[test]
    fn materialized_sign_matches_outcome_on_real_path() {
        let candles = zigzag(60);
        let (ws, we) = window();
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        for seed in 0..30u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let trade =
                materialize("EURUSD", 12.0, true, &candles, ws, we, &settings(), &mut rng).unwrap();
            assert!(trade.realized_pnl > 0.0);
            assert!(trade.is_win);
            // A zigzag always offers a sign-matching real exit, so the close
            // must be a real candle price rather than a simulated one.
            assert!(closes.iter().any(|c| (c - trade.close_price).abs() < 1e-12));

            let mut rng = StdRng::seed_from_u64(seed);
            let trade =
                materialize("EURUSD", 12.0, false, &candles, ws, we, &settings(), &mut rng).unwrap();
            assert!(trade.realized_pnl < 0.0);
            assert!(!trade.is_win);
        }
    }

    #[test]
    fn flat_series_falls_back_to_simulated_exit() {
        let candles = series(&[100.0; 60]);
        let (ws, we) = window();
        for seed in 0..30u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let trade =
                materialize("EURUSD", 8.0, true, &candles, ws, we, &settings(), &mut rng).unwrap();
            assert!(trade.realized_pnl > 0.0);
            // Simulated exits move 0.5%-2.5% away from the flat price.
            let deviation = (trade.close_price - 100.0).abs() / 100.0;
            assert!((0.005..=0.025).contains(&deviation));
            assert!(trade.closed_at > trade.opened_at);

            let mut rng = StdRng::seed_from_u64(seed);
            let trade =
                materialize("EURUSD", 8.0, false, &candles, ws, we, &settings(), &mut rng).unwrap();
            assert!(trade.realized_pnl < 0.0);
        }
    }

    #[test]
    fn unsorted_series_behaves_like_sorted() {
        let mut candles = zigzag(60);
        candles.reverse();
        let (ws, we) = window();
        let mut rng = StdRng::seed_from_u64(11);
        let trade =
            materialize("EURUSD", 5.0, true, &candles, ws, we, &settings(), &mut rng).unwrap();
        assert!(trade.realized_pnl > 0.0);
        assert!(trade.closed_at > trade.opened_at);
        assert!(trade.opened_at >= ws && trade.opened_at <= we);
    }

    #[test]
    fn empty_series_is_an_error() {
        let (ws, we) = window();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            materialize("EURUSD", 5.0, true, &[], ws, we, &settings(), &mut rng),
            Err(MaterializeError::NoCandles { .. })
        ));
    }

    #[test]
    fn tiny_targets_floor_at_minimum_lot() {
        let candles = zigzag(60);
        let (ws, we) = window();
        let mut rng = StdRng::seed_from_u64(3);
        let trade = materialize(
            "EURUSD",
            0.0001,
            true,
            &candles,
            ws,
            we,
            &settings(),
            &mut rng,
        )
        .unwrap();
        assert!(trade.quantity >= settings().min_quantity);
        assert!(trade.realized_pnl > 0.0);
    }

    #[test]
    fn win_and_loss_quantity_formulas_diverge_with_fees() {
        let mut with_fees = settings();
        with_fees.fee_rate = 0.01;
        // abs move 2.0 on a 100.0 entry: fee term is 1.0, so the win divides
        // by 1.0 and the loss by 3.0.
        let win_quantity = solve_quantity(6.0, 2.0, 100.0, true, &with_fees);
        let loss_quantity = solve_quantity(6.0, 2.0, 100.0, false, &with_fees);
        assert!((win_quantity - 6.0).abs() < 1e-9);
        assert!((loss_quantity - 2.0).abs() < 1e-9);

        let zero_fee = settings();
        let symmetric_win = solve_quantity(6.0, 2.0, 100.0, true, &zero_fee);
        let symmetric_loss = solve_quantity(6.0, 2.0, 100.0, false, &zero_fee);
        assert!((symmetric_win - symmetric_loss).abs() < 1e-9);
    }
}
