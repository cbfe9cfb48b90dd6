//! Elo-style rating transfer scaled by how decisively a match was won.

use ladder_types::{Mode, PlayerRecord};

const TIME_BASE_K: f64 = 30.0;
const SCORE_BASE_K: f64 = 26.0;

/// A time margin of this fraction of the winning time counts as decisive.
const TIME_RELATIVE_DECISIVE: f64 = 0.10;
/// A time margin of this many seconds counts as decisive regardless of length.
const TIME_ABSOLUTE_DECISIVE: f64 = 45.0;
/// Runs longer than this are damped.
const TIME_LENGTH_PIVOT: f64 = 180.0;
const MIN_WINNER_TIME: f64 = 1e-3;

const SWING_MIN: f64 = 0.35;
const SWING_MAX: f64 = 2.75;

/// Probability that the winner was expected to win.
pub fn expected_score(rating_winner: f64, rating_loser: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_loser - rating_winner) / 400.0))
}

/// Points the winner gains and the loser gives up. Pure and never negative.
pub fn compute_delta(
    mode: Mode,
    rating_winner: f64,
    rating_loser: f64,
    winner_metric: f64,
    loser_metric: f64,
) -> f64 {
    let expected = expected_score(rating_winner, rating_loser);

    let (base_k, margin_multiplier) = match mode {
        Mode::Speedrun => {
            let margin = (loser_metric - winner_metric).max(0.0);
            let winner_time = winner_metric.max(MIN_WINNER_TIME);
            let relative = (margin / winner_time / TIME_RELATIVE_DECISIVE).min(1.0);
            let absolute = (margin / TIME_ABSOLUTE_DECISIVE).min(1.0);
            let margin_scale = relative.max(absolute);
            let length_scale = (TIME_LENGTH_PIVOT / winner_time.max(TIME_LENGTH_PIVOT)).min(1.0);
            (
                TIME_BASE_K,
                (0.2 + 0.8 * margin_scale) * (0.6 + 0.4 * length_scale),
            )
        }
        Mode::Score { target } => {
            let target = f64::from(target.max(1));
            let diff = (winner_metric - loser_metric).max(0.0);
            let relative = (diff / target.max(1.0)).min(1.0);
            let absolute = (diff / (target * 0.5).max(1.0)).min(1.0);
            let margin_scale = relative.max(absolute);
            (SCORE_BASE_K, 0.25 + 0.75 * margin_scale)
        }
    };

    let swing = if expected < 0.5 {
        1.0 + (0.5 - expected) * 3.0
    } else {
        1.0 - (expected - 0.5) * 0.8
    }
    .clamp(SWING_MIN, SWING_MAX);

    base_k * margin_multiplier * swing * (1.0 - expected)
}

/// Ratings before and after one applied result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transfer {
    pub delta: f64,
    pub winner_old: f64,
    pub loser_old: f64,
    pub winner_new: f64,
    pub loser_new: f64,
}

/// Move `delta` from loser to winner, flooring both at zero, and count the
/// win and the loss.
pub fn apply(delta: f64, winner: &mut PlayerRecord, loser: &mut PlayerRecord) -> Transfer {
    let winner_old = winner.rating;
    let loser_old = loser.rating;
    winner.rating = (winner.rating + delta).max(0.0);
    loser.rating = (loser.rating - delta).max(0.0);
    winner.wins += 1;
    loser.losses += 1;
    Transfer {
        delta,
        winner_old,
        loser_old,
        winner_new: winner.rating,
        loser_new: loser.rating,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn even_speedrun_two_second_margin() {
        // relative margin 2/60 dominates the absolute one
        let delta = compute_delta(Mode::Speedrun, 800.0, 800.0, 60.0, 62.0);
        assert!(close(delta, 7.0), "delta was {}", delta);

        let mut winner = PlayerRecord::fresh(800.0);
        let mut loser = PlayerRecord::fresh(800.0);
        let t = apply(delta, &mut winner, &mut loser);
        assert!(close(t.winner_new, 807.0));
        assert!(close(t.loser_new, 793.0));
        assert_eq!((winner.wins, winner.losses), (1, 0));
        assert_eq!((loser.wins, loser.losses), (0, 1));
    }

    #[test]
    fn score_forfeit_at_target_three() {
        let delta = compute_delta(Mode::score(3), 800.0, 800.0, 3.0, 0.0);
        assert!(close(delta, 13.0));
    }

    #[test]
    fn favourite_wins_stay_within_base_k() {
        for gap in [0.0, 50.0, 200.0, 600.0] {
            for (w, l) in [(10.0, 10.5), (60.0, 75.0), (400.0, 900.0)] {
                let d = compute_delta(Mode::Speedrun, 1000.0 + gap, 1000.0, w, l);
                assert!(d > 0.0 && d <= 30.0, "time delta {} out of range", d);
            }
            for loser_score in 0..5 {
                let d = compute_delta(Mode::score(5), 1000.0 + gap, 1000.0, 5.0, f64::from(loser_score));
                assert!(d > 0.0 && d <= 26.0, "score delta {} out of range", d);
            }
        }
    }

    #[test]
    fn upset_can_exceed_base_k() {
        let d = compute_delta(Mode::Speedrun, 600.0, 1400.0, 30.0, 120.0);
        assert!(d > 30.0);
    }

    #[test]
    fn delta_grows_with_margin() {
        let mut previous = 0.0;
        for loser_time in [60.5, 61.0, 63.0, 65.0] {
            let d = compute_delta(Mode::Speedrun, 800.0, 800.0, 60.0, loser_time);
            assert!(d > previous);
            previous = d;
        }
        let mut previous = 0.0;
        for loser_score in [6.0, 5.0, 4.0] {
            let d = compute_delta(Mode::score(7), 800.0, 800.0, 7.0, loser_score);
            assert!(d > previous);
            previous = d;
        }
    }

    #[test]
    fn transfer_is_symmetric_until_the_floor() {
        let mut winner = PlayerRecord::fresh(900.0);
        let mut loser = PlayerRecord::fresh(850.0);
        let t = apply(12.5, &mut winner, &mut loser);
        assert!(close(t.winner_new - t.winner_old, 12.5));
        assert!(close(t.loser_old - t.loser_new, 12.5));

        let mut winner = PlayerRecord::fresh(10.0);
        let mut loser = PlayerRecord::fresh(4.0);
        let t = apply(9.0, &mut winner, &mut loser);
        assert!(close(t.winner_new, 19.0));
        assert_eq!(t.loser_new, 0.0);
    }
}
