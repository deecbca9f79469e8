use crate::play::uci::ScoreT;

/// Thresholds for one adjudication rule, as given on the command line.
#[derive(Debug, Default, Copy, Clone)]
pub struct AdjudicationRule {
    /// How many consecutive qualifying moves are required. For draws this
    /// counts full moves (both sides must qualify), for resignations it
    /// counts the resigning engine's own moves.
    pub count: usize,
    /// Centipawn threshold.
    pub score: ScoreT,
    /// First full-move number at which the rule may trigger.
    pub number: usize,
}

/// Declares a game drawn once both engines have reported near-zero scores
/// for long enough. Counting is in plies, never wall time, so a rerun with
/// the same move sequence adjudicates at the same point.
#[derive(Debug, Default)]
pub struct DrawAdjudicator {
    rule: Option<AdjudicationRule>,
    plies: usize,
}

impl DrawAdjudicator {
    pub fn new(rule: Option<AdjudicationRule>) -> Self {
        Self { rule, plies: 0 }
    }

    /// Feeds the score of the move just chosen at `ply`; returns true when
    /// the game should be adjudicated as a draw.
    pub fn update(&mut self, ply: usize, score: ScoreT) -> bool {
        let Some(rule) = self.rule else {
            return false;
        };
        if score.abs() <= rule.score {
            self.plies += 1;
        } else {
            self.plies = 0;
        }
        // the factor of two makes `count` full moves: both sides must have
        // stayed within the threshold for the whole window
        self.plies >= 2 * rule.count && ply / 2 + 1 >= rule.number
    }
}

/// Declares a game lost for an engine that has reported a hopeless score
/// for `count` of its own moves in a row.
#[derive(Debug, Default)]
pub struct ResignAdjudicator {
    rule: Option<AdjudicationRule>,
    counts: [usize; 2],
}

impl ResignAdjudicator {
    pub fn new(rule: Option<AdjudicationRule>) -> Self {
        Self { rule, counts: [0; 2] }
    }

    /// Feeds the score engine `ei` reported at `ply`; returns true when that
    /// engine resigns.
    pub fn update(&mut self, ei: usize, ply: usize, score: ScoreT) -> bool {
        let Some(rule) = self.rule else {
            return false;
        };
        if score <= -rule.score {
            self.counts[ei] += 1;
        } else {
            self.counts[ei] = 0;
        }
        self.counts[ei] >= rule.count && ply / 2 + 1 >= rule.number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULE: AdjudicationRule = AdjudicationRule { count: 2, score: 10, number: 1 };

    #[test]
    fn draw_needs_both_sides_quiet() {
        let mut draw = DrawAdjudicator::new(Some(RULE));
        assert!(!draw.update(0, 5));
        assert!(!draw.update(1, -3));
        assert!(!draw.update(2, 0));
        assert!(draw.update(3, 8));
    }

    #[test]
    fn draw_counter_resets_on_large_score() {
        let mut draw = DrawAdjudicator::new(Some(RULE));
        for ply in 0..3 {
            assert!(!draw.update(ply, 0));
        }
        assert!(!draw.update(3, 300));
        for ply in 4..7 {
            assert!(!draw.update(ply, 0));
        }
        assert!(draw.update(7, 0));
    }

    #[test]
    fn draw_respects_move_number() {
        let rule = AdjudicationRule { count: 1, score: 10, number: 5 };
        let mut draw = DrawAdjudicator::new(Some(rule));
        for ply in 0..8 {
            assert!(!draw.update(ply, 0), "triggered before move {}", ply / 2 + 1);
        }
        assert!(draw.update(8, 0));
    }

    #[test]
    fn resign_counters_are_per_engine() {
        let rule = AdjudicationRule { count: 2, score: 500, number: 1 };
        let mut resign = ResignAdjudicator::new(Some(rule));
        assert!(!resign.update(0, 0, -600));
        assert!(!resign.update(1, 1, 600));
        assert!(!resign.update(1, 3, -600));
        assert!(resign.update(0, 2, -600));
    }

    #[test]
    fn raising_thresholds_never_accelerates_adjudication() {
        let scores = [0, 4, -2, 0, 12, 0, -1, 0, 3, -4, 0, 0];
        let trigger_ply = |count: usize| {
            let rule = AdjudicationRule { count, score: 10, number: 1 };
            let mut draw = DrawAdjudicator::new(Some(rule));
            scores.iter().enumerate().find(|&(ply, &s)| draw.update(ply, s)).map(|(ply, _)| ply)
        };
        let lenient = trigger_ply(2);
        let strict = trigger_ply(3);
        assert_eq!(lenient, Some(3));
        assert_eq!(strict, Some(10));
        match (lenient, strict) {
            (Some(a), Some(b)) => assert!(a <= b),
            (None, Some(_)) => panic!("raising the threshold created an adjudication"),
            _ => {}
        }
    }

    #[test]
    fn disabled_rules_never_trigger() {
        let mut draw = DrawAdjudicator::new(None);
        let mut resign = ResignAdjudicator::new(None);
        for ply in 0..100 {
            assert!(!draw.update(ply, 0));
            assert!(!resign.update(ply % 2, ply, -10_000));
        }
    }
}
