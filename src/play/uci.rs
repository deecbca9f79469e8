use std::fmt::Write;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use itertools::Itertools;
use shakmaty::Position;

use crate::play::game::{color_idx, Game};
use crate::Res;

pub type ScoreT = i32;

/// Scores reported as `score mate n` are folded into the centipawn range:
/// a mate in n plies for the searching side becomes `SCORE_WON - n`, a mate
/// against it `SCORE_LOST - n` (n negative). Everything stays within `i16`.
pub const SCORE_WON: ScoreT = i16::MAX as ScoreT;
pub const SCORE_LOST: ScoreT = i16::MIN as ScoreT;
const MAX_MATE_PLIES: ScoreT = 1000;

pub fn is_mate_score(score: ScoreT) -> bool {
    score >= SCORE_WON - MAX_MATE_PLIES || score <= SCORE_LOST + MAX_MATE_PLIES
}

/// Renders a score the way it appears in PGN comments: `M<n>` when mating,
/// `-M<n>` when getting mated, the raw centipawn value otherwise.
pub fn format_score(score: ScoreT) -> String {
    if score >= SCORE_WON - MAX_MATE_PLIES {
        format!("M{}", SCORE_WON - score)
    } else if score <= SCORE_LOST + MAX_MATE_PLIES {
        format!("-M{}", score - SCORE_LOST)
    } else {
        score.to_string()
    }
}

/// Engine telemetry for one ply, taken from the last `info` line before
/// `bestmove`. The score is in centipawns from the searching side's POV.
#[derive(Debug, Default, Copy, Clone)]
pub struct SearchInfo {
    pub depth: u32,
    pub score: ScoreT,
    /// Search time in milliseconds, as reported by the engine.
    pub time: u64,
}

/// Per-engine search limits. All durations are in milliseconds.
#[derive(Debug, Default, Copy, Clone)]
pub struct SearchLimits {
    pub time: Option<i64>,
    pub increment: Option<i64>,
    pub movetime: Option<i64>,
    pub nodes: Option<u64>,
    pub depth: Option<u32>,
    pub movestogo: Option<u32>,
}

impl SearchLimits {
    /// Whether this engine plays under a clock at all. Without a clock the
    /// driver never adjudicates time losses.
    pub fn is_clocked(&self) -> bool {
        self.time.is_some() || self.increment.is_some() || self.movetime.is_some()
    }

    pub fn is_unlimited(&self) -> bool {
        !self.is_clocked() && self.nodes.is_none() && self.depth.is_none()
    }
}

/// Builds the `position` command for the current game state. The FEN sent is
/// the position of the last irreversible move (capture or pawn push); only
/// the moves since then are appended. Earlier moves cannot influence the
/// search window, so this keeps the command short without losing anything.
pub fn position_command(game: &Game) -> String {
    let ply = game.ply();
    let ply0 = ply.saturating_sub(game.current().halfmoves() as usize);
    let mut cmd = format!("position fen {}", game.fen_at(ply0));
    if ply0 < ply {
        cmd.push_str(" moves");
        for i in ply0..ply {
            _ = write!(cmd, " {}", game.lan(i));
        }
    }
    cmd
}

/// Builds the `go` command for the engine with index `ei`, which is about to
/// move. `time_left` is indexed by engine, `wtime`/`btime` by color, so the
/// clocks are remapped through the side to move: whichever engine currently
/// plays White receives its own remaining time as `wtime`.
pub fn go_command(game: &Game, limits: &[SearchLimits; 2], ei: usize, time_left: &[i64; 2]) -> String {
    let lim = &limits[ei];
    let mut cmd = "go".to_string();
    if let Some(nodes) = lim.nodes {
        _ = write!(cmd, " nodes {nodes}");
    }
    if let Some(depth) = lim.depth {
        _ = write!(cmd, " depth {depth}");
    }
    if let Some(movetime) = lim.movetime {
        _ = write!(cmd, " movetime {movetime}");
    }
    if lim.time.is_some() || lim.increment.is_some() {
        let color = color_idx(game.current().turn());
        let white = ei ^ color;
        let black = white ^ 1;
        _ = write!(
            cmd,
            " wtime {} winc {} btime {} binc {}",
            time_left[white],
            limits[white].increment.unwrap_or(0),
            time_left[black],
            limits[black].increment.unwrap_or(0)
        );
    }
    if let Some(movestogo) = lim.movestogo {
        // full moves left until the next periodic clock reset
        _ = write!(cmd, " movestogo {}", movestogo - (game.ply() as u32 / 2) % movestogo);
    }
    cmd
}

fn next_int<'a, T: FromStr>(words: &mut impl Iterator<Item = &'a str>, name: &str) -> Res<T> {
    let word = words.next().ok_or_else(|| anyhow!("Missing value after '{name}'"))?;
    word.parse().map_err(|_| anyhow!("Couldn't parse {name} ('{word}')"))
}

/// Folds one `info` line into `info` and `pv`. The driver keeps whatever the
/// engine reported last before `bestmove`; keys it doesn't care about are
/// skipped without complaint, but a malformed value for a known key is an
/// error (which the caller downgrades to a warning).
pub fn parse_info(line: &str, info: &mut SearchInfo, pv: &mut String) -> Res<()> {
    let mut words = line.split_whitespace();
    if words.next() != Some("info") {
        bail!("Expected an 'info' line, got '{line}'");
    }
    while let Some(key) = words.next() {
        match key {
            "depth" => info.depth = next_int(&mut words, "depth")?,
            "time" => info.time = next_int(&mut words, "time")?,
            "score" => match words.next() {
                Some("cp") => info.score = next_int(&mut words, "score cp")?,
                Some("mate") => {
                    let plies: ScoreT = next_int(&mut words, "score mate")?;
                    info.score = if plies >= 0 { SCORE_WON - plies } else { SCORE_LOST - plies };
                }
                other => bail!("Unrecognized score type {:?}", other.unwrap_or("")),
            },
            "pv" => {
                // the rest of the line is the principal variation
                pv.clear();
                pv.push_str(&words.join(" "));
                break;
            }
            "string" => break,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::play::openings::STARTPOS_FEN;

    #[test]
    fn go_command_emits_configured_limits_in_order() {
        let game = Game::new(0, 0, STARTPOS_FEN).unwrap();
        let limits = [
            SearchLimits {
                nodes: Some(1000),
                depth: Some(8),
                movetime: Some(50),
                ..SearchLimits::default()
            },
            SearchLimits::default(),
        ];
        assert_eq!(go_command(&game, &limits, 0, &[0, 0]), "go nodes 1000 depth 8 movetime 50");
    }

    #[test]
    fn go_command_maps_clocks_through_the_side_to_move() {
        let game = Game::new(0, 0, STARTPOS_FEN).unwrap();
        let limits = [
            SearchLimits { time: Some(1000), increment: Some(10), ..SearchLimits::default() },
            SearchLimits { time: Some(2000), increment: Some(20), ..SearchLimits::default() },
        ];
        // engine 0 to move, playing White
        assert_eq!(
            go_command(&game, &limits, 0, &[500, 700]),
            "go wtime 500 winc 10 btime 700 binc 20"
        );
        // engine 1 to move, playing White: its clock becomes wtime
        assert_eq!(
            go_command(&game, &limits, 1, &[500, 700]),
            "go wtime 700 winc 20 btime 500 binc 10"
        );
    }

    #[test]
    fn go_command_counts_down_movestogo() {
        let game = Game::new(0, 0, STARTPOS_FEN).unwrap();
        let limits = [
            SearchLimits {
                time: Some(1000),
                movestogo: Some(40),
                ..SearchLimits::default()
            },
            SearchLimits::default(),
        ];
        assert_eq!(
            go_command(&game, &limits, 0, &[1000, 1000]),
            "go wtime 1000 winc 0 btime 1000 binc 0 movestogo 40"
        );
    }

    #[test]
    fn parses_depth_score_time_and_pv() {
        let mut info = SearchInfo::default();
        let mut pv = String::new();
        parse_info(
            "info depth 12 seldepth 19 score cp -31 nodes 12345 nps 1000000 time 87 pv e2e4 e7e5 g1f3",
            &mut info,
            &mut pv,
        )
        .unwrap();
        assert_eq!(info.depth, 12);
        assert_eq!(info.score, -31);
        assert_eq!(info.time, 87);
        assert_eq!(pv, "e2e4 e7e5 g1f3");
    }

    #[test]
    fn later_info_lines_win() {
        let mut info = SearchInfo::default();
        let mut pv = String::new();
        parse_info("info depth 1 score cp 10 pv e2e4", &mut info, &mut pv).unwrap();
        parse_info("info depth 2 score cp -5 pv d2d4 d7d5", &mut info, &mut pv).unwrap();
        assert_eq!(info.depth, 2);
        assert_eq!(info.score, -5);
        assert_eq!(pv, "d2d4 d7d5");
    }

    #[test]
    fn mate_scores_fold_into_i16_range() {
        let mut info = SearchInfo::default();
        let mut pv = String::new();
        parse_info("info score mate 3", &mut info, &mut pv).unwrap();
        assert_eq!(info.score, SCORE_WON - 3);
        assert!(is_mate_score(info.score));
        parse_info("info score mate -4", &mut info, &mut pv).unwrap();
        assert_eq!(info.score, SCORE_LOST + 4);
        assert!(is_mate_score(info.score));
        assert!(!is_mate_score(250));
    }

    #[test]
    fn malformed_scores_are_errors() {
        let mut info = SearchInfo::default();
        let mut pv = String::new();
        assert!(parse_info("info score banana 3", &mut info, &mut pv).is_err());
        assert!(parse_info("info depth twelve", &mut info, &mut pv).is_err());
    }

    #[test]
    fn score_formatting() {
        assert_eq!(format_score(123), "123");
        assert_eq!(format_score(-250), "-250");
        assert_eq!(format_score(SCORE_WON - 5), "M5");
        assert_eq!(format_score(SCORE_LOST + 7), "-M7");
    }
}
