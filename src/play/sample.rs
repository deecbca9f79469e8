use std::io::Write;

use anyhow::anyhow;
use shakmaty::fen::Fen;
use shakmaty::{Chess, Color, EnPassantMode, Position, Role};

use crate::play::game::PlayerResult;
use crate::Res;

/// How training samples are written out.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    Csv,
    Bin,
}

/// Controls which positions of a game are kept as training samples.
#[derive(Debug, Copy, Clone)]
pub struct SampleParams {
    /// Base probability of keeping a position.
    pub freq: f64,
    /// Exponential damping by the halfmove clock: positions long after the
    /// last capture or pawn move are kept less often.
    pub decay: f64,
    /// Resolve the engine's PV to a quiet position before sampling.
    pub resolve: bool,
}

/// One training sample. The score is in centipawns from the POV of the side
/// to move in `pos`; the result is from the same POV and is only known once
/// the game is over.
#[derive(Debug, Clone)]
pub struct Sample {
    pub pos: Chess,
    pub score: i16,
    pub result: Option<PlayerResult>,
}

fn result_byte(sample: &Sample) -> Res<u8> {
    let result = sample
        .result
        .ok_or_else(|| anyhow!("Tried to write a sample before its game result was known"))?;
    Ok(match result {
        PlayerResult::Lose => 0,
        PlayerResult::Draw => 1,
        PlayerResult::Win => 2,
    })
}

/// Writes one `<FEN>,<score>,<result>` line per sample.
pub fn write_csv(samples: &[Sample], out: &mut impl Write) -> Res<()> {
    for sample in samples {
        let fen = Fen::from_position(sample.pos.clone(), EnPassantMode::Legal);
        writeln!(out, "{fen},{},{}", sample.score, result_byte(sample)?)?;
    }
    Ok(())
}

/// Writes the packed form of each sample: the packed position, the score as
/// a little-endian `i16`, and the result as one byte (0 loss, 1 draw, 2 win).
pub fn write_bin(samples: &[Sample], out: &mut impl Write) -> Res<()> {
    for sample in samples {
        out.write_all(&pack(&sample.pos))?;
        out.write_all(&sample.score.to_le_bytes())?;
        out.write_all(&[result_byte(sample)?])?;
    }
    Ok(())
}

fn role_code(role: Role) -> u8 {
    match role {
        Role::Pawn => 0,
        Role::Knight => 1,
        Role::Bishop => 2,
        Role::Rook => 3,
        Role::Queen => 4,
        Role::King => 5,
    }
}

/// Packs a position into `10 + (n+1)/2` bytes for `n` occupied squares:
/// the occupancy bitboard as a little-endian `u64` (a1 = bit 0), one nibble
/// per occupied square in ascending square order (bits 0-2 the role from
/// pawn to king, bit 3 set for black), zero-padded to a whole byte, then one
/// byte for the side to move and one for the halfmove clock (capped at 255).
pub fn pack(pos: &Chess) -> Vec<u8> {
    let board = pos.board();
    let occupied = board.occupied();
    let mut bytes = Vec::with_capacity(10 + 16);
    bytes.extend_from_slice(&u64::from(occupied).to_le_bytes());
    let mut pending = None;
    for square in occupied {
        let Some(piece) = board.piece_at(square) else {
            continue;
        };
        let code = role_code(piece.role) | if piece.color == Color::Black { 8 } else { 0 };
        match pending.take() {
            None => pending = Some(code),
            Some(low) => bytes.push(low | (code << 4)),
        }
    }
    if let Some(low) = pending {
        bytes.push(low);
    }
    bytes.push(if pos.turn() == Color::White { 0 } else { 1 });
    bytes.push(pos.halfmoves().min(255) as u8);
    bytes
}
