use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use anyhow::{bail, Context};
use colored::Colorize;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::cli::Settings;
use crate::play::engine::{Engine, UciEngine};
use crate::play::game::{Game, GameOptions, BLACK, WHITE};
use crate::play::openings::{OpeningBook, STARTPOS_FEN};
use crate::play::pgn;
use crate::play::sample::{self, SampleFormat};
use crate::Res;

/// Per-thread context: identifies the worker in diagnostics, seeds its PRNG,
/// and owns its optional engine I/O log.
pub struct Worker {
    pub id: usize,
    pub rng: StdRng,
    log: Option<BufWriter<File>>,
}

impl Worker {
    /// With `log`, every engine command and reply this worker sees is
    /// mirrored into `arbiters-<id>.log`.
    pub fn new(id: usize, seed: u64, log: bool) -> Res<Self> {
        let log = if log {
            let path = format!("arbiters-{id}.log");
            let file =
                File::create(&path).with_context(|| format!("Couldn't create log file '{path}'"))?;
            Some(BufWriter::new(file))
        } else {
            None
        };
        Ok(Self { id, rng: StdRng::seed_from_u64(seed.wrapping_add(id as u64)), log })
    }

    pub fn warn(&mut self, msg: &str) {
        println!("{} {msg}", "Warning:".yellow().bold());
        if let Some(log) = &mut self.log {
            _ = writeln!(log, "warning: {msg}");
        }
    }

    /// Records one line of engine traffic; `dir` is `'<'` for commands sent
    /// to the engine and `'>'` for its replies.
    pub fn log_line(&mut self, engine: &str, dir: char, line: &str) {
        if let Some(log) = &mut self.log {
            _ = writeln!(log, "{engine} {dir} {line}");
        }
    }
}

/// Plays all scheduled rounds. Workers pull rounds off a shared counter so
/// that slow games don't leave threads idle, fetch the round's opening from
/// the shared book, and play it `games` times with alternating colors.
pub fn run(settings: Settings) -> Res<()> {
    let book = settings
        .openings
        .as_ref()
        .map(|o| OpeningBook::open(&o.file, o.random, settings.srand))
        .transpose()?;
    let pgn_out = settings
        .pgn
        .as_ref()
        .map(|p| {
            File::create(&p.file)
                .with_context(|| format!("Couldn't create PGN file '{}'", p.file.display()))
                .map(|file| Mutex::new(BufWriter::new(file)))
        })
        .transpose()?;
    let sample_out = settings
        .sample
        .as_ref()
        .map(|s| {
            File::create(&s.file)
                .with_context(|| format!("Couldn't create sample file '{}'", s.file.display()))
                .map(|file| Mutex::new(BufWriter::new(file)))
        })
        .transpose()?;
    let counter = AtomicUsize::new(0);

    let settings = &settings;
    let book = book.as_ref();
    let pgn_out = pgn_out.as_ref();
    let sample_out = sample_out.as_ref();
    let counter = &counter;
    thread::scope(|scope| {
        let mut handles = vec![];
        for id in 0..settings.concurrency {
            handles.push(scope.spawn(move || worker_main(id, settings, book, counter, pgn_out, sample_out)));
        }
        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => bail!("A worker thread panicked"),
            }
        }
        Ok(())
    })
}

fn start_engine(worker: &mut Worker, settings: &Settings, which: usize) -> Res<UciEngine> {
    let engine = &settings.engines[which];
    UciEngine::start(
        worker,
        &engine.cmd,
        &engine.args,
        engine.name.as_deref(),
        &engine.options,
        settings.time_margin,
    )
    .with_context(|| format!("Worker {} couldn't initialize engine '{}'", worker.id, engine.cmd))
}

fn worker_main(
    id: usize,
    settings: &Settings,
    book: Option<&OpeningBook>,
    counter: &AtomicUsize,
    pgn_out: Option<&Mutex<BufWriter<File>>>,
    sample_out: Option<&Mutex<BufWriter<File>>>,
) -> Res<()> {
    let mut worker = Worker::new(id, settings.srand, settings.log)?;
    let mut first = start_engine(&mut worker, settings, 0)?;
    let mut second = start_engine(&mut worker, settings, 1)?;
    let limits = [settings.engines[0].limits, settings.engines[1].limits];
    let options = GameOptions {
        draw: settings.draw,
        resign: settings.resign,
        sample: settings.sample.as_ref().map(|s| s.params),
    };

    loop {
        let round = counter.fetch_add(1, Ordering::Relaxed);
        if round >= settings.rounds {
            return Ok(());
        }
        let fen = match book {
            Some(book) => book.next()?,
            None => STARTPOS_FEN.to_string(),
        };
        for game_nr in 0..settings.games {
            let mut game = Game::new(round, game_nr, &fen)?;
            let reverse = game_nr % 2 == 1;
            let mut players: [&mut dyn Engine; 2] = [&mut first, &mut second];
            _ = game
                .play(&mut worker, &mut players, &limits, &options, reverse)
                .with_context(|| format!("Worker {id}: game {}.{} failed", round + 1, game_nr + 1))?;
            println!(
                "[{id}] Finished game {}.{} ({} vs {}): {} ({})",
                round + 1,
                game_nr + 1,
                game.names[WHITE],
                game.names[BLACK],
                pgn::result_token(&game),
                pgn::termination_str(&game)
            );
            // one exclusive lock per output and game, so concurrent workers
            // never interleave records
            if let (Some(out), Some(pgn_settings)) = (pgn_out, settings.pgn.as_ref()) {
                let text =
                    pgn::game_to_pgn(&game, pgn_settings.verbosity, &settings.event, &settings.site);
                let mut out = out.lock().unwrap();
                out.write_all(text.as_bytes())?;
                out.flush()?;
            }
            if let (Some(out), Some(sample_settings)) = (sample_out, settings.sample.as_ref()) {
                let mut out = out.lock().unwrap();
                match sample_settings.format {
                    SampleFormat::Csv => sample::write_csv(&game.samples, &mut *out)?,
                    SampleFormat::Bin => sample::write_bin(&game.samples, &mut *out)?,
                }
                out.flush()?;
            }
        }
    }
}
