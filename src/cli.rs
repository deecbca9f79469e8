use std::iter::Peekable;
use std::path::PathBuf;
use std::process::exit;
use std::str::FromStr;

use anyhow::{anyhow, bail};

use crate::play::adjudication::AdjudicationRule;
use crate::play::engine::TimeMargin;
use crate::play::sample::{SampleFormat, SampleParams};
use crate::play::uci::SearchLimits;
use crate::Res;

/// Since clap doesn't handle long arguments with a single `-`, but cutechess
/// (and c-chess-cli) use that format, the parser is written by hand.
#[derive(Debug)]
pub struct Settings {
    /// The two players. Engine-specific sub-arguments follow each `-engine`
    /// in `key=value` form; `-each` applies to both.
    pub engines: [EngineSettings; 2],

    /// Where the starting positions come from. Without a book every game
    /// starts from the standard position.
    pub openings: Option<OpeningsSettings>,

    /// Number of openings to play.
    pub rounds: usize,

    /// Games per opening; with 2 (or `-repeat`) the engines swap colors on
    /// the same opening.
    pub games: usize,

    /// How many games to run in parallel.
    pub concurrency: usize,

    /// Adjudicate a game as a draw once both engines' scores have hovered
    /// around zero for long enough.
    pub draw: Option<AdjudicationRule>,

    /// Adjudicate a game as lost once an engine's own score has been
    /// hopeless for long enough.
    pub resign: Option<AdjudicationRule>,

    /// Write finished games to this PGN file.
    pub pgn: Option<PgnSettings>,

    /// Collect training samples into this file.
    pub sample: Option<SampleSettings>,

    /// The name of the event as displayed in the PGN.
    pub event: String,

    /// The name of the site as displayed in the PGN.
    pub site: String,

    /// Seed for the opening shuffle and the per-worker sampling PRNGs.
    pub srand: u64,

    /// How far an engine may overshoot its clock before the move is forfeit.
    pub time_margin: TimeMargin,

    /// Mirror all engine I/O into one log file per worker.
    pub log: bool,
}

#[derive(Debug, Default, Clone)]
pub struct EngineSettings {
    /// The executable to run, e.g. "stockfish".
    pub cmd: String,

    /// Display name; defaults to the engine's `id name` reply.
    pub name: Option<String>,

    /// Command line arguments passed to the engine process.
    pub args: Vec<String>,

    /// UCI options set right after the handshake, from `option.<Name>=<v>`.
    pub options: Vec<(String, String)>,

    /// Search limits for this engine's moves.
    pub limits: SearchLimits,
}

#[derive(Debug, Clone)]
pub struct OpeningsSettings {
    pub file: PathBuf,
    pub random: bool,
}

#[derive(Debug, Clone)]
pub struct PgnSettings {
    pub file: PathBuf,
    pub verbosity: u32,
}

#[derive(Debug, Clone)]
pub struct SampleSettings {
    pub params: SampleParams,
    pub format: SampleFormat,
    pub file: PathBuf,
}

fn parse_key_equals_value(arg: &str) -> Res<(&str, &str)> {
    let mut parts = arg.splitn(2, '=');
    let key = parts.next().unwrap_or_default();
    let value =
        parts.next().ok_or_else(|| anyhow!("Expected 'key=value', got '{arg}'"))?;
    Ok((key, value))
}

fn parse_int<T: FromStr>(value: &str, name: &str) -> Res<T> {
    value.parse().map_err(|_| anyhow!("Couldn't parse {name} ('{value}')"))
}

fn parse_float(value: &str, name: &str) -> Res<f64> {
    value.parse().map_err(|_| anyhow!("Couldn't parse {name} ('{value}')"))
}

fn next_arg<Iter: Iterator<Item = String>>(args: &mut Iter, name: &str) -> Res<String> {
    args.next().ok_or_else(|| anyhow!("Missing value after '-{name}'"))
}

fn parse_seconds(value: &str, name: &str) -> Res<i64> {
    let secs: f64 = value.trim().parse().map_err(|_| anyhow!("Couldn't parse {name} ('{value}')"))?;
    Ok((secs.max(0.0) * 1000.0).round() as i64)
}

/// Parses a cutechess-style time control: `[moves/]time[+increment]`, both
/// times in (possibly fractional) seconds.
fn parse_tc(value: &str, limits: &mut SearchLimits) -> Res<()> {
    let (moves, rest) = match value.split_once('/') {
        Some((moves, rest)) => (Some(parse_int(moves, "movestogo")?), rest),
        None => (None, value),
    };
    if moves == Some(0) {
        bail!("movestogo must not be zero (in tc '{value}')");
    }
    let (time, increment) = match rest.split_once('+') {
        Some((time, increment)) => (time, Some(increment)),
        None => (rest, None),
    };
    limits.movestogo = moves;
    limits.time = Some(parse_seconds(time, "the start time")?);
    if let Some(increment) = increment {
        limits.increment = Some(parse_seconds(increment, "the increment")?);
    }
    Ok(())
}

// Generic over the iterator so tests can feed it plain string slices.
pub fn parse_engine<Iter: Iterator<Item = String>>(
    args: &mut Peekable<Iter>,
) -> Res<EngineSettings> {
    let mut res = EngineSettings::default();
    while let Some(arg) = args.peek() {
        if arg.starts_with('-') {
            break;
        }
        let arg = args.next().unwrap();
        let (key, value) = parse_key_equals_value(&arg)?;
        match key {
            "cmd" => res.cmd = value.to_string(),
            "name" => res.name = Some(value.to_string()),
            "arg" => res.args.push(value.to_string()),
            "tc" => parse_tc(value, &mut res.limits)?,
            "st" => res.limits.movetime = Some(parse_seconds(value, "st (move time)")?),
            "depth" => res.limits.depth = Some(parse_int(value, "depth")?),
            "nodes" => res.limits.nodes = Some(parse_int(value, "nodes")?),
            x => match x.strip_prefix("option.") {
                Some(option) => res.options.push((option.to_string(), value.to_string())),
                None => bail!("Unknown engine option '{x}'"),
            },
        }
    }
    Ok(res)
}

fn parse_adjudication<Iter: Iterator<Item = String>>(
    args: &mut Peekable<Iter>,
    what: &str,
) -> Res<AdjudicationRule> {
    let mut rule = AdjudicationRule { count: 0, score: 0, number: 1 };
    while let Some(arg) = args.peek() {
        if arg.starts_with('-') {
            break;
        }
        let arg = args.next().unwrap();
        let (key, value) = parse_key_equals_value(&arg)?;
        match key {
            "count" => rule.count = parse_int(value, "count")?,
            "score" => rule.score = parse_int(value, "score")?,
            "number" => rule.number = parse_int(value, "number")?,
            x => bail!("Invalid {what} adjudication setting with unknown key '{x}'"),
        }
    }
    if rule.count == 0 {
        bail!("The {what} adjudication needs a nonzero 'count=' setting");
    }
    Ok(rule)
}

fn parse_openings<Iter: Iterator<Item = String>>(
    args: &mut Peekable<Iter>,
) -> Res<OpeningsSettings> {
    let mut file = None;
    let mut random = false;
    while let Some(arg) = args.peek() {
        if arg.starts_with('-') {
            break;
        }
        let arg = args.next().unwrap();
        let (key, value) = parse_key_equals_value(&arg)?;
        match key {
            "file" => file = Some(PathBuf::from(value)),
            "order" => match value {
                "random" => random = true,
                "sequential" => random = false,
                x => bail!("Unrecognized openings order '{x}' (use 'random' or 'sequential')"),
            },
            x => bail!("Unknown openings setting '{x}'"),
        }
    }
    Ok(OpeningsSettings { file: file.ok_or_else(|| anyhow!("Missing 'file=' after '-openings'"))?, random })
}

fn parse_bool(value: &str, name: &str) -> Res<bool> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        bail!("Incorrect value for '{name}': expected 'true' or 'false', not '{value}'")
    }
}

fn parse_sample<Iter: Iterator<Item = String>>(args: &mut Peekable<Iter>) -> Res<SampleSettings> {
    let mut params = SampleParams { freq: 1.0, decay: 0.0, resolve: false };
    let mut format = SampleFormat::default();
    let mut file = None;
    while let Some(arg) = args.peek() {
        if arg.starts_with('-') {
            break;
        }
        let arg = args.next().unwrap();
        let (key, value) = parse_key_equals_value(&arg)?;
        match key {
            "freq" => params.freq = parse_float(value, "freq")?,
            "decay" => params.decay = parse_float(value, "decay")?,
            "resolve" => params.resolve = parse_bool(value, "resolve")?,
            "format" => {
                format = SampleFormat::from_str(value)
                    .map_err(|_| anyhow!("Unrecognized sample format '{value}' (use 'csv' or 'bin')"))?;
            }
            "file" => file = Some(PathBuf::from(value)),
            x => bail!("Unknown sample setting '{x}'"),
        }
    }
    if !(0.0..=1.0).contains(&params.freq) {
        bail!("The sampling frequency must be between 0 and 1, not {}", params.freq);
    }
    if params.decay < 0.0 {
        bail!("The sampling decay must not be negative");
    }
    Ok(SampleSettings {
        params,
        format,
        file: file.ok_or_else(|| anyhow!("Missing 'file=' after '-sample'"))?,
    })
}

fn combine_engine_settings(engine: &mut EngineSettings, each: &EngineSettings) {
    // logically this is |= on every `Option`
    engine.name = engine.name.clone().or_else(|| each.name.clone());
    if engine.cmd.is_empty() {
        engine.cmd = each.cmd.clone();
    }
    if engine.args.is_empty() {
        engine.args = each.args.clone();
    }
    for (option, value) in &each.options {
        if !engine.options.iter().any(|(name, _)| name == option) {
            engine.options.push((option.clone(), value.clone()));
        }
    }
    let limits = &mut engine.limits;
    limits.time = limits.time.or(each.limits.time);
    limits.increment = limits.increment.or(each.limits.increment);
    limits.movetime = limits.movetime.or(each.limits.movetime);
    limits.nodes = limits.nodes.or(each.limits.nodes);
    limits.depth = limits.depth.or(each.limits.depth);
    limits.movestogo = limits.movestogo.or(each.limits.movestogo);
}

fn print_help_message() {
    println!(
        "usage: arbiters -engine cmd=CMD [key=value...] -engine cmd=CMD [key=value...] [options]

engine keys (also valid after -each, which applies to both engines):
  cmd=CMD            executable to run
  name=NAME          display name (default: the engine's 'id name')
  arg=ARG            argument passed to the engine process (repeatable)
  option.NAME=VALUE  UCI option set after the handshake (repeatable)
  tc=[M/]T[+I]       time control: T seconds, I seconds increment,
                     M full moves per repeating time period
  st=T               fixed seconds per move
  depth=D            depth limit per move
  nodes=N            node limit per move

options:
  -openings file=FILE [order=random|sequential]
  -rounds N          number of openings to play (default 1)
  -games N           games per opening (default 1)
  -repeat            shorthand for '-games 2': replay each opening
                     with the colors swapped
  -concurrency N     games to run in parallel (default 1)
  -draw count=C score=S [number=N]
                     draw when both engines scored within S centipawns
                     of zero for C consecutive full moves, from move N
  -resign count=C score=S [number=N]
                     resign when an engine's score stayed below -S for
                     C of its moves in a row, from move N
  -pgn FILE [VERBOSITY]
                     write games to FILE; 0 headers only, 1 movetext,
                     2 adds score/depth comments, 3 adds move times
  -sample freq=F [decay=D] [resolve=BOOL] file=FILE [format=csv|bin]
  -event NAME, -site NAME
                     PGN tags (default \"?\")
  -srand N           seed for the opening shuffle and sampling
  -timemargin MS     clock overshoot an engine is forgiven (default 100)
  -log               mirror engine I/O into arbiters-<worker>.log
  -version, -help"
    );
    exit(0);
}

fn print_version() {
    println!("arbiters {}", option_env!("CARGO_PKG_VERSION").unwrap_or("<unknown version>"));
    exit(0);
}

pub fn parse_cli(args: impl Iterator<Item = String>) -> Res<Settings> {
    let mut args = args.peekable();
    let mut engines = vec![];
    let mut each = EngineSettings::default();
    let mut openings = None;
    let mut rounds = 1usize;
    let mut games = 1usize;
    let mut concurrency = 1usize;
    let mut draw = None;
    let mut resign = None;
    let mut pgn: Option<PgnSettings> = None;
    let mut sample = None;
    let mut event = "?".to_string();
    let mut site = "?".to_string();
    let mut srand = 0u64;
    let mut time_margin = TimeMargin::default();
    let mut log = false;

    while let Some(mut arg) = args.next() {
        // cutechess expects top-level arguments with a single '-', but the
        // much more common '--long' syntax is also accepted
        if arg.starts_with("--") {
            arg.remove(0);
        }
        match arg.as_str() {
            "-h" | "-help" => print_help_message(),
            "-v" | "-version" => print_version(),
            "-engine" => engines.push(parse_engine(&mut args)?),
            "-each" => each = parse_engine(&mut args)?,
            "-openings" => openings = Some(parse_openings(&mut args)?),
            "-rounds" => rounds = parse_int(&next_arg(&mut args, "rounds")?, "rounds")?,
            "-games" => games = parse_int(&next_arg(&mut args, "games")?, "games")?,
            "-repeat" => games = 2,
            "-concurrency" => {
                concurrency = parse_int(&next_arg(&mut args, "concurrency")?, "concurrency")?;
            }
            "-draw" => draw = Some(parse_adjudication(&mut args, "draw")?),
            "-resign" => resign = Some(parse_adjudication(&mut args, "resign")?),
            "-pgn" => {
                let file = PathBuf::from(next_arg(&mut args, "pgn")?);
                let verbosity = match args.peek() {
                    Some(next) => match next.parse::<u32>() {
                        Ok(verbosity) => {
                            args.next();
                            verbosity
                        }
                        Err(_) => 1,
                    },
                    None => 1,
                };
                pgn = Some(PgnSettings { file, verbosity });
            }
            "-sample" => sample = Some(parse_sample(&mut args)?),
            "-event" => event = next_arg(&mut args, "event")?,
            "-site" => site = next_arg(&mut args, "site")?,
            "-srand" => srand = parse_int(&next_arg(&mut args, "srand")?, "srand")?,
            "-timemargin" => {
                let millis: u64 = parse_int(&next_arg(&mut args, "timemargin")?, "timemargin")?;
                time_margin = TimeMargin(std::time::Duration::from_millis(millis));
            }
            "-log" => log = true,
            x => bail!("Unrecognized option '{x}'. Type -help for a list of all valid options"),
        }
    }

    for engine in &mut engines {
        combine_engine_settings(engine, &each);
        if engine.cmd.is_empty() {
            bail!("Every '-engine' needs a command ('cmd=...', possibly via '-each')");
        }
        if engine.limits.is_unlimited() {
            // an engine without any limit would think forever
            parse_tc("2+0.4", &mut engine.limits)?;
        }
    }
    let engines: [EngineSettings; 2] = engines
        .try_into()
        .map_err(|engines: Vec<EngineSettings>| {
            anyhow!("Expected exactly two '-engine' blocks, got {}", engines.len())
        })?;
    if rounds == 0 || games == 0 || concurrency == 0 {
        bail!("'-rounds', '-games' and '-concurrency' must not be zero");
    }

    Ok(Settings {
        engines,
        openings,
        rounds,
        games,
        concurrency,
        draw,
        resign,
        pgn,
        sample,
        event,
        site,
        srand,
        time_margin,
        log,
    })
}
