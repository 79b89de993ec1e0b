use std::path::{Path, PathBuf};
use std::process::exit;
use std::rc::Rc;

use clap::Parser;
use tracing::{error, info, Level};

use fasm::{link, parse_assembly, Config, Engine, Module, Outcome, State, StepBudget};

/// Assemble, link, and run a program made of one or more assembly modules.
#[derive(Parser)]
#[clap(version, about)]
struct Cli {
  /// Log every loaded module and executed instruction
  #[clap(short, long)]
  verbose: bool,

  /// Pause the run after this many steps
  #[clap(long)]
  max_steps: Option<usize>,

  /// Print the linked program before running it
  #[clap(short, long)]
  listing: bool,

  /// Assembly modules. Module names are the file stems.
  #[clap(required = true)]
  files: Vec<PathBuf>,
}

fn init_tracing(level: Level) {
  let _ = tracing_subscriber::fmt()
    .without_time()
    .with_target(false)
    .with_max_level(level)
    .try_init();
}

fn read_module(path: &Path) -> Option<Module> {
  let name =
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

  let text =
    match std::fs::read_to_string(path) {
      Ok(text) => text,
      Err(e) => {
        error!("could not read {}: {}", path.display(), e);
        return None;
      }
    };

  match parse_assembly(&name, &text) {
    Ok(module) => Some(module),
    Err(errors) => {
      for e in errors {
        error!("{}: {}", path.display(), e);
      }
      None
    }
  }
}

/// Runs until the engine halts, or pauses it once `max_steps` steps have been taken.
fn run(engine: &mut Engine, max_steps: Option<usize>) -> State {
  let mut budget =
    match max_steps {
      Some(0)     => return engine.state(),
      Some(steps) => StepBudget::new(steps - 1),
      None        => StepBudget::unlimited()
    };
  engine.run_to_completion(&mut budget, |engine| {
    info!("halted after {} steps", engine.steps());
  })
}

fn main() {
  let cli = Cli::parse();
  init_tracing(if cli.verbose { Level::TRACE } else { Level::INFO });

  let modules: Vec<Option<Module>> = cli.files.iter().map(|path| read_module(path)).collect();
  if modules.iter().any(Option::is_none) {
    exit(1);
  }
  let modules: Vec<Module> = modules.into_iter().flatten().collect();

  let linkage = link(&modules);
  for diagnostic in linkage.diagnostics.iter() {
    error!("link: {}", diagnostic);
  }
  if cli.listing {
    println!("{}", linkage.program);
  }
  if !linkage.is_runnable() {
    exit(1);
  }

  let mut engine = Engine::new(Config::default());
  engine.load(Rc::new(linkage.program));

  let state = run(&mut engine, cli.max_steps);

  for line in engine.output() {
    println!("{}", line);
  }
  for warning in engine.warnings() {
    info!("warning: {}", warning);
  }
  for fault in engine.faults() {
    error!("fault: {}", fault);
  }

  match state {
    State::Halted(Outcome::Normal) => {}
    State::Halted(Outcome::Error)  => {
      println!("{}", engine);
      exit(2);
    }
    _ => {
      info!("paused after {} steps", engine.steps());
      println!("{}", engine);
      exit(3);
    }
  }
}
