/*!
  The execution engine drives a linked `Program` over one run's `Hardware`.

  Every step fetches the instruction at `nx`, stages its successor address in `xx`, executes it,
  and then copies `xx` into `nx`. Jumps and calls are nothing more than writes to `xx`, which take
  effect when the step ends.

  Two addresses outside every page are traps rather than code:

   * `OUTERMOST_RETURN` means the call stack has fully unwound. The run halts normally if `f5` is
     back at its initial value and with a stack imbalance fault otherwise.
   * `DEBUG_OUTPUT` appends the decimal text of the word at `[f5 + 4]` to the output log and
     then returns to the address stored at `[f5]`.

  Faults never escape a step. The first one halts the engine in the error state and is recorded
  in `faults`; warnings are recorded in `warnings` and execution continues.
*/

use std::fmt::{Display, Formatter};
use std::rc::Rc;

use tracing::{debug, error, trace};

use crate::address::*;
use crate::bytecode::{Instruction, Trap};
use crate::error::{Diagnostic, Fault, Warning};
use crate::hardware::{Cpu, Hardware};
use crate::label::SourceToken;
use crate::linker::Program;
use crate::memory::Memory;
use crate::register::Register;

pub use crate::hardware::Config;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Outcome {
  Normal,
  Error,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum State {
  /// Loaded, no step taken yet.
  Ready,
  Running,
  Halted(Outcome),
}

impl State {
  pub fn is_halted(&self) -> bool {
    match self {
      State::Halted(_) => true,
      _                => false
    }
  }
}

/**
  Decides, between two instructions of `Engine::run_to_completion`, whether the run goes on. A
  host that needs to stay responsive does its own work here; returning `false` pauses the run,
  which can be resumed by calling `run_to_completion` again or simply abandoned.
*/
pub trait Scheduler {
  fn resume(&mut self, engine: &Engine) -> bool;
}

impl<F> Scheduler for F
  where F: FnMut(&Engine) -> bool
{
  fn resume(&mut self, engine: &Engine) -> bool {
    self(engine)
  }
}

/// Allows a fixed number of further steps, then pauses the run.
pub struct StepBudget {
  remaining: usize
}

impl StepBudget {
  pub fn new(steps: usize) -> StepBudget {
    StepBudget { remaining: steps }
  }

  pub fn unlimited() -> StepBudget {
    StepBudget { remaining: usize::MAX }
  }
}

impl Scheduler for StepBudget {
  fn resume(&mut self, _engine: &Engine) -> bool {
    match self.remaining {
      0 => false,
      _ => {
        self.remaining -= 1;
        true
      }
    }
  }
}

pub struct Engine {
  config   : Config,
  program  : Option<Rc<Program>>,
  hardware : Hardware,
  state    : State,
  steps    : usize,
  output   : Vec<String>,
  faults   : Vec<Diagnostic<Fault>>,
  warnings : Vec<Diagnostic<Warning>>,
}

impl Engine {

  pub fn new(config: Config) -> Engine {
    Engine {
      config,
      program  : None,
      hardware : Hardware::new(config),
      state    : State::Ready,
      steps    : 0,
      output   : Vec::new(),
      faults   : Vec::new(),
      warnings : Vec::new(),
    }
  }

  /**
    Prepares a fresh run of `program`: new hardware, static literals written to memory, `nx` at
    the entry page, and the outermost return address in the return slot at the initial `f5`.
  */
  pub fn load(&mut self, program: Rc<Program>) {
    self.hardware = Hardware::new(self.config);
    self.hardware.cpu.nx = program.entry_address();
    program.initialize_memory(&mut self.hardware.memory);
    self.hardware.memory.write(
      self.config.initial_stack.wrapping_add(RETURN_ADDRESS_OFFSET),
      OUTERMOST_RETURN as i32
    );

    self.program  = Some(program);
    self.state    = State::Ready;
    self.steps    = 0;
    self.output   = Vec::new();
    self.faults   = Vec::new();
    self.warnings = Vec::new();
    self.collect_warnings(None);
  }

  // region Accessors

  pub fn state(&self) -> State {
    self.state
  }

  pub fn cpu(&self) -> &Cpu {
    &self.hardware.cpu
  }

  pub fn register(&self, register: Register) -> i32 {
    self.hardware.cpu.get(register)
  }

  pub fn memory(&self) -> &Memory {
    &self.hardware.memory
  }

  pub fn output(&self) -> &[String] {
    &self.output
  }

  pub fn faults(&self) -> &[Diagnostic<Fault>] {
    &self.faults
  }

  pub fn warnings(&self) -> &[Diagnostic<Warning>] {
    &self.warnings
  }

  /// Number of steps taken since `load`.
  pub fn steps(&self) -> usize {
    self.steps
  }

  pub fn program(&self) -> Option<&Rc<Program>> {
    self.program.as_ref()
  }

  // endregion

  // region Stepping

  /// Executes exactly one instruction, unless the engine has already halted.
  pub fn step(&mut self) -> State {
    if self.state.is_halted() {
      return self.state;
    }

    let program =
      match &self.program {
        Some(program) => Rc::clone(program),
        None => {
          self.fault(Fault::NotLoaded, None);
          return self.state;
        }
      };

    self.state  = State::Running;
    self.steps += 1;

    let nx = self.hardware.cpu.nx;
    let loaded =
      match program.read_instruction(nx) {
        Some(loaded) => loaded,
        None => {
          self.fault(Fault::InvalidAddress { address: nx }, None);
          return self.state;
        }
      };
    let token = loaded.token;

    match &loaded.instruction {

      Instruction::Trap(trap) if is_trap(nx) => {
        self.enter_trap(*trap, token);
      }

      instruction => {
        trace!("{:#010x}: {}", nx, instruction);
        self.hardware.cpu.set(Register::Xx, loaded.successor as i32);

        let result = instruction.execute(&mut self.hardware, &program);
        self.collect_warnings(token);
        if let Err(fault) = result {
          self.fault(fault, token);
          return self.state;
        }

        self.hardware.cpu.nx = self.hardware.cpu.get(Register::Xx) as u32;
        match self.hardware.cpu.nx {
          DEBUG_OUTPUT     => self.enter_trap(Trap::DebugOutput, token),
          OUTERMOST_RETURN => self.enter_trap(Trap::OutermostReturn, token),
          _                => {}
        }
      }

    }

    #[cfg(feature = "trace_computation")] println!("{}", self);

    self.state
  }

  /**
    Steps until the next instruction carries a source token, so that one call advances one source
    line. Always takes at least one step, and stops early if the engine halts.
  */
  pub fn step_line(&mut self) -> State {
    loop {
      let state = self.step();
      if state.is_halted() {
        return state;
      }

      let at_line =
        self.program
            .as_ref()
            .and_then(|p| p.read_instruction(self.hardware.cpu.nx))
            .map_or(false, |loaded| loaded.token.is_some());
      if at_line {
        return state;
      }
    }
  }

  /**
    Steps until the engine halts, consulting `scheduler` between every two instructions. On
    halting, `on_halt` is called with the finished engine. If the scheduler pauses the run,
    `on_halt` is not called and the current (running) state is returned.
  */
  pub fn run_to_completion<S, F>(&mut self, scheduler: &mut S, on_halt: F) -> State
    where S: Scheduler,
          F: FnOnce(&Engine)
  {
    loop {
      if self.step().is_halted() {
        on_halt(self);
        return self.state;
      }
      if !scheduler.resume(self) {
        return self.state;
      }
    }
  }

  // endregion

  // region Traps and faults

  fn enter_trap(&mut self, trap: Trap, token: Option<SourceToken>) {
    match trap {
      Trap::DebugOutput => {
        self.debug_output();
        if self.hardware.cpu.nx == OUTERMOST_RETURN {
          self.outermost_return(token);
        }
      }
      Trap::OutermostReturn => self.outermost_return(token),
    }
  }

  /// Prints the argument word and returns through the return address slot. The slot is trusted.
  fn debug_output(&mut self) {
    let f5       = self.hardware.cpu.get(Register::F5) as u32;
    let argument = self.hardware.memory.read(f5.wrapping_add(DEBUG_ARGUMENT_OFFSET));
    let back     = self.hardware.memory.read(f5.wrapping_add(RETURN_ADDRESS_OFFSET));

    debug!("debug output: {}", argument);
    self.output.push(argument.to_string());
    self.hardware.cpu.nx = back as u32;
    self.collect_warnings(None);
  }

  fn outermost_return(&mut self, token: Option<SourceToken>) {
    let f5 = self.hardware.cpu.get(Register::F5) as u32;
    if f5 == self.config.initial_stack {
      debug!("halted normally after {} steps", self.steps);
      self.state = State::Halted(Outcome::Normal);
    } else {
      self.fault(
        Fault::StackImbalance { expected: self.config.initial_stack, actual: f5 },
        token
      );
    }
  }

  fn fault(&mut self, fault: Fault, token: Option<SourceToken>) {
    error!("fault after {} steps: {}", self.steps, fault);
    self.faults.push(Diagnostic::new(fault, token));
    self.state = State::Halted(Outcome::Error);
  }

  fn collect_warnings(&mut self, token: Option<SourceToken>) {
    for warning in self.hardware.memory.take_warnings() {
      self.warnings.push(Diagnostic::new(warning, token));
    }
  }

  // endregion
}

impl Default for Engine {
  fn default() -> Engine {
    Engine::new(Config::default())
  }
}

impl Display for Engine {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let cpu    = self.hardware.cpu.to_string();
    let memory = self.hardware.memory.to_string();
    let mut combined_table = table!([cpu, memory]);

    combined_table.set_titles(row![ub->"CPU", ub->"Memory"]);
    combined_table.set_format(*crate::TABLE_DISPLAY_FORMAT);

    let current =
      self.program
          .as_ref()
          .and_then(|p| p.read_instruction(self.hardware.cpu.nx))
          .map(|loaded| loaded.instruction.to_string())
          .unwrap_or_else(|| "-".to_string());

    write!(
      f,
      "State: {:?}\tSteps: {}\tNext: {}\n{}",
      self.state, self.steps, current, combined_table
    )?;
    if !self.output.is_empty() {
      write!(f, "\nOutput: {}", self.output.join(" "))?;
    }
    Ok(())
  }
}
