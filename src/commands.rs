// Copyright (c) 2026 MCU-Debug Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Step plans run by the command line front-end, e.g.
//! `reset load ioloop start gdb wait` or `repeat=3,100 reset delay=50 end`.

use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::bridge::DebugBridge;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    Reset,
    Load,
    Start,
    Stop,
    Ioloop,
    Reqloop,
    Gdb(u16),
    Flash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Execute(BridgeCommand),
    Delay(Duration),
    Repeat {
        count: u32,
        delay: Duration,
        steps: Vec<Step>,
    },
    WaitExit,
}

/// What a plan runs against. A non-zero status ends the plan.
pub trait StepRunner {
    fn execute(&mut self, command: BridgeCommand) -> Result<i32>;
    fn wait_exit(&mut self) -> Result<i32>;
}

impl StepRunner for DebugBridge {
    fn execute(&mut self, command: BridgeCommand) -> Result<i32> {
        match command {
            BridgeCommand::Reset => self.reset(),
            // An injected entry point (status 1) is still a successful load.
            BridgeCommand::Load => self.load().map(|_| 0),
            BridgeCommand::Start => self.start(),
            BridgeCommand::Stop => self.stop(),
            BridgeCommand::Ioloop => self.ioloop().map(|_| 0),
            BridgeCommand::Reqloop => self.reqloop().map(|_| 0),
            BridgeCommand::Gdb(port) => self.gdb(port).map(|_| 0),
            BridgeCommand::Flash => self.flash(),
        }
    }

    fn wait_exit(&mut self) -> Result<i32> {
        self.wait()
    }
}

#[derive(Debug, Default)]
pub struct CommandPlan {
    steps: Vec<Step>,
    // Repeats still being filled, innermost last.
    open: Vec<(u32, Duration, Vec<Step>)>,
}

impl CommandPlan {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&mut self) -> &mut Vec<Step> {
        match self.open.last_mut() {
            Some((_, _, steps)) => steps,
            None => &mut self.steps,
        }
    }

    pub fn add_execute(&mut self, command: BridgeCommand) {
        self.current().push(Step::Execute(command));
    }

    pub fn add_delay(&mut self, delay: Duration) {
        self.current().push(Step::Delay(delay));
    }

    /// Steps added until the matching [`add_repeat_end`](Self::add_repeat_end)
    /// run `count` times, each pass preceded by `delay`.
    pub fn add_repeat_start(&mut self, delay: Duration, count: u32) {
        self.open.push((count, delay, Vec::new()));
    }

    pub fn add_repeat_end(&mut self) -> Result<()> {
        let (count, delay, steps) = self.open.pop().ok_or(BridgeError::UnmatchedLoop)?;
        self.current().push(Step::Repeat {
            count,
            delay,
            steps,
        });
        Ok(())
    }

    pub fn add_wait_exit(&mut self) {
        self.current().push(Step::WaitExit);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Runs every step in order. Returns the status of the last step executed.
    pub fn run<R: StepRunner + ?Sized>(&self, runner: &mut R) -> Result<i32> {
        if !self.open.is_empty() {
            return Err(BridgeError::UnmatchedLoop);
        }
        Ok(run_steps(&self.steps, runner)?.unwrap_or(0))
    }

    /// Builds a plan from command line tokens.
    pub fn parse<S: AsRef<str>>(tokens: &[S], gdb_port: u16) -> Result<Self> {
        let mut plan = Self::new();
        for token in tokens {
            let token = token.as_ref();
            let (name, arg) = match token.split_once('=') {
                Some((name, arg)) => (name, Some(arg)),
                None => (token, None),
            };
            match (name, arg) {
                ("reset", None) => plan.add_execute(BridgeCommand::Reset),
                ("load", None) => plan.add_execute(BridgeCommand::Load),
                ("start", None) => plan.add_execute(BridgeCommand::Start),
                ("stop", None) => plan.add_execute(BridgeCommand::Stop),
                ("ioloop", None) => plan.add_execute(BridgeCommand::Ioloop),
                ("reqloop", None) => plan.add_execute(BridgeCommand::Reqloop),
                ("gdb", None) => plan.add_execute(BridgeCommand::Gdb(gdb_port)),
                ("flash", None) => plan.add_execute(BridgeCommand::Flash),
                ("wait", None) => plan.add_wait_exit(),
                ("end", None) => plan.add_repeat_end()?,
                ("delay", Some(ms)) => {
                    plan.add_delay(Duration::from_millis(parse_number(token, ms)?))
                }
                ("repeat", Some(arg)) => {
                    let (count, ms) = match arg.split_once(',') {
                        Some((count, ms)) => (count, Some(ms)),
                        None => (arg, None),
                    };
                    let count = u32::try_from(parse_number(token, count)?).map_err(|_| {
                        BridgeError::Config(format!("repeat count too large: {}", token))
                    })?;
                    let delay = match ms {
                        Some(ms) => Duration::from_millis(parse_number(token, ms)?),
                        None => Duration::ZERO,
                    };
                    plan.add_repeat_start(delay, count);
                }
                _ => return Err(BridgeError::Config(format!("unknown step '{}'", token))),
            }
        }
        if !plan.open.is_empty() {
            return Err(BridgeError::UnmatchedLoop);
        }
        Ok(plan)
    }
}

fn parse_number(token: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| BridgeError::Config(format!("invalid number in step '{}'", token)))
}

/// `None` when no command ran, `Some(status)` otherwise. Stops at the first non-zero status.
fn run_steps<R: StepRunner + ?Sized>(steps: &[Step], runner: &mut R) -> Result<Option<i32>> {
    let mut last = None;
    for step in steps {
        let status = match step {
            Step::Execute(command) => {
                debug!("Executing {:?}", command);
                Some(runner.execute(*command)?)
            }
            Step::Delay(delay) => {
                thread::sleep(*delay);
                None
            }
            Step::Repeat {
                count,
                delay,
                steps,
            } => {
                let mut status = None;
                for pass in 0..*count {
                    thread::sleep(*delay);
                    debug!("Repeat pass {}/{}", pass + 1, count);
                    status = run_steps(steps, runner)?.or(status);
                    if status.is_some_and(|s| s != 0) {
                        break;
                    }
                }
                status
            }
            Step::WaitExit => {
                let status = runner.wait_exit()?;
                info!("Wait finished with status {}", status);
                Some(status)
            }
        };
        if let Some(status) = status {
            last = Some(status);
            if status != 0 {
                info!("Stopping after {:?} returned {}", step, status);
                break;
            }
        }
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail_on: Option<BridgeCommand>,
        status_on: Option<(BridgeCommand, i32)>,
        exit_status: i32,
    }

    impl StepRunner for Recorder {
        fn execute(&mut self, command: BridgeCommand) -> Result<i32> {
            self.calls.push(format!("{:?}", command));
            if self.fail_on == Some(command) {
                return Err(BridgeError::NotLoaded);
            }
            match self.status_on {
                Some((c, status)) if c == command => Ok(status),
                _ => Ok(0),
            }
        }

        fn wait_exit(&mut self) -> Result<i32> {
            self.calls.push("wait".to_string());
            Ok(self.exit_status)
        }
    }

    #[test]
    fn parses_a_typical_session() {
        let tokens = ["reset", "load", "ioloop", "start", "gdb", "wait"];
        let plan = CommandPlan::parse(&tokens, 2331).unwrap();
        assert_eq!(
            plan.steps(),
            [
                Step::Execute(BridgeCommand::Reset),
                Step::Execute(BridgeCommand::Load),
                Step::Execute(BridgeCommand::Ioloop),
                Step::Execute(BridgeCommand::Start),
                Step::Execute(BridgeCommand::Gdb(2331)),
                Step::WaitExit,
            ]
        );
    }

    #[test]
    fn parses_nested_repeats() {
        let plan = CommandPlan::parse(
            &["repeat=2,10", "reset", "repeat=3", "delay=5", "end", "end", "start"],
            0,
        )
        .unwrap();
        assert_eq!(
            plan.steps(),
            [
                Step::Repeat {
                    count: 2,
                    delay: Duration::from_millis(10),
                    steps: vec![
                        Step::Execute(BridgeCommand::Reset),
                        Step::Repeat {
                            count: 3,
                            delay: Duration::ZERO,
                            steps: vec![Step::Delay(Duration::from_millis(5))],
                        },
                    ],
                },
                Step::Execute(BridgeCommand::Start),
            ]
        );
    }

    #[test]
    fn unmatched_loops_are_rejected() {
        assert!(matches!(
            CommandPlan::parse(&["end"], 0),
            Err(BridgeError::UnmatchedLoop)
        ));
        assert!(matches!(
            CommandPlan::parse(&["repeat=2", "reset"], 0),
            Err(BridgeError::UnmatchedLoop)
        ));

        let mut plan = CommandPlan::new();
        plan.add_repeat_start(Duration::ZERO, 1);
        assert!(matches!(
            plan.run(&mut Recorder::default()),
            Err(BridgeError::UnmatchedLoop)
        ));
    }

    #[test]
    fn bad_tokens_are_config_errors() {
        for tokens in [&["bogus"][..], &["delay=abc"], &["repeat=x,1"], &["reset=1"]] {
            assert!(matches!(
                CommandPlan::parse(tokens, 0),
                Err(BridgeError::Config(_))
            ));
        }
    }

    #[test]
    fn repeat_runs_body_count_times() {
        let plan = CommandPlan::parse(&["repeat=3", "reset", "stop", "end"], 0).unwrap();
        let mut recorder = Recorder::default();
        assert_eq!(plan.run(&mut recorder).unwrap(), 0);
        assert_eq!(recorder.calls, ["Reset", "Stop", "Reset", "Stop", "Reset", "Stop"]);
    }

    #[test]
    fn non_zero_status_ends_the_plan() {
        let plan = CommandPlan::parse(&["repeat=3", "reset", "load", "end", "start"], 0).unwrap();
        let mut recorder = Recorder {
            status_on: Some((BridgeCommand::Load, 1)),
            ..Default::default()
        };
        assert_eq!(plan.run(&mut recorder).unwrap(), 1);
        assert_eq!(recorder.calls, ["Reset", "Load"]);
    }

    #[test]
    fn error_aborts_the_plan() {
        let plan = CommandPlan::parse(&["load", "start", "stop"], 0).unwrap();
        let mut recorder = Recorder {
            fail_on: Some(BridgeCommand::Start),
            ..Default::default()
        };
        assert!(matches!(plan.run(&mut recorder), Err(BridgeError::NotLoaded)));
        assert_eq!(recorder.calls, ["Load", "Start"]);
    }

    #[test]
    fn wait_returns_exit_status() {
        let plan = CommandPlan::parse(&["start", "wait"], 0).unwrap();
        let mut recorder = Recorder {
            exit_status: 3,
            ..Default::default()
        };
        assert_eq!(plan.run(&mut recorder).unwrap(), 3);
    }

    #[test]
    fn empty_plan_returns_zero() {
        assert_eq!(CommandPlan::new().run(&mut Recorder::default()).unwrap(), 0);
    }
}
