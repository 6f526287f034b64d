//! A deterministic, recording command runner for tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use seedbed_core::{Error, Result};

use crate::runner::{CommandOutput, CommandRunner, RunOptions};

/// A recorded call to [`MockRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name.
    pub program: String,
    /// Arguments as passed.
    pub args: Vec<String>,
    /// Options as passed.
    pub opts: RunOptions,
}

impl Invocation {
    /// Returns true if this call was `program` with arguments starting with `prefix`.
    #[must_use]
    pub fn matches<S: AsRef<str>>(&self, program: &str, prefix: &[S]) -> bool {
        self.program == program
            && self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a == p.as_ref())
    }
}

enum Reply {
    Output(CommandOutput),
    TimedOut,
}

struct Rule {
    program: String,
    prefix: Vec<String>,
    replies: VecDeque<Reply>,
}

/// A command runner that answers from scripted rules and records every call.
///
/// Unmatched commands succeed with empty output. When several rules match,
/// the most recently added one wins. A rule with several replies hands them
/// out in order and keeps repeating the last one.
#[derive(Default)]
pub struct MockRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl MockRunner {
    /// Create a mock runner with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `program prefix...` with `output`.
    pub fn on(&self, program: &str, prefix: &[&str], output: CommandOutput) -> &Self {
        self.push_rule(program, prefix, vec![Reply::Output(output)]);
        self
    }

    /// Answer `program prefix...` with successive outputs.
    pub fn on_sequence(&self, program: &str, prefix: &[&str], outputs: Vec<CommandOutput>) -> &Self {
        self.push_rule(
            program,
            prefix,
            outputs.into_iter().map(Reply::Output).collect(),
        );
        self
    }

    /// Make `program prefix...` exit with `exit_code` and `stderr`.
    pub fn fail(&self, program: &str, prefix: &[&str], exit_code: i32, stderr: &str) -> &Self {
        self.on(program, prefix, CommandOutput::failed(exit_code, stderr))
    }

    /// Make `program prefix...` time out.
    pub fn time_out(&self, program: &str, prefix: &[&str]) -> &Self {
        self.push_rule(program, prefix, vec![Reply::TimedOut]);
        self
    }

    /// All recorded calls, oldest first.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls matching `program prefix...`.
    #[must_use]
    pub fn count(&self, program: &str, prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.matches(program, prefix))
            .count()
    }

    /// The most recent call matching `program prefix...`.
    #[must_use]
    pub fn last(&self, program: &str, prefix: &[&str]) -> Option<Invocation> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|c| c.matches(program, prefix))
            .cloned()
    }

    fn push_rule(&self, program: &str, prefix: &[&str], replies: Vec<Reply>) {
        self.rules.lock().push(Rule {
            program: program.to_string(),
            prefix: prefix.iter().map(|s| (*s).to_string()).collect(),
            replies: replies.into(),
        });
    }

    fn reply_for(&self, invocation: &Invocation) -> Option<Reply> {
        let mut rules = self.rules.lock();
        let rule = rules
            .iter_mut()
            .rev()
            .find(|r| invocation.matches(&r.program, &r.prefix))?;

        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().map(|r| match r {
                Reply::Output(o) => Reply::Output(o.clone()),
                Reply::TimedOut => Reply::TimedOut,
            })
        }
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        opts: &RunOptions,
    ) -> Result<CommandOutput> {
        let invocation = Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            opts: opts.clone(),
        };
        let reply = self.reply_for(&invocation);
        self.calls.lock().push(invocation);

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::TimedOut) => Err(Error::CommandTimedOut {
                command: crate::render_command(program, args),
                after: opts.timeout,
            }),
            None => Ok(CommandOutput::default()),
        }
    }
}
