//! Reports the progress and outcome of each [Action] in a run.
//!
//! As with most output code here, the real [Reporter] only locks stdout and stderr and then hands
//! them to a private function that does the actual writing. The private functions take generic
//! writers so tests can capture their output. Locking for the duration of one message keeps
//! messages about different nodes from interleaving.
//!
//! [Action]: crate::core::Action

use crate::core::ActionId;
use std::fmt::{self, Display};
use std::io::{self, Write};
use std::ops::DerefMut;
use std::time::Duration;

/// How an action's run ended. Every action in a run ends up with exactly one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,

    /// The action ran and returned an error, or panicked. Holds the full cause chain.
    Failed(String),

    /// The action never ran because `failed`, one of its direct or indirect dependencies, did
    /// not succeed.
    Skipped { failed: ActionId },

    /// The run was cancelled before the action could finish.
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::Failed(cause) => write!(f, "failed: {cause}"),
            Outcome::Skipped { failed } => write!(f, "skipped because {failed} did not succeed"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The result of a whole run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// Every action's outcome, in the order the actions were scheduled.
    pub outcomes: Vec<(ActionId, Outcome)>,

    pub elapsed: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_success())
    }

    /// The process exit code for this run: 0 if every action succeeded, otherwise 1.
    pub fn exit_code(&self) -> i32 {
        match self.succeeded() {
            true => 0,
            false => 1,
        }
    }

    pub fn outcome(&self, id: &ActionId) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(candidate, _)| candidate == id)
            .map(|(_, outcome)| outcome)
    }

    /// Counts of (succeeded, failed, skipped, cancelled) actions.
    pub fn tally(&self) -> (usize, usize, usize, usize) {
        let mut tally = (0, 0, 0, 0);
        for (_, outcome) in &self.outcomes {
            match outcome {
                Outcome::Succeeded => tally.0 += 1,
                Outcome::Failed(_) => tally.1 += 1,
                Outcome::Skipped { .. } => tally.2 += 1,
                Outcome::Cancelled => tally.3 += 1,
            }
        }
        tally
    }
}

/// Keeps the operator informed while a run progresses.
///
/// The engine calls these methods from a single thread.
pub trait Report {
    /// Reports that an action is about to run.
    fn starting(&mut self, id: &ActionId) -> io::Result<()>;

    /// Reports that an action has reached its final state.
    fn report(&mut self, id: &ActionId, outcome: &Outcome) -> io::Result<()>;
}

/// The real [Report] implementation. Uses the real stdout/stderr.
#[derive(Clone, Debug, Default)]
pub struct Reporter;

impl Report for Reporter {
    fn starting(&mut self, id: &ActionId) -> io::Result<()> {
        _starting(&mut io::stdout().lock(), id)
    }

    fn report(&mut self, id: &ActionId, outcome: &Outcome) -> io::Result<()> {
        // Hold both locks only while this one message is written.
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        _report(&mut stdout, &mut stderr, id, outcome)
    }
}

/// Prints the end-of-run summary to stdout.
pub fn print_summary(report: &RunReport) -> io::Result<()> {
    _summary(&mut io::stdout().lock(), report)
}

/// The bracketed prefix for messages about `id`.
fn scope(id: &ActionId) -> &str {
    id.node().unwrap_or("cluster")
}

fn write_indented(mut writer: impl Write, content: impl AsRef<str>) -> io::Result<()> {
    for line in content.as_ref().lines() {
        //                1234
        writeln!(writer, "    {line}")?;
    }
    Ok(())
}

/// A testable function containing the logic for reporting that an action is starting.
pub fn _starting<OT: Write, O: DerefMut<Target = OT>>(
    mut stdout: O,
    id: &ActionId,
) -> io::Result<()> {
    writeln!(
        &mut stdout,
        // Adding one extra space lines up "Starting" with "Completed" in the final output.
        "[{}] Starting  {}",
        // Ex:  Completed {}
        scope(id),
        id.kind(),
    )
}

/// A testable function containing the logic for reporting an action's outcome.
pub fn _report<OT: Write, ET: Write, O: DerefMut<Target = OT>, E: DerefMut<Target = ET>>(
    mut stdout: O,
    mut stderr: E,
    id: &ActionId,
    outcome: &Outcome,
) -> io::Result<()> {
    let (scope, kind) = (scope(id), id.kind());
    match outcome {
        Outcome::Succeeded => writeln!(&mut stdout, "[{scope}] Completed {kind}"),
        Outcome::Failed(cause) => {
            writeln!(
                &mut stderr,
                "[{scope}] {kind} failed. See below for details.",
            )?;
            write_indented(stderr.deref_mut(), cause)
        }
        Outcome::Skipped { failed } => writeln!(
            &mut stderr,
            "[{scope}] Skipped   {kind} because {failed} did not succeed",
        ),
        Outcome::Cancelled => writeln!(&mut stderr, "[{scope}] Cancelled {kind}"),
    }
}

/// A testable function containing the logic for printing the end-of-run summary.
pub fn _summary<OT: Write, O: DerefMut<Target = OT>>(
    mut stdout: O,
    report: &RunReport,
) -> io::Result<()> {
    let (succeeded, failed, skipped, cancelled) = report.tally();
    writeln!(&mut stdout)?;
    writeln!(
        &mut stdout,
        "Ran {} action(s) in {:.1}s: {succeeded} succeeded, {failed} failed, {skipped} skipped, \
            {cancelled} cancelled",
        report.outcomes.len(),
        report.elapsed.as_secs_f64(),
    )?;

    let width = report
        .outcomes
        .iter()
        .map(|(id, _)| id.to_string().len())
        .max()
        .unwrap_or(0);
    for (id, outcome) in &report.outcomes {
        let id = id.to_string();
        let mut line = outcome.to_string();
        if let Some(first_break) = line.find('\n') {
            // Multi-line causes were already printed in full when the action failed.
            line.truncate(first_break);
        }
        writeln!(&mut stdout, "  {id:width$}  {line}")?;
    }
    Ok(())
}
