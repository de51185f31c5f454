//! Scripted command runner for testing the execution backends.

use crate::collector::traits::{CommandRunner, Invocation};
use std::cell::RefCell;
use std::io;

/// A canned response, selected when every needle occurs in the invocation.
#[derive(Debug, Clone)]
struct Response {
    needles: Vec<String>,
    output: Result<Vec<u8>, String>,
}

/// Command runner that answers from a script instead of spawning processes.
///
/// Invocations are matched against responses in insertion order by
/// substring: the program, its arguments and any stdin text are searched
/// for every needle. Unmatched invocations return empty output, which is
/// what `psql` prints on stdout when it cannot connect.
#[derive(Debug, Default)]
pub struct MockRunner {
    responses: Vec<Response>,
    succeeding: Vec<String>,
    calls: RefCell<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers invocations containing all `needles` with `output`.
    pub fn respond(mut self, needles: &[&str], output: impl AsRef<[u8]>) -> Self {
        self.responses.push(Response {
            needles: needles.iter().map(|n| n.to_string()).collect(),
            output: Ok(output.as_ref().to_vec()),
        });
        self
    }

    /// Fails invocations containing all `needles` with an I/O error.
    pub fn fail(mut self, needles: &[&str], message: &str) -> Self {
        self.responses.push(Response {
            needles: needles.iter().map(|n| n.to_string()).collect(),
            output: Err(message.to_string()),
        });
        self
    }

    /// Makes [`CommandRunner::succeeds`] return `true` for this rendering.
    pub fn succeed(mut self, display: &str) -> Self {
        self.succeeding.push(display.to_string());
        self
    }

    /// All invocations seen so far, in call order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    fn haystack(invocation: &Invocation) -> String {
        let mut text = invocation.display();
        if let Some(input) = &invocation.stdin {
            text.push('\n');
            text.push_str(input);
        }
        text
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<Vec<u8>> {
        self.calls.borrow_mut().push(invocation.clone());
        let haystack = Self::haystack(invocation);
        let matched = self
            .responses
            .iter()
            .find(|r| r.needles.iter().all(|n| haystack.contains(n.as_str())));
        match matched {
            Some(Response { output: Ok(out), .. }) => Ok(out.clone()),
            Some(Response {
                output: Err(msg), ..
            }) => Err(io::Error::other(msg.clone())),
            None => Ok(Vec::new()),
        }
    }

    fn succeeds(&self, invocation: &Invocation) -> bool {
        self.calls.borrow_mut().push(invocation.clone());
        self.succeeding.contains(&invocation.display())
    }
}
