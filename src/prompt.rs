//! Interactive input.

use std::io::{self, BufRead, Write};

use crate::error::{Error, Result};

/// Source of answers to questions asked during a command.
pub trait InputProvider {
    /// Ask `prompt` until `validate` accepts the trimmed answer.
    fn ask_until(&mut self, prompt: &str, validate: &dyn Fn(&str) -> bool) -> Result<String>;
}

/// Ask a yes/no question.
pub fn confirm(input: &mut dyn InputProvider, prompt: &str) -> Result<bool> {
    let answer = input.ask_until(&format!("{prompt}(y/n) "), &|a| {
        matches!(a.to_ascii_lowercase().as_str(), "y" | "yes" | "n" | "no")
    })?;
    Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Ask with a default used when the answer is blank.
pub fn ask_or_default(
    input: &mut dyn InputProvider,
    prompt: &str,
    default: &str,
    validate: &dyn Fn(&str) -> bool,
) -> Result<String> {
    let shown = if default.is_empty() {
        prompt.to_string()
    } else {
        format!("{prompt}[{default}] ")
    };
    let answer = input.ask_until(&shown, &|a| {
        if a.is_empty() {
            validate(default)
        } else {
            validate(a)
        }
    })?;
    Ok(if answer.is_empty() {
        default.to_string()
    } else {
        answer
    })
}

/// Reads answers from stdin, writing prompts to stderr.
pub struct TerminalInput<R> {
    reader: R,
}

impl TerminalInput<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self {
            reader: io::stdin().lock(),
        }
    }
}

impl<R: BufRead> TerminalInput<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> InputProvider for TerminalInput<R> {
    fn ask_until(&mut self, prompt: &str, validate: &dyn Fn(&str) -> bool) -> Result<String> {
        loop {
            eprint!("{prompt}");
            io::stderr().flush().ok();
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| Error::Input(e.to_string()))?;
            if read == 0 {
                return Err(Error::Input("end of input".into()));
            }
            let answer = line.trim();
            if validate(answer) {
                return Ok(answer.to_string());
            }
        }
    }
}

/// Canned answers, consumed in order.
#[cfg(test)]
pub(crate) struct ScriptedInput {
    answers: std::collections::VecDeque<String>,
    pub asked: Vec<String>,
}

#[cfg(test)]
impl ScriptedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: vec![],
        }
    }
}

#[cfg(test)]
impl InputProvider for ScriptedInput {
    fn ask_until(&mut self, prompt: &str, validate: &dyn Fn(&str) -> bool) -> Result<String> {
        self.asked.push(prompt.to_string());
        while let Some(answer) = self.answers.pop_front() {
            if validate(answer.trim()) {
                return Ok(answer.trim().to_string());
            }
        }
        Err(Error::Input("script exhausted".into()))
    }
}
