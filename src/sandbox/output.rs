use std::time::{Duration, Instant};

use super::error::{ErrorKind, ScriptError, ScriptResult};

const TRUNCATION_MARKER: &str = "\n... output truncated ...\n";

/// Captured `print` output of one execution, capped at a fixed size.
#[derive(Debug)]
pub struct OutputBuffer {
    buf: String,
    cap: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: String::new(),
            cap,
            truncated: false,
        }
    }

    pub fn write(&mut self, text: &str) {
        if self.truncated {
            return;
        }
        let room = self.cap.saturating_sub(self.buf.len());
        if text.len() <= room {
            self.buf.push_str(text);
            return;
        }
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buf.push_str(&text[..cut]);
        self.buf.push_str(TRUNCATION_MARKER);
        self.truncated = true;
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

/// Wall-clock deadline plus an instruction count. The clock is sampled every
/// 256 steps.
#[derive(Debug)]
pub struct Budget {
    deadline: Instant,
    max_steps: u64,
    steps: u64,
}

impl Budget {
    pub fn new(timeout: Duration, max_steps: u64) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            max_steps,
            steps: 0,
        }
    }

    pub fn tick(&mut self) -> ScriptResult<()> {
        self.charge(1)
    }

    /// Charges `n` steps at once, for bulk work like column-wide operations.
    pub fn charge(&mut self, n: u64) -> ScriptResult<()> {
        let before = self.steps;
        self.steps = self.steps.saturating_add(n);
        if self.steps > self.max_steps {
            return Err(exceeded("step limit reached"));
        }
        if before / 256 != self.steps / 256 && Instant::now() > self.deadline {
            return Err(exceeded("time limit reached"));
        }
        Ok(())
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

fn exceeded(why: &str) -> ScriptError {
    ScriptError::new(
        ErrorKind::Budget,
        format!("execution budget exceeded ({})", why),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_truncates_once() {
        let mut out = OutputBuffer::new(8);
        out.write("hello ");
        out.write("world and more");
        out.write("ignored");
        assert!(out.is_truncated());
        let text = out.into_string();
        assert!(text.starts_with("hello wo"));
        assert!(text.ends_with(TRUNCATION_MARKER));
        assert!(!text.contains("ignored"));
    }

    #[test]
    fn test_budget_step_limit() {
        let mut budget = Budget::new(Duration::from_secs(60), 10);
        for _ in 0..10 {
            budget.tick().unwrap();
        }
        let err = budget.tick().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Budget);
    }

    #[test]
    fn test_budget_deadline() {
        let mut budget = Budget::new(Duration::from_millis(0), u64::MAX);
        std::thread::sleep(Duration::from_millis(2));
        let err = budget.charge(1000).unwrap_err();
        assert!(err.message.contains("time limit"));
    }
}
