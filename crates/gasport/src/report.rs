//! Progress reporting for long operations.

/// Sink for human-readable progress messages.
///
/// Long operations report through this instead of printing; the CLI wires
/// it to stderr and the tool layer collects warnings into response hints.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

/// Collects messages in memory; the tool layer drains warnings into
/// response `hints`.
#[derive(Debug, Default)]
pub struct VecReporter {
    pub infos: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl VecReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for VecReporter {
    fn info(&mut self, msg: &str) {
        self.infos.push(msg.to_string());
    }

    fn warn(&mut self, msg: &str) {
        self.warnings.push(msg.to_string());
    }

    fn error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }
}
