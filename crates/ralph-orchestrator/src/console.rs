//! Console output seam
//!
//! The rich terminal layer is an external collaborator; the driver only
//! talks to this small formatter interface. The default implementation
//! prints plain lines to stdout/stderr, and tests substitute a recording
//! sink.

/// Formatter interface the driver prints through.
pub trait Console: Send + Sync {
    fn header(&self, text: &str);
    fn iteration_header(&self, iteration: u64);
    fn message(&self, text: &str);
    fn info(&self, text: &str);
    fn success(&self, text: &str);
    fn warning(&self, text: &str);
    fn error(&self, text: &str);
}

/// Plain stdout/stderr console.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn header(&self, text: &str) {
        println!("\n=== {text} ===");
    }

    fn iteration_header(&self, iteration: u64) {
        println!("\n--- Iteration {iteration} ---");
    }

    fn message(&self, text: &str) {
        println!("{text}");
    }

    fn info(&self, text: &str) {
        println!("[info] {text}");
    }

    fn success(&self, text: &str) {
        println!("[ok] {text}");
    }

    fn warning(&self, text: &str) {
        eprintln!("[warn] {text}");
    }

    fn error(&self, text: &str) {
        eprintln!("[error] {text}");
    }
}

/// Console that discards everything; for headless and test runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsole;

impl Console for NullConsole {
    fn header(&self, _text: &str) {}
    fn iteration_header(&self, _iteration: u64) {}
    fn message(&self, _text: &str) {}
    fn info(&self, _text: &str) {}
    fn success(&self, _text: &str) {}
    fn warning(&self, _text: &str) {}
    fn error(&self, _text: &str) {}
}
