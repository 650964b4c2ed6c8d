//! Reporter that swallows everything; used by tests and library
//! callers that do their own reporting.

use super::Reporter;

#[derive(Default)]
pub struct SilentReporter;

impl SilentReporter {
    pub fn new() -> Self {
        SilentReporter
    }
}

impl Reporter for SilentReporter {
    fn headline(&self, _text: &str) {}

    fn info(&self, _text: &str) {}

    fn file_state(&self, _text: &str) {}

    fn warning(&self, _text: &str) {}

    fn progress(&self, _label: &str, _permille: u32) {}

    fn progress_done(&self) {}
}
