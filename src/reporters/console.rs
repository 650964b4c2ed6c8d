//! Console reporter in par2cmdline's output style.

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{NoiseLevel, Reporter};

pub struct ConsoleReporter {
    noise: NoiseLevel,
    last_permille: AtomicU32,
}

impl ConsoleReporter {
    pub fn new(noise: NoiseLevel) -> Self {
        ConsoleReporter {
            noise,
            last_permille: AtomicU32::new(u32::MAX),
        }
    }
}

impl Reporter for ConsoleReporter {
    fn headline(&self, text: &str) {
        if self.noise > NoiseLevel::Silent {
            println!("{}", text);
        }
    }

    fn info(&self, text: &str) {
        if self.noise > NoiseLevel::Quiet {
            println!("{}", text);
        }
    }

    fn file_state(&self, text: &str) {
        if self.noise > NoiseLevel::Silent {
            println!("{}", text);
        }
    }

    fn warning(&self, text: &str) {
        eprintln!("{}", text);
    }

    fn progress(&self, label: &str, permille: u32) {
        if self.noise <= NoiseLevel::Quiet {
            return;
        }
        if self.last_permille.swap(permille, Ordering::Relaxed) == permille {
            return;
        }
        print!("{}: {}.{}%\r", label, permille / 10, permille % 10);
        std::io::stdout().flush().unwrap_or(());
    }

    fn progress_done(&self) {
        if self.noise <= NoiseLevel::Quiet {
            return;
        }
        self.last_permille.store(u32::MAX, Ordering::Relaxed);
        print!("\r{}\r", " ".repeat(79));
        std::io::stdout().flush().unwrap_or(());
    }
}
