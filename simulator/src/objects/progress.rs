use std::io::Write;
use std::time::Instant;

/// Console progress for a loader phase, printed as `[name] current/total`
/// on one self-overwriting line with a final timing summary.
pub struct ProgressTracker {
    name: String,
    start: Option<Instant>,
}

impl ProgressTracker {
    pub fn new(name: &str) -> Self {
        ProgressTracker {
            name: name.to_owned(),
            start: None,
        }
    }

    pub fn progress(&mut self, current: usize, total: usize) {
        if current == 1 {
            self.start = Some(Instant::now());
        }
        print!("[{}] {}/{}\r", self.name, current, total);
        let _ = std::io::stdout().flush();

        if current == total {
            println!();
            if let Some(start) = self.start {
                println!("Time to load all objects: {:?}\n", start.elapsed());
            }
        }
    }
}
