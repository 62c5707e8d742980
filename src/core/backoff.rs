/// Exponential backoff for failed compare-and-swap attempts.
///
/// Delay starts at one spin unit and doubles up to 32 units. Past the cap the
/// caller is told to yield its timeslice instead of spinning harder.
#[derive(Debug)]
pub struct Backoff {
    units: u32,
}

pub const BACKOFF_INITIAL: u32 = 1;
pub const BACKOFF_CAP: u32 = 32;

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            units: BACKOFF_INITIAL,
        }
    }

    /// Spins for the current delay and doubles it. Once capped, also yields.
    pub fn snooze(&mut self) {
        for _ in 0..self.units {
            std::hint::spin_loop();
        }
        if self.units >= BACKOFF_CAP {
            std::thread::yield_now();
        } else {
            self.units = (self.units * 2).min(BACKOFF_CAP);
        }
    }

    pub fn reset(&mut self) {
        self.units = BACKOFF_INITIAL;
    }

    pub fn units(&self) -> u32 {
        self.units
    }

    pub fn is_capped(&self) -> bool {
        self.units >= BACKOFF_CAP
    }
}
