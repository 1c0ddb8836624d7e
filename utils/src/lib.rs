//! Small async helpers shared by the capsule-vault crates.

mod backoff;

pub use backoff::{sleep_or_cancel, Backoff, SleepOutcome};

#[macro_export]
macro_rules! unwrap_or_continue {
    ($opt: expr) => {
        match $opt {
            Some(v) => v,
            None => {
                continue;
            }
        }
    };
}
