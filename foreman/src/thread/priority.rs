use std::fmt;
use std::io;
use std::str::FromStr;

use crate::error::ConfigError;

/// Thread priority on a 10-level scale.
///
/// `MIN` (1), `NORM` (5) and `MAX` (10) mirror the three symbolic tiers
/// accepted in configuration. On Linux the level is mapped onto the thread's
/// nice value when the thread starts; elsewhere it is recorded only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadPriority(u8);

// Index is `level - 1`.
const NICE_VALUES: [i32; 10] = [19, 15, 10, 5, 0, -2, -5, -10, -15, -20];

impl ThreadPriority {
    pub const MIN: ThreadPriority = ThreadPriority(1);
    pub const NORM: ThreadPriority = ThreadPriority(5);
    pub const MAX: ThreadPriority = ThreadPriority(10);

    /// Validates a numeric level.
    pub fn new(level: i64) -> Result<Self, ConfigError> {
        if (1..=10).contains(&level) {
            Ok(ThreadPriority(level as u8))
        } else {
            Err(ConfigError::PriorityOutOfRange(level))
        }
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// The nice value this level maps to.
    pub fn nice_value(self) -> i32 {
        NICE_VALUES[(self.0 - 1) as usize]
    }

    /// Applies the level to the calling OS thread.
    ///
    /// Raising priority above normal usually needs privileges the process
    /// does not have; callers treat failure as non-fatal.
    #[cfg(target_os = "linux")]
    pub(crate) fn apply_to_current_thread(self) -> io::Result<()> {
        if self == ThreadPriority::NORM {
            return Ok(());
        }
        // SAFETY: gettid has no preconditions; setpriority only reads its arguments.
        let rc = unsafe {
            let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
            libc::setpriority(libc::PRIO_PROCESS, tid, self.nice_value())
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub(crate) fn apply_to_current_thread(self) -> io::Result<()> {
        Ok(())
    }
}

impl Default for ThreadPriority {
    fn default() -> Self {
        ThreadPriority::NORM
    }
}

impl fmt::Display for ThreadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ThreadPriority::MIN => write!(f, "MIN"),
            ThreadPriority::NORM => write!(f, "NORM"),
            ThreadPriority::MAX => write!(f, "MAX"),
            ThreadPriority(level) => write!(f, "{}", level),
        }
    }
}

impl FromStr for ThreadPriority {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_uppercase().as_str() {
            "MIN" | "LOW" => Ok(ThreadPriority::MIN),
            "NORM" | "NORMAL" => Ok(ThreadPriority::NORM),
            "MAX" | "HIGH" => Ok(ThreadPriority::MAX),
            _ => {
                let level: i64 = s
                    .parse()
                    .map_err(|_| ConfigError::InvalidPriority(s.to_string()))?;
                ThreadPriority::new(level)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbolic_tiers() {
        for (input, expected) in [
            ("MIN", ThreadPriority::MIN),
            ("low", ThreadPriority::MIN),
            ("Norm", ThreadPriority::NORM),
            ("NORMAL", ThreadPriority::NORM),
            ("max", ThreadPriority::MAX),
            ("HIGH", ThreadPriority::MAX),
        ] {
            assert_eq!(input.parse::<ThreadPriority>().unwrap(), expected, "{}", input);
        }
    }

    #[test]
    fn test_numeric_levels() {
        for level in 1..=10 {
            let parsed: ThreadPriority = level.to_string().parse().unwrap();
            assert_eq!(parsed.level() as i64, level);
        }
        assert_eq!(" 7 ".parse::<ThreadPriority>().unwrap().level(), 7);
    }

    #[test]
    fn test_rejects_out_of_range_and_garbage() {
        assert_eq!("0".parse::<ThreadPriority>(), Err(ConfigError::PriorityOutOfRange(0)));
        assert_eq!("11".parse::<ThreadPriority>(), Err(ConfigError::PriorityOutOfRange(11)));
        assert!(matches!(
            "urgent".parse::<ThreadPriority>(),
            Err(ConfigError::InvalidPriority(_))
        ));
    }

    #[test]
    fn test_nice_values_are_monotonic() {
        assert_eq!(ThreadPriority::NORM.nice_value(), 0);
        for pair in NICE_VALUES.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ThreadPriority::MIN.to_string(), "MIN");
        assert_eq!(ThreadPriority::new(3).unwrap().to_string(), "3");
    }
}
