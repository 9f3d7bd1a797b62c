use chrono::NaiveDateTime;
use std::fmt;

/// One integer value taken from a line of serial input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reading {
    value: i64,
    timestamp: NaiveDateTime,
}

impl Reading {
    /// Parses a trimmed line as a base-10 integer; anything else is noise.
    pub fn parse(line: &str) -> Option<Self> {
        let value = line.trim().parse::<i64>().ok()?;
        Some(Self {
            value,
            timestamp: chrono::Local::now().naive_local(),
        })
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    /// Canonical decimal payload: no leading zeros, no `+` sign.
    pub fn payload(&self) -> String {
        self.value.to_string()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}", self.timestamp, self.value)
    }
}
