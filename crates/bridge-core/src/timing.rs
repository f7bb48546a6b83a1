//! Call timings and their human-readable rendering.

use std::fmt;
use std::time::{Duration, Instant};

/// Render a duration the way operators read it: `850µs`, `12ms`, `1.5s`, `2m 3s`.
pub fn pretty_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros < 1_000 {
        return format!("{micros}µs");
    }
    let millis = duration.as_millis();
    if millis < 1_000 {
        return format!("{millis}ms");
    }
    let rounded = (duration.as_secs_f64() * 10.0).round() / 10.0;
    if rounded < 60.0 {
        return if rounded.fract() == 0.0 {
            format!("{rounded:.0}s")
        } else {
            format!("{rounded:.1}s")
        };
    }
    // Rounding can carry 59.95s over into the next minute.
    let total = duration.as_secs().max(rounded as u64);
    format!("{}m {}s", total / 60, total % 60)
}

/// Durations measured for one unary call.
///
/// Each span is optional: a clock that went backwards yields `None` instead of failing the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallTimings {
    pub resolver: Option<Duration>,
    pub serializer: Option<Duration>,
    pub total: Option<Duration>,
}

impl CallTimings {
    /// Compute timings from the three checkpoints of a call.
    pub fn measure(started: Instant, resolved: Instant, serialized: Instant) -> Self {
        Self {
            resolver: resolved.checked_duration_since(started),
            serializer: serialized.checked_duration_since(resolved),
            total: serialized.checked_duration_since(started),
        }
    }
}

fn write_span(f: &mut fmt::Formatter<'_>, label: &str, span: Option<Duration>) -> fmt::Result {
    match span {
        Some(duration) => write!(f, "{label}={}", pretty_duration(duration)),
        None => write!(f, "{label}=?"),
    }
}

impl fmt::Display for CallTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_span(f, "resolver", self.resolver)?;
        f.write_str(" ")?;
        write_span(f, "serializer", self.serializer)?;
        f.write_str(" ")?;
        write_span(f, "total", self.total)
    }
}
