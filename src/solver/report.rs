//! Periodic single-line progress reports, filtered by a minimum change so
//! converging runs do not flood the output.

use crate::solver::value::is_approx_equal;

pub struct ProgressReport {
    min_change: f64,
    enabled: bool,
    last_printed: Option<Vec<f64>>,
}

impl ProgressReport {
    pub fn new(min_change: f64, enabled: bool) -> ProgressReport {
        ProgressReport {
            min_change,
            enabled,
            last_printed: None,
        }
    }

    pub fn disabled() -> ProgressReport {
        ProgressReport::new(0.0, false)
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Prints `[name=value, ...]` when any registered value moved by at
    /// least the configured minimum since the last printed line.
    pub fn print(&mut self, values: &[(&str, f64)]) {
        if !self.enabled {
            return;
        }
        let current: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
        let should_print = match &self.last_printed {
            None => true,
            Some(last) => {
                last.len() != current.len()
                    || last
                        .iter()
                        .zip(current.iter())
                        .any(|(a, b)| !is_approx_equal(*a, *b, self.min_change))
            }
        };
        if should_print {
            let line = values
                .iter()
                .map(|(name, v)| format!("{}={}", name, v))
                .collect::<Vec<_>>()
                .join(", ");
            println!("[{}]", line);
            self.last_printed = Some(current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_report_tracks_nothing() {
        let mut r = ProgressReport::disabled();
        r.print(&[("v", 1.0)]);
        assert!(r.last_printed.is_none());
    }

    #[test]
    fn small_changes_are_filtered() {
        let mut r = ProgressReport::new(0.5, true);
        r.print(&[("v", 1.0)]);
        assert_eq!(r.last_printed.as_deref(), Some(&[1.0][..]));
        // below the threshold: remembered values stay at the printed line
        r.print(&[("v", 1.2)]);
        assert_eq!(r.last_printed.as_deref(), Some(&[1.0][..]));
        r.print(&[("v", 2.0)]);
        assert_eq!(r.last_printed.as_deref(), Some(&[2.0][..]));
    }
}
