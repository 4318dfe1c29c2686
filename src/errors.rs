use anyhow::Result;
use colored::Colorize;

/// For re-throwing after we've printed a list of errors to the user.
#[derive(Debug, thiserror::Error)]
#[error("{label} failed for {} unit(s): {}", .units.len(), .units.join(", "))]
pub struct AggregatedErrors {
    pub label: String,
    pub units: Vec<String>,
}

/// Failures collected during a pass, one per unit (or unreadable scan entry).
#[derive(Debug)]
pub struct Errors {
    errors: Vec<(String, anyhow::Error)>,
}

impl Default for Errors {
    fn default() -> Self {
        Self {
            // ideally we won't have any,
            // and we don't mind reallocating if we're already in an error state:
            errors: Vec::with_capacity(0),
        }
    }
}

impl Errors {
    pub fn add(&mut self, unit: &str, e: anyhow::Error) {
        log::error!("{unit}: {e:#}");
        self.errors.push((unit.to_owned(), e));
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|(unit, _)| unit.as_str())
    }

    /// Print full list of errors to stderr, fail w/ an aggregated error
    /// if there were one or more errors.
    pub fn print_recap(&self, label: &str) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        eprintln!("\n{} {}:\n", "Encountered errors while".red(), label.red());
        for (unit, e) in &self.errors {
            recap(unit, e);
        }
        Err(AggregatedErrors {
            label: label.to_owned(),
            units: self.units().map(str::to_owned).collect(),
        }
        .into())
    }
}

fn recap(unit: &str, e: &anyhow::Error) {
    eprint!("{} {}: {}", "ERROR".red(), unit.bold(), e);
    for cause in e.chain().skip(1) {
        eprint!("\nCaused by:\n\t{cause}");
    }
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_recap_is_ok() {
        assert!(Errors::default().print_recap("scanning").is_ok());
    }

    #[test]
    fn test_recap_names_failed_units() {
        let mut errors = Errors::default();
        errors.add("RUN_001", anyhow::anyhow!("bad manifest"));
        errors.add("RUN_002", anyhow::anyhow!("bedtools failed"));
        assert_eq!(errors.len(), 2);

        let err = errors.print_recap("discovery pass").unwrap_err();
        let agg = err.downcast_ref::<AggregatedErrors>().unwrap();
        assert_eq!(agg.units, vec!["RUN_001", "RUN_002"]);
        assert_eq!(
            agg.to_string(),
            "discovery pass failed for 2 unit(s): RUN_001, RUN_002"
        );
    }
}
