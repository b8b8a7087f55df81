//! Results of one executed job, as sent to a drop-off node.
//!
//! The upload is a strict request/reply sequence where every item but the
//! last is answered with `NEXT` and the last with `Acknowledged`:
//!
//! ```text
//!  workdone · command · error count · errors… · output count · outputs…
//! ```

/// Captured results for one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobResults {
    pub command: String,
    pub errors: Vec<String>,
    pub output: Vec<String>,
}

impl JobResults {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Every item after `workdone`, in wire order.
    pub fn items(&self) -> Vec<String> {
        let mut items = Vec::with_capacity(3 + self.errors.len() + self.output.len());
        items.push(self.command.clone());
        items.push(self.errors.len().to_string());
        items.extend(self.errors.iter().cloned());
        items.push(self.output.len().to_string());
        items.extend(self.output.iter().cloned());
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_in_wire_order() {
        let results = JobResults {
            command: "build".into(),
            errors: vec!["e1".into(), "e2".into()],
            output: vec!["o1".into()],
        };
        assert_eq!(results.items(), ["build", "2", "e1", "e2", "1", "o1"]);
    }

    #[test]
    fn empty_output_ends_on_the_count() {
        let results = JobResults::new("true");
        assert_eq!(results.items(), ["true", "0", "0"]);
    }
}
