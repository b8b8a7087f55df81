//! `OS SECLEVEL COMMAND` job descriptor lines.

use std::str::FromStr;

use crate::error::{DescriptorError, TrussError};
use crate::scheduler::job::TargetOs;

/// One accepted descriptor line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub os: TargetOs,
    pub security_level: u32,
    pub command: String,
}

impl FromStr for JobDescriptor {
    type Err = DescriptorError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.splitn(3, ' ');
        let (Some(os), Some(level), Some(command)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(DescriptorError::MissingFields);
        };

        let os = os
            .parse::<TargetOs>()
            .map_err(|_| DescriptorError::InvalidOs(os.to_string()))?;
        let security_level = level
            .parse::<u32>()
            .map_err(|_| DescriptorError::InvalidSecurityLevel(level.to_string()))?;
        let command = command.trim();
        if command.is_empty() {
            return Err(DescriptorError::EmptyCommand);
        }

        Ok(Self {
            os,
            security_level,
            command: command.to_string(),
        })
    }
}

/// Outcome of loading a descriptor source.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub accepted: usize,
    /// `TrussError::Descriptor` for each rejected line, in file order.
    pub rejected: Vec<TrussError>,
}

/// Parse every non-blank line, keeping 1-based line numbers for rejects.
pub fn parse_descriptors(source: &str) -> (Vec<JobDescriptor>, Vec<TrussError>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for (index, line) in source.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<JobDescriptor>() {
            Ok(descriptor) => accepted.push(descriptor),
            Err(source) => rejected.push(TrussError::Descriptor {
                line: index + 1,
                source,
            }),
        }
    }
    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_spaces() {
        let d: JobDescriptor = "Windows 5 dir /s C:\\".parse().unwrap();
        assert_eq!(d.os, TargetOs::Windows);
        assert_eq!(d.security_level, 5);
        assert_eq!(d.command, "dir /s C:\\");
    }

    #[test]
    fn rejects_each_malformed_field() {
        assert_eq!(
            "any 0".parse::<JobDescriptor>(),
            Err(DescriptorError::MissingFields)
        );
        assert_eq!(
            "beos 0 ls".parse::<JobDescriptor>(),
            Err(DescriptorError::InvalidOs("beos".into()))
        );
        assert_eq!(
            "any -2 ls".parse::<JobDescriptor>(),
            Err(DescriptorError::InvalidSecurityLevel("-2".into()))
        );
        assert_eq!(
            "any 1  ".parse::<JobDescriptor>(),
            Err(DescriptorError::EmptyCommand)
        );
    }

    #[test]
    fn parse_source_skips_blanks_and_numbers_rejects() {
        let source = "any 0 echo hi\n\nbogus line here\nlinux 2 uname -a\r\n   \nwindows x dir\n";
        let (ok, bad) = parse_descriptors(source);
        assert_eq!(ok.len(), 2);
        assert_eq!(ok[1].command, "uname -a");

        let lines: Vec<usize> = bad
            .iter()
            .map(|e| match e {
                TrussError::Descriptor { line, .. } => *line,
                other => panic!("unexpected error {other}"),
            })
            .collect();
        assert_eq!(lines, vec![3, 6]);
    }
}
