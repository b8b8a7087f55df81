//! Plain-text results file format.
//!
//! ```text
//! Job:<command>
//! Error:<line>
//! Output:<line>
//! ##################################################
//! Job:<next command>
//! ...
//! <blank line>
//! ```

use std::fmt::Write;

use crate::scheduler::job::Job;

pub const RESULT_DIVIDER: &str = "##################################################";

pub fn results_file_name(instance_uid: u32, counter: u32) -> String {
    format!("SavedResults-{instance_uid}-{counter}")
}

pub fn render(jobs: &[Job]) -> String {
    let mut out = String::new();
    for (index, job) in jobs.iter().enumerate() {
        if index > 0 {
            out.push_str(RESULT_DIVIDER);
            out.push('\n');
        }
        let _ = writeln!(out, "Job:{}", job.command());
        for line in job.error_lines() {
            let _ = writeln!(out, "Error:{line}");
        }
        for line in job.output_lines() {
            let _ = writeln!(out, "Output:{line}");
        }
    }
    out.push('\n');
    out
}
