//! Feeding unpacked contexts to the malware scanner.

use std::fmt;

use tracing::{info, warn};

use crate::context::UnpackTree;
use crate::tools::Scanner;

/// What the scanner concluded about one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Match,
    Error,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Clean => "clean",
            Verdict::Match => "malware found",
            Verdict::Error => "scan error",
        })
    }
}

/// A verdict together with the scanner's report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub verdict: Verdict,
    pub output: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Stop at the first context that is not clean.
    pub fail_fast: bool,
    /// Ask the scanner for every signature that matches, not just the first.
    pub all_match: bool,
}

/// Verdicts for the contexts that were scanned, by lineage label.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub verdicts: Vec<(String, Verdict)>,
}

impl ScanSummary {
    pub fn is_clean(&self) -> bool {
        self.verdicts.iter().all(|(_, v)| *v == Verdict::Clean)
    }

    /// Labels of the contexts that did not come back clean.
    pub fn flagged(&self) -> impl Iterator<Item = &str> {
        self.verdicts
            .iter()
            .filter(|(_, v)| *v != Verdict::Clean)
            .map(|(label, _)| label.as_str())
    }
}

const ALARM: &str = "!";
const ALL_CLEAR: &str = "=";

/// Scan the contents of every context in `tree`, in unpack order.
///
/// A scanner that cannot be run counts as an error verdict for that context.
pub async fn scan_contexts(scanner: &dyn Scanner, tree: &UnpackTree, options: ScanOptions) -> ScanSummary {
    let mut summary = ScanSummary::default();

    for (id, context) in tree.iter() {
        let Some(dir) = context.contents_dir() else {
            continue;
        };
        let label = tree.lineage_label(id);
        info!("Scanning {label}");

        let outcome = scanner
            .scan(dir, options.all_match)
            .await
            .unwrap_or_else(|e| ScanOutcome {
                verdict: Verdict::Error,
                output: e.to_string(),
            });

        if outcome.verdict != Verdict::Clean {
            warn!("{}", ALARM.repeat(80));
            warn!("clamdscan reported {} in file {label}:", outcome.verdict);
            warn!("{}", tree.redact_temp_path(id, &outcome.output));
            warn!("{}", ALARM.repeat(80));
        }

        summary.verdicts.push((label, outcome.verdict));
        if options.fail_fast && outcome.verdict != Verdict::Clean {
            return summary;
        }
    }

    if summary.is_clean() {
        info!("{}", ALL_CLEAR.repeat(80));
        info!("No malware found by clamdscan, all clear!");
        info!("{}", ALL_CLEAR.repeat(80));
    }

    summary
}
