//! Finding an already running engine in the OS process table.
//!
//! There is no registry of running engines: an engine "exists" for an
//! endpoint when some process command line starts `soffice` and carries the
//! endpoint's exact `--accept=` argument.

use regex::Regex;
use std::sync::LazyLock;

use crate::{EndpointAddress, ListedProcess, ProcessId};

/// Name fragment every engine command line contains
pub const ENGINE_BINARY: &str = "soffice";

static POSIX_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?<pid>\d+)\s+(?<cmd>.*)$").expect("valid regex"));

static WINDOWS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?<cmd>.*?)\s+(?<pid>\d+)\s*$").expect("valid regex"));

/// Shape of the platform's process listing output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    /// `ps -e -o pid,args`: pid first, then the command line
    Posix,
    /// `wmic ... get commandline,processid`: command line first, pid last
    Windows,
}

impl ListingFormat {
    fn pattern(&self) -> &'static Regex {
        match self {
            ListingFormat::Posix => &POSIX_LINE,
            ListingFormat::Windows => &WINDOWS_LINE,
        }
    }
}

/// Parse a process listing, skipping headers, blank lines and anything else
/// the line pattern rejects
pub fn parse_listing(output: &str, format: ListingFormat) -> Vec<ListedProcess> {
    let pattern = format.pattern();
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let captures = pattern.captures(line)?;
            let pid = captures["pid"].parse::<u32>().ok()?;
            Some(ListedProcess {
                pid: ProcessId(pid),
                command_line: captures["cmd"].trim().to_string(),
            })
        })
        .collect()
}

/// Whether a command line belongs to the engine bound to `endpoint`
pub fn is_engine_for(command_line: &str, endpoint: &EndpointAddress) -> bool {
    let accept = endpoint.accept_argument();
    command_line
        .find(ENGINE_BINARY)
        .is_some_and(|start| command_line[start..].contains(&accept))
}

/// First listed process that is the engine for `endpoint`
pub fn find_engine<'a>(
    processes: &'a [ListedProcess],
    endpoint: &EndpointAddress,
) -> Option<&'a ListedProcess> {
    processes
        .iter()
        .find(|process| is_engine_for(&process.command_line, endpoint))
}
