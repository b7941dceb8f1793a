use crate::{Error, Result};
use lazy_regex::regex;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

/// Builds the host list from a single host and/or a newline-delimited file.
/// First-seen order is kept and duplicates are dropped.
pub fn load_hosts(single: Option<&str>, list: Option<&Path>) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    if let Some(host) = single {
        lines.push(host.to_string());
    }
    if let Some(path) = list {
        lines.extend(read_lines(path)?);
    }

    let mut seen = HashSet::new();
    let hosts: Vec<String> = lines
        .iter()
        .filter_map(|line| normalize_host(line))
        .filter(|host| seen.insert(host.to_lowercase()))
        .collect();

    if hosts.is_empty() {
        return Err(Error::EmptyTargets);
    }

    info!("{:12} - {}", "HOSTS", hosts.len());
    Ok(hosts)
}

/// Newline-delimited DNS servers, same comment rules as host lists.
pub fn load_resolvers(path: &Path) -> Result<Vec<String>> {
    let resolvers: Vec<String> = read_lines(path)?
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();

    debug!("{:12} - {} from {:?}", "RESOLVERS", resolvers.len(), path);
    Ok(resolvers)
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let lines = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<String>>>()?;
    Ok(lines)
}

/// Strips a URL scheme, any path or port, and surrounding dots.
pub fn normalize_host(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let without_scheme = regex!(r"^[a-zA-Z][a-zA-Z0-9+.-]*://").replace(line, "");
    let host = without_scheme
        .split(|c: char| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    let host = host.trim_matches('.');

    if host.is_empty() || host.contains(char::is_whitespace) {
        debug!("{:12} - {:?}", "SKIP LINE", line);
        return None;
    }
    Some(host.to_string())
}
