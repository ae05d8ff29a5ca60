/// Decides whether one line of tool output counts as a finding.
pub trait FindingMatcher: Send + Sync {
    fn is_finding(&self, line: &str) -> bool;
}

/// nmap port table rows such as `22/tcp open ssh`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenPortMatcher;

impl FindingMatcher for OpenPortMatcher {
    fn is_finding(&self, line: &str) -> bool {
        line.contains("/tcp") && line.contains("open")
    }
}

/// Counts lines containing a fixed needle.
#[derive(Debug, Clone)]
pub struct ContainsMatcher(pub String);

impl FindingMatcher for ContainsMatcher {
    fn is_finding(&self, line: &str) -> bool {
        line.contains(self.0.as_str())
    }
}

pub fn count_findings(matcher: &dyn FindingMatcher, lines: &[String]) -> u64 {
    lines.iter().filter(|l| matcher.is_finding(l)).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_port_needs_both_markers() {
        let m = OpenPortMatcher;
        assert!(m.is_finding("22/tcp   open  ssh     OpenSSH 8.9"));
        assert!(!m.is_finding("53/udp   open  domain"));
        assert!(!m.is_finding("80/tcp   closed http"));
        assert!(!m.is_finding("Nmap done: 1 IP address"));
    }

    #[test]
    fn counts_over_buffered_lines() {
        let lines: Vec<String> = [
            "PORT   STATE SERVICE",
            "22/tcp open  ssh",
            "80/tcp open  http",
            "443/tcp filtered https",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(count_findings(&OpenPortMatcher, &lines), 2);
        assert_eq!(count_findings(&ContainsMatcher("STATE".into()), &lines), 1);
    }
}
