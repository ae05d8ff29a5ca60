use serde::{Deserialize, Serialize};
use std::fmt;

/// Port scan request as accepted by `POST /api/tests/nmap`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    pub targets: Vec<String>,
    pub port_range: String,
    pub scan_type: String, // "tcp" | "connect" | "udp" | "both"
    pub timing: String,
    pub verbose: bool,
    pub service_detection: bool,
    pub os_detection: bool,
    pub script_scan: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            targets: vec!["192.168.122.1".into()],
            port_range: "1-1000".into(),
            scan_type: "tcp".into(),
            timing: "T4".into(),
            verbose: true,
            service_detection: true,
            os_detection: true,
            script_scan: false,
        }
    }
}

/// An argv ready to hand to the process facility. `Display` joins it with spaces,
/// which is also what gets stored on the run record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine(Vec<String>);

impl CommandLine {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(argv.into_iter().map(Into::into).collect())
    }

    pub fn program(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.0.get(1..).unwrap_or(&[])
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

pub fn nmap_command(nmap: &str, cfg: &ScanConfig) -> CommandLine {
    let mut cmd = vec![nmap.to_string()];

    if cfg.verbose {
        cmd.push("-v".into());
    }
    if cfg.service_detection {
        cmd.push("-sV".into());
    }
    if cfg.os_detection {
        cmd.push("-O".into());
    }
    if cfg.script_scan {
        cmd.push("-sC".into());
    }

    cmd.push(format!("-{}", cfg.timing));

    match cfg.scan_type.as_str() {
        "tcp" => cmd.push("-sS".into()),
        "connect" => cmd.push("-sT".into()),
        "udp" => cmd.push("-sU".into()),
        "both" => cmd.extend(["-sS".to_string(), "-sU".to_string()]),
        _ => {} // unknown variants let nmap pick its default scan
    }

    cmd.extend(["-p".to_string(), cfg.port_range.clone()]);
    cmd.extend(cfg.targets.iter().cloned());

    CommandLine(cmd)
}

pub fn vuln_command<S: AsRef<str>>(nmap: &str, port: &str, targets: &[S]) -> CommandLine {
    let mut cmd = vec![
        nmap.to_string(),
        "--script".into(),
        "vuln".into(),
        "-p".into(),
        port.to_string(),
    ];
    cmd.extend(targets.iter().map(|t| t.as_ref().to_string()));
    CommandLine(cmd)
}

pub fn dns_command(dig: &str, server: &str, domain: &str) -> CommandLine {
    CommandLine(vec![dig.to_string(), format!("@{server}"), domain.to_string()])
}
