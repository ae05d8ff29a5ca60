use std::io;
use thiserror::Error;

/// Why a run ended without a usable exit status.
#[derive(Error, Debug)]
pub enum RunFailure {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read process output: {0}")]
    Stream(#[source] io::Error),

    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),

    #[error("run cancelled")]
    Cancelled,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("run not found: {0}")]
    NotFound(String),

    #[error("run {0} already finished")]
    AlreadyFinished(String),
}

/// Rejected start-run request; nothing has been registered or broadcast yet.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No targets provided.")]
    NoTargets,

    #[error("Invalid target: {0:?}")]
    InvalidTarget(String),

    #[error("Invalid port specification: {0:?}")]
    InvalidPorts(String),

    #[error("Invalid timing template: {0:?}")]
    InvalidTiming(String),
}

pub fn validate_targets<S: AsRef<str>>(targets: &[S]) -> Result<(), ValidationError> {
    if targets.is_empty() {
        return Err(ValidationError::NoTargets);
    }
    for t in targets {
        let t = t.as_ref();
        if t.trim().is_empty() || t.starts_with('-') {
            return Err(ValidationError::InvalidTarget(t.to_string()));
        }
    }
    Ok(())
}

/// Port lists go straight into argv after `-p`, so they must not look like options.
pub fn validate_ports(ports: &str) -> Result<(), ValidationError> {
    let ok = !ports.is_empty()
        && !ports.starts_with('-')
        && ports.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, ',' | '-' | ':'));
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidPorts(ports.to_string()))
    }
}

/// Timing is emitted as `-<timing>`, so only nmap's `T0`..`T5` templates are allowed.
pub fn validate_timing(timing: &str) -> Result<(), ValidationError> {
    match timing.as_bytes() {
        [b'T', b'0'..=b'5'] => Ok(()),
        _ => Err(ValidationError::InvalidTiming(timing.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_target_list_is_rejected() {
        let err = validate_targets::<String>(&[]).unwrap_err();
        assert_eq!(err, ValidationError::NoTargets);
        assert_eq!(err.to_string(), "No targets provided.");
    }

    #[test]
    fn option_like_and_blank_targets_are_rejected() {
        assert!(matches!(
            validate_targets(&["-oN/tmp/x"]),
            Err(ValidationError::InvalidTarget(_))
        ));
        assert!(matches!(validate_targets(&["  "]), Err(ValidationError::InvalidTarget(_))));
        assert!(validate_targets(&["10.0.0.0/24", "example.com"]).is_ok());
    }

    #[test]
    fn port_specs() {
        assert!(validate_ports("1-1000").is_ok());
        assert!(validate_ports("22,80,T:443,U:53").is_ok());
        assert!(validate_ports("").is_err());
        assert!(validate_ports("-oN").is_err());
        assert!(validate_ports("80 --script x").is_err());
    }

    #[test]
    fn timing_templates() {
        for t in ["T0", "T3", "T5"] {
            assert!(validate_timing(t).is_ok(), "{t}");
        }
        for t in ["", "T6", "t4", "T44", "oN/tmp/out", "-script=x"] {
            assert_eq!(validate_timing(t), Err(ValidationError::InvalidTiming(t.to_string())));
        }
    }

    #[test]
    fn spawn_failure_names_program() {
        let err = RunFailure::Spawn {
            program: "nmap".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        assert_eq!(err.to_string(), "failed to launch nmap: No such file or directory");
    }
}
