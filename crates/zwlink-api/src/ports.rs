//! Serial port discovery.
//!
//! Controllers are USB sticks that show up as serial devices. Which
//! device names count as candidates depends on the operating system, so
//! the match is driven by a small set of regex patterns applied to the
//! entries of the device directory.

use std::collections::BTreeSet;
use std::path::Path;

use regex::Regex;

use crate::error::Error;

/// Device directory scanned by [`scan_serial_ports`] on Unix systems.
pub const DEVICE_DIR: &str = "/dev";

/// Default name patterns for the current operating system.
pub fn default_patterns() -> Vec<&'static str> {
    if cfg!(target_os = "linux") {
        vec![r"^(cu|ttyS|ttyUSB|ttyACM|ttyAMA|rfcomm|ttyO)[0-9]{1,3}$"]
    } else if cfg!(target_os = "macos") {
        vec![r"^(cu|tty)\..*$"]
    } else {
        vec![r"^.*$"]
    }
}

/// Compile a list of name patterns.
pub fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(p.as_ref())).collect()
}

/// List entries of `dir` whose file name matches any of `patterns`.
///
/// Returns full paths, sorted.
pub fn scan_serial_ports(dir: &Path, patterns: &[Regex]) -> Result<BTreeSet<String>, Error> {
    let mut ports = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if patterns.iter().any(|p| p.is_match(name)) {
            ports.insert(entry.path().display().to_string());
        }
    }
    tracing::debug!(dir = %dir.display(), count = ports.len(), "scanned serial ports");
    Ok(ports)
}

/// Scan [`DEVICE_DIR`] with the default patterns, swallowing I/O errors.
pub fn available_serial_ports() -> BTreeSet<String> {
    let patterns = match compile_patterns(&default_patterns()) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "invalid built-in port pattern");
            return BTreeSet::new();
        }
    };
    scan_serial_ports(Path::new(DEVICE_DIR), &patterns).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "serial port scan failed");
        BTreeSet::new()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn linux_pattern_matches_usb_and_acm() {
        let patterns =
            compile_patterns(&[r"^(cu|ttyS|ttyUSB|ttyACM|ttyAMA|rfcomm|ttyO)[0-9]{1,3}$"]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        for name in ["ttyUSB0", "ttyACM12", "tty", "ttyUSB", "sda1", "ttyS1000"] {
            touch(dir.path(), name);
        }

        let found: Vec<String> = scan_serial_ports(dir.path(), &patterns)
            .unwrap()
            .into_iter()
            .map(|p| {
                Path::new(&p)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        assert_eq!(found, vec!["ttyACM12".to_owned(), "ttyUSB0".to_owned()]);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let patterns = compile_patterns(&[".*"]).unwrap();
        let result = scan_serial_ports(Path::new("/definitely/not/here"), &patterns);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn bad_pattern_is_rejected() {
        assert!(compile_patterns(&["(unclosed"]).is_err());
    }
}
