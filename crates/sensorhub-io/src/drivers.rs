//! Driver status probes
//!
//! Installing kernel modules is handled elsewhere; handlers only need to
//! know whether a driver they depend on is present.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use sensorhub_core::prelude::*;

/// A system driver a kind handler depends on
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn is_installed(&self) -> bool;
}

pub const ONEWIRE_DRIVER: &str = "onewire";

/// `w1-gpio` line in /etc/modules, not commented out
static MODULE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*w1-gpio\s*$").expect("Invalid module regex"));

static OVERLAY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*dtoverlay=w1-gpio\b").expect("Invalid overlay regex")
});

/// One-wire bus driver: `w1-gpio` module loaded at boot and the matching
/// device tree overlay enabled
#[derive(Debug, Clone)]
pub struct OnewireDriver {
    etc_modules: PathBuf,
    config_txt: PathBuf,
}

impl OnewireDriver {
    pub fn new(etc_modules: impl Into<PathBuf>, config_txt: impl Into<PathBuf>) -> Self {
        Self {
            etc_modules: etc_modules.into(),
            config_txt: config_txt.into(),
        }
    }

    fn file_matches(path: &Path, pattern: &Regex) -> bool {
        match std::fs::read_to_string(path) {
            Ok(content) => pattern.is_match(&content),
            Err(e) => {
                debug!("Unable to read {}: {}", path.display(), e);
                false
            }
        }
    }
}

impl Driver for OnewireDriver {
    fn name(&self) -> &str {
        ONEWIRE_DRIVER
    }

    fn is_installed(&self) -> bool {
        Self::file_matches(&self.etc_modules, &MODULE_REGEX)
            && Self::file_matches(&self.config_txt, &OVERLAY_REGEX)
    }
}
