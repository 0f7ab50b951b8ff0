//! Warning toggles, set from `-Wall`, `-W<name>` and `-Wno-<name>` flags.

pub const WARNING_NAMES: &[&str] = &["shadowing-vardefs", "unrecognized-escape-sequences"];

#[derive(Debug, Clone, Copy)]
pub struct WarningConfig {
    pub shadowing_vardefs: bool,
    pub unrecognized_escape_sequences: bool,
}

impl Default for WarningConfig {
    fn default() -> WarningConfig {
        WarningConfig {
            shadowing_vardefs: true,
            unrecognized_escape_sequences: true,
        }
    }
}

impl WarningConfig {
    /// Apply one command line flag. Returns false when the flag is not a
    /// known warning option at all, so callers can report it.
    pub fn apply_cli_flag(&mut self, flag: &str) -> bool {
        if flag == "-Wall" {
            self.shadowing_vardefs = true;
            self.unrecognized_escape_sequences = true;
            return true;
        }
        let Some(rest) = flag.strip_prefix("-W") else {
            return false;
        };
        let (name, enabled) = match rest.strip_prefix("no-") {
            Some(name) => (name, false),
            None => (rest, true),
        };
        match name {
            "shadowing-vardefs" => self.shadowing_vardefs = enabled,
            "unrecognized-escape-sequences" => {
                self.unrecognized_escape_sequences = enabled
            }
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_prefix_disables() {
        let mut config = WarningConfig::default();
        assert!(config.apply_cli_flag("-Wno-unrecognized-escape-sequences"));
        assert!(!config.unrecognized_escape_sequences);
        assert!(config.shadowing_vardefs);

        assert!(config.apply_cli_flag("-Wall"));
        assert!(config.unrecognized_escape_sequences);
    }

    #[test]
    fn unknown_flags_are_rejected() {
        let mut config = WarningConfig::default();
        assert!(!config.apply_cli_flag("-Wbogus"));
        assert!(!config.apply_cli_flag("--import-debug"));
    }
}
