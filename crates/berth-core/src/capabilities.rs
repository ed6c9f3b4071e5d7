//! Command capabilities derived from service annotations.

use std::collections::{BTreeMap, BTreeSet};

/// Annotation declaring the service type, e.g. `"service/type": "backend"`.
pub const SERVICE_TYPE_ANNOTATION: &str = "service/type";

/// Prefix of per-command support annotations: `command/supports-<cmd>`.
pub const SUPPORTS_PREFIX: &str = "command/supports-";

/// Commands every service supports unless explicitly disabled.
pub const DEFAULT_COMMANDS: [&str; 7] = [
    "start",
    "stop",
    "restart",
    "check",
    "watch",
    "provision",
    "configure",
];

/// Compute the set of commands a service supports from its annotations.
///
/// Defaults are included unless annotated `"false"`; any other command
/// annotated `"true"` is added. Values are trimmed and compared
/// case-insensitively; anything else is ignored.
pub fn extract_command_capabilities(annotations: &BTreeMap<String, String>) -> BTreeSet<String> {
    let mut capabilities: BTreeSet<String> =
        DEFAULT_COMMANDS.iter().map(|c| c.to_string()).collect();

    for (key, value) in annotations {
        let Some(command) = key.strip_prefix(SUPPORTS_PREFIX) else {
            continue;
        };
        if command.is_empty() {
            continue;
        }
        match value.trim().to_ascii_lowercase().as_str() {
            "true" => {
                capabilities.insert(command.to_string());
            }
            "false" => {
                capabilities.remove(command);
            }
            _ => {}
        }
    }

    capabilities
}

pub fn supports_command(annotations: &BTreeMap<String, String>, command: &str) -> bool {
    extract_command_capabilities(annotations).contains(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_annotations() {
        let caps = extract_command_capabilities(&BTreeMap::new());
        assert_eq!(caps.len(), DEFAULT_COMMANDS.len());
        for command in DEFAULT_COMMANDS {
            assert!(caps.contains(command), "missing default {command}");
        }
        assert!(!caps.contains("publish"));
    }

    #[test]
    fn test_false_removes_default() {
        let caps = extract_command_capabilities(&annotations(&[
            ("command/supports-watch", "false"),
            ("command/supports-provision", " FALSE "),
        ]));
        assert!(!caps.contains("watch"));
        assert!(!caps.contains("provision"));
        assert!(caps.contains("start"));
    }

    #[test]
    fn test_true_adds_non_default() {
        let caps = extract_command_capabilities(&annotations(&[
            ("command/supports-publish", "true"),
            ("command/supports-backup", "True"),
        ]));
        assert!(caps.contains("publish"));
        assert!(caps.contains("backup"));
    }

    #[test]
    fn test_unrelated_and_malformed_annotations_ignored() {
        let caps = extract_command_capabilities(&annotations(&[
            ("service/type", "backend"),
            ("command/supports-", "true"),
            ("command/supports-exec", "yes"),
        ]));
        assert_eq!(caps.len(), DEFAULT_COMMANDS.len());
        assert!(!caps.contains("exec"));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let input = annotations(&[
            ("command/supports-publish", "true"),
            ("command/supports-stop", "false"),
        ]);
        assert_eq!(
            extract_command_capabilities(&input),
            extract_command_capabilities(&input)
        );
        assert!(supports_command(&input, "publish"));
        assert!(!supports_command(&input, "stop"));
    }
}
