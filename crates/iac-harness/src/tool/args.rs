//! Argument lists for each tool subcommand.
//!
//! Variable files are always emitted before `-var` overrides, so overrides
//! win regardless of what the files contain.

use super::RunControl;
use crate::run_config::RunConfig;
use std::path::Path;

/// `init`; the backend is skipped for validation-only runs.
pub fn init(config: &RunConfig, control: &RunControl, with_backend: bool) -> Vec<String> {
    let mut args = vec!["init".to_string(), "-input=false".to_string()];
    if config.upgrade() {
        args.push("-upgrade".to_string());
    }
    if with_backend {
        args.extend(lock(config, control));
    } else {
        args.push("-backend=false".to_string());
    }
    args
}

/// `validate` with machine-readable diagnostics.
pub fn validate() -> Vec<String> {
    vec![
        "validate".to_string(),
        "-json".to_string(),
        "-no-color".to_string(),
    ]
}

/// `plan` writing its change set to `plan_file`.
pub fn plan(config: &RunConfig, control: &RunControl, plan_file: &Path) -> Vec<String> {
    let mut args = vec![
        "plan".to_string(),
        "-input=false".to_string(),
        "-json".to_string(),
        "-detailed-exitcode".to_string(),
    ];
    args.extend(lock(config, control));
    args.push(format!("-out={}", plan_file.display()));
    args.extend(config.var_args());
    args
}

/// `apply` without confirmation.
pub fn apply(config: &RunConfig, control: &RunControl) -> Vec<String> {
    let mut args = vec![
        "apply".to_string(),
        "-input=false".to_string(),
        "-auto-approve".to_string(),
        "-json".to_string(),
    ];
    args.extend(lock(config, control));
    args.extend(config.var_args());
    args
}

/// `output` as a JSON document.
pub fn output() -> Vec<String> {
    vec![
        "output".to_string(),
        "-json".to_string(),
        "-no-color".to_string(),
    ]
}

/// `destroy` without confirmation.
pub fn destroy(config: &RunConfig, control: &RunControl) -> Vec<String> {
    let mut args = vec![
        "destroy".to_string(),
        "-input=false".to_string(),
        "-auto-approve".to_string(),
        "-json".to_string(),
    ];
    args.extend(lock(config, control));
    args.extend(config.var_args());
    args
}

fn lock(config: &RunConfig, control: &RunControl) -> Vec<String> {
    if config.lock() {
        vec![
            "-lock=true".to_string(),
            format!("-lock-timeout={}s", control.lock_timeout.as_secs()),
        ]
    } else {
        vec!["-lock=false".to_string()]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn control() -> RunControl {
        RunControl::new(
            Duration::from_secs(60),
            Duration::from_secs(120),
            CancellationToken::new(),
        )
    }

    fn config() -> RunConfig {
        RunConfig::builder("/modules/ngfw")
            .var_file("example.tfvars")
            .var("project", "proj-x")
            .lock(true)
            .upgrade(true)
            .build()
    }

    #[test]
    fn test_init_with_backend_and_upgrade() {
        let args = init(&config(), &control(), true);
        assert_eq!(
            args,
            vec![
                "init",
                "-input=false",
                "-upgrade",
                "-lock=true",
                "-lock-timeout=120s"
            ]
        );
    }

    #[test]
    fn test_init_without_backend() {
        let config = RunConfig::builder("/m").upgrade(false).build();
        let args = init(&config, &control(), false);
        assert_eq!(args, vec!["init", "-input=false", "-backend=false"]);
    }

    #[test]
    fn test_plan_orders_var_files_before_overrides() {
        let args = plan(&config(), &control(), Path::new("/modules/ngfw/run.tfplan"));

        let file_pos = args
            .iter()
            .position(|a| a == "-var-file=example.tfvars")
            .unwrap();
        let var_pos = args.iter().position(|a| a == "project=proj-x").unwrap();
        assert!(file_pos < var_pos);
        assert!(args.contains(&"-detailed-exitcode".to_string()));
        assert!(args.contains(&"-out=/modules/ngfw/run.tfplan".to_string()));
        assert_eq!(args.first().map(String::as_str), Some("plan"));
    }

    #[test]
    fn test_apply_without_lock() {
        let config = RunConfig::builder("/m").lock(false).build();
        let args = apply(&config, &control());
        assert!(args.contains(&"-lock=false".to_string()));
        assert!(args.contains(&"-auto-approve".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-lock-timeout")));
    }

    #[test]
    fn test_destroy_carries_variables() {
        let args = destroy(&config(), &control());
        assert_eq!(args.first().map(String::as_str), Some("destroy"));
        assert!(args.contains(&"project=proj-x".to_string()));
    }
}
