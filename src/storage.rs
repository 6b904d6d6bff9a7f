//! Shell commands that mount the S3-compatible bucket inside a sandbox.
//!
//! The commands embed credentials, so they must never be logged. Use
//! [`describe_mount`] for anything that reaches a log line.

use crate::config::StorageConfig;

/// Where the temporary s3fs credentials file is written inside the sandbox.
const PASSWD_FILE: &str = "/tmp/.passwd-s3fs";

/// Builds the mount command.
///
/// Creates the mount directory, writes the credentials with mode 600, runs
/// s3fs with path-style addressing, then removes the credentials file
/// whatever the mount outcome and exits with the mount status.
pub(crate) fn mount_command(storage: &StorageConfig) -> String {
    let mount = shell_words::quote(&storage.mount_path);
    let passwd = shell_words::quote(PASSWD_FILE);
    let pair = format!(
        "{}:{}",
        storage.access_key.expose(),
        storage.secret_key.expose()
    );
    let credentials = shell_words::quote(&pair);
    let options = [
        format!("passwd_file={PASSWD_FILE}"),
        format!("url={}", storage.endpoint),
        format!("endpoint={}", storage.region),
        "use_path_request_style".to_string(),
        "allow_other".to_string(),
        "nonempty".to_string(),
    ]
    .iter()
    .map(|opt| format!("-o {}", shell_words::quote(opt)))
    .collect::<Vec<_>>()
    .join(" ");

    format!(
        "sudo mkdir -p {mount} && sudo chown \"$(id -u):$(id -g)\" {mount} \
         && umask 077 && printf '%s\\n' {credentials} > {passwd} && chmod 600 {passwd} \
         && {{ sudo s3fs {bucket} {mount} {options}; status=$?; rm -f {passwd}; exit $status; }}",
        bucket = shell_words::quote(&storage.bucket),
    )
}

/// Builds the force-unmount command for the same mount point.
pub(crate) fn unmount_command(storage: &StorageConfig) -> String {
    let mount = shell_words::quote(&storage.mount_path);
    format!("sudo umount -f {mount} || sudo fusermount -uz {mount}")
}

/// Loggable summary of a mount, without credentials.
pub(crate) fn describe_mount(storage: &StorageConfig) -> String {
    format!(
        "s3://{} via {} at {}",
        storage.bucket, storage.endpoint, storage.mount_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    fn storage() -> StorageConfig {
        StorageConfig {
            endpoint: "https://gw.example.com".to_string(),
            bucket: "stability".to_string(),
            region: "eu-west-1".to_string(),
            access_key: Secret::new("AKIA"),
            secret_key: Secret::new("se'cret"),
            mount_path: "/home/user/bucket".to_string(),
        }
    }

    #[test]
    fn test_mount_command_uses_path_style() {
        let cmd = mount_command(&storage());
        assert!(cmd.contains("s3fs stability /home/user/bucket"));
        let words = shell_words::split(&cmd).unwrap();
        for option in [
            "use_path_request_style",
            "url=https://gw.example.com",
            "endpoint=eu-west-1",
            "passwd_file=/tmp/.passwd-s3fs",
        ] {
            assert!(words.iter().any(|w| w == option), "missing {option}");
        }
    }

    #[test]
    fn test_mount_command_restricts_and_removes_credentials() {
        let cmd = mount_command(&storage());
        assert!(cmd.contains("chmod 600 /tmp/.passwd-s3fs"));
        let mount_at = cmd.find("sudo s3fs").unwrap();
        let remove_at = cmd.find("rm -f /tmp/.passwd-s3fs").unwrap();
        assert!(remove_at > mount_at);
        assert!(cmd.ends_with("exit $status; }"));
    }

    #[test]
    fn test_mount_command_quotes_credentials() {
        let cmd = mount_command(&storage());
        let words = shell_words::split(&cmd).unwrap();
        assert!(words.iter().any(|w| w == "AKIA:se'cret"));
    }

    #[test]
    fn test_unmount_command_forces() {
        let cmd = unmount_command(&storage());
        assert!(cmd.starts_with("sudo umount -f /home/user/bucket"));
    }

    #[test]
    fn test_describe_mount_has_no_credentials() {
        let text = describe_mount(&storage());
        assert!(!text.contains("AKIA"));
        assert!(!text.contains("cret"));
        assert!(text.contains("s3://stability"));
    }
}
