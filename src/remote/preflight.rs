/*!
 * Pre-flight checks before launching an attack
 *
 * Launch only proceeds when the input hashlist is present and
 * non-empty, every referenced asset is present and of plausible size,
 * no other cracking process is already running, and the worker has disk
 * headroom. Failing any of these would waste a GPU run or corrupt the
 * artifact trail, so each failure names the check that tripped.
 */

use tracing::info;

use super::session;
use super::transport::Transport;
use crate::config::{ExecutorConfig, RemoteConfig};
use crate::error::{Result, SluiceError};

/// Run every pre-flight check for one attack launch
pub fn preflight<T: Transport>(
    transport: &mut T,
    remote: &RemoteConfig,
    executor: &ExecutorConfig,
    hashlist_path: &str,
    asset_paths: &[String],
) -> Result<()> {
    check_hashlist(transport, hashlist_path)?;
    check_assets(transport, executor, asset_paths)?;
    check_worker_idle(transport, remote)?;
    check_disk_headroom(transport, remote, executor)?;
    info!(hashlist = hashlist_path, "pre-flight checks passed");
    Ok(())
}

fn check_hashlist<T: Transport>(transport: &mut T, path: &str) -> Result<()> {
    match session::remote_file_size(transport, path).map_err(SluiceError::Transport)? {
        None => Err(SluiceError::PreflightFailed {
            check: "hashlist".to_string(),
            detail: format!("{} is missing on the worker", path),
        }),
        Some(0) => Err(SluiceError::PreflightFailed {
            check: "hashlist".to_string(),
            detail: format!("{} is empty", path),
        }),
        Some(_) => Ok(()),
    }
}

fn check_assets<T: Transport>(
    transport: &mut T,
    executor: &ExecutorConfig,
    asset_paths: &[String],
) -> Result<()> {
    for path in asset_paths {
        match session::remote_file_size(transport, path).map_err(SluiceError::Transport)? {
            None => {
                return Err(SluiceError::PreflightFailed {
                    check: "asset".to_string(),
                    detail: format!("{} is missing on the worker", path),
                });
            }
            Some(size) if size < executor.min_asset_bytes => {
                // Tiny assets are almost always truncated downloads
                return Err(SluiceError::PreflightFailed {
                    check: "asset".to_string(),
                    detail: format!(
                        "{} is {} bytes, below the {}-byte plausibility floor",
                        path, size, executor.min_asset_bytes
                    ),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn check_worker_idle<T: Transport>(transport: &mut T, remote: &RemoteConfig) -> Result<()> {
    let running = session::worker_running(transport, &remote.worker_process)
        .map_err(SluiceError::Transport)?;
    if running {
        return Err(SluiceError::PreflightFailed {
            check: "worker-idle".to_string(),
            detail: format!(
                "another {} process is already running on the worker",
                remote.worker_process
            ),
        });
    }
    Ok(())
}

fn check_disk_headroom<T: Transport>(
    transport: &mut T,
    remote: &RemoteConfig,
    executor: &ExecutorConfig,
) -> Result<()> {
    let output = transport
        .exec(&format!("df -P -k '{}'", remote.work_dir))
        .map_err(SluiceError::Transport)?;
    if !output.success() {
        return Err(SluiceError::PreflightFailed {
            check: "disk".to_string(),
            detail: format!("df failed for {}: {}", remote.work_dir, output.stderr.trim()),
        });
    }

    let available = parse_df_available(&output.stdout).ok_or_else(|| {
        SluiceError::PreflightFailed {
            check: "disk".to_string(),
            detail: format!("unparsable df output for {}", remote.work_dir),
        }
    })?;

    if available < executor.min_remote_disk_bytes {
        return Err(SluiceError::PreflightFailed {
            check: "disk".to_string(),
            detail: format!(
                "{} bytes free on the worker, {} required",
                available, executor.min_remote_disk_bytes
            ),
        });
    }
    Ok(())
}

/// Extract available bytes from POSIX `df -P -k` output
fn parse_df_available(output: &str) -> Option<u64> {
    let line = output.lines().filter(|l| !l.trim().is_empty()).next_back()?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    // Filesystem / 1024-blocks / Used / Available / Capacity / Mounted on
    let kibibytes: u64 = fields.get(3)?.parse().ok()?;
    Some(kibibytes * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::{MockTransport, WorkerTick};

    const DF_PLENTY: &str = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                             /dev/sda1 104857600 10485760 94371840 10% /srv\n";
    const DF_FULL: &str = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                           /dev/sda1 104857600 104750000 107600 99% /srv\n";

    fn setup() -> (MockTransport, RemoteConfig, ExecutorConfig) {
        let transport = MockTransport::new(vec![WorkerTick::default()]);
        transport.add_remote_file("/srv/sluice/chunk.txt", &vec![b'a'; 4096]);
        transport.add_remote_file("/srv/sluice/assets/words.txt", &vec![b'w'; 8192]);
        transport.set_df_output(DF_PLENTY);
        (transport, RemoteConfig::default(), ExecutorConfig::default())
    }

    #[test]
    fn test_preflight_passes() {
        let (mut transport, remote, executor) = setup();
        preflight(
            &mut transport,
            &remote,
            &executor,
            "/srv/sluice/chunk.txt",
            &["/srv/sluice/assets/words.txt".to_string()],
        )
        .unwrap();
    }

    #[test]
    fn test_missing_hashlist_fails() {
        let (mut transport, remote, executor) = setup();
        let err = preflight(
            &mut transport,
            &remote,
            &executor,
            "/srv/sluice/absent.txt",
            &[],
        )
        .unwrap_err();
        match err {
            SluiceError::PreflightFailed { check, .. } => assert_eq!(check, "hashlist"),
            other => panic!("expected PreflightFailed, got {other}"),
        }
    }

    #[test]
    fn test_empty_hashlist_fails() {
        let (mut transport, remote, executor) = setup();
        transport.add_remote_file("/srv/sluice/empty.txt", b"");
        let err = preflight(
            &mut transport,
            &remote,
            &executor,
            "/srv/sluice/empty.txt",
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, SluiceError::PreflightFailed { .. }));
    }

    #[test]
    fn test_tiny_asset_fails() {
        let (mut transport, remote, executor) = setup();
        transport.add_remote_file("/srv/sluice/assets/stub.txt", b"404");
        let err = preflight(
            &mut transport,
            &remote,
            &executor,
            "/srv/sluice/chunk.txt",
            &["/srv/sluice/assets/stub.txt".to_string()],
        )
        .unwrap_err();
        match err {
            SluiceError::PreflightFailed { check, detail } => {
                assert_eq!(check, "asset");
                assert!(detail.contains("plausibility floor"));
            }
            other => panic!("expected PreflightFailed, got {other}"),
        }
    }

    #[test]
    fn test_busy_worker_fails() {
        let mut transport = MockTransport::new(vec![WorkerTick::running("")]);
        transport.add_remote_file("/srv/sluice/chunk.txt", &vec![b'a'; 4096]);
        transport.set_df_output(DF_PLENTY);
        let err = preflight(
            &mut transport,
            &RemoteConfig::default(),
            &ExecutorConfig::default(),
            "/srv/sluice/chunk.txt",
            &[],
        )
        .unwrap_err();
        match err {
            SluiceError::PreflightFailed { check, .. } => assert_eq!(check, "worker-idle"),
            other => panic!("expected PreflightFailed, got {other}"),
        }
    }

    #[test]
    fn test_low_disk_fails() {
        let (mut transport, remote, executor) = setup();
        transport.set_df_output(DF_FULL);
        let err = preflight(
            &mut transport,
            &remote,
            &executor,
            "/srv/sluice/chunk.txt",
            &[],
        )
        .unwrap_err();
        match err {
            SluiceError::PreflightFailed { check, .. } => assert_eq!(check, "disk"),
            other => panic!("expected PreflightFailed, got {other}"),
        }
    }

    #[test]
    fn test_parse_df_available() {
        assert_eq!(parse_df_available(DF_PLENTY), Some(94371840 * 1024));
        assert_eq!(parse_df_available(""), None);
        assert_eq!(parse_df_available("garbage line"), None);
    }
}
