//! LVM volume backend
//!
//! Shells out to the LVM tools on the local node. Reports are requested in
//! JSON with byte units and no suffix, so every size is a plain integer
//! string.

use crate::domain::ports::{LogicalVolumeRecord, VolumeBackend, VolumeGroupRecord};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const BACKEND_NAME: &str = "lvm";

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct LvmConfig {
    pub vgs_binary: String,
    pub lvs_binary: String,
    pub lvextend_binary: String,
    /// Grow the filesystem along with the volume (`lvextend -r`)
    pub resize_fs: bool,
    /// Limit for a single LVM command
    pub command_timeout: Duration,
}

impl Default for LvmConfig {
    fn default() -> Self {
        Self {
            vgs_binary: "vgs".to_string(),
            lvs_binary: "lvs".to_string(),
            lvextend_binary: "lvextend".to_string(),
            resize_fs: true,
            command_timeout: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Report Parsing
// =============================================================================

#[derive(Debug, Deserialize)]
struct Report<T> {
    report: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct VgSection {
    #[serde(default)]
    vg: Vec<VgRow>,
}

#[derive(Debug, Deserialize)]
struct VgRow {
    vg_name: String,
    vg_size: String,
    vg_free: String,
}

#[derive(Debug, Deserialize)]
struct LvSection {
    #[serde(default)]
    lv: Vec<LvRow>,
}

#[derive(Debug, Deserialize)]
struct LvRow {
    lv_name: String,
    vg_name: String,
    lv_size: String,
}

fn parse_size(command: &str, field: &str, value: &str) -> Result<i64> {
    value.trim().parse().map_err(|_| Error::BackendOperationFailed {
        backend: BACKEND_NAME.into(),
        operation: command.into(),
        reason: format!("invalid {} {:?}", field, value),
    })
}

fn report_error(command: &str, e: serde_json::Error) -> Error {
    Error::BackendOperationFailed {
        backend: BACKEND_NAME.into(),
        operation: command.into(),
        reason: format!("JSON parse error: {}", e),
    }
}

/// Parse `vgs --reportformat json` output
pub fn parse_vgs_report(raw: &[u8]) -> Result<Vec<VolumeGroupRecord>> {
    let report: Report<VgSection> =
        serde_json::from_slice(raw).map_err(|e| report_error("vgs", e))?;

    report
        .report
        .into_iter()
        .flat_map(|section| section.vg)
        .map(|row| {
            Ok(VolumeGroupRecord {
                size_bytes: parse_size("vgs", "vg_size", &row.vg_size)?,
                free_bytes: parse_size("vgs", "vg_free", &row.vg_free)?,
                name: row.vg_name,
            })
        })
        .collect()
}

/// Parse `lvs --reportformat json` output
pub fn parse_lvs_report(raw: &[u8]) -> Result<Vec<LogicalVolumeRecord>> {
    let report: Report<LvSection> =
        serde_json::from_slice(raw).map_err(|e| report_error("lvs", e))?;

    report
        .report
        .into_iter()
        .flat_map(|section| section.lv)
        .map(|row| {
            Ok(LogicalVolumeRecord {
                size_bytes: parse_size("lvs", "lv_size", &row.lv_size)?,
                name: row.lv_name,
                volume_group: row.vg_name,
            })
        })
        .collect()
}

// =============================================================================
// LVM Backend
// =============================================================================

pub struct LvmBackend {
    config: LvmConfig,
}

impl LvmBackend {
    pub fn new(config: LvmConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to `lvextend` for a resize
    pub fn lvextend_args(&self, volume: &LogicalVolumeRecord, target_bytes: i64) -> Vec<String> {
        let mut args = vec!["-L".to_string(), format!("{}b", target_bytes)];
        if self.config.resize_fs {
            args.push("-r".to_string());
        }
        args.push(format!("{}/{}", volume.volume_group, volume.name));
        args
    }

    async fn run(&self, operation: &str, binary: &str, args: &[String]) -> Result<Vec<u8>> {
        debug!(binary, ?args, "Running LVM command");

        let child = Command::new(binary).args(args).kill_on_drop(true).output();
        let output = match tokio::time::timeout(self.config.command_timeout, child).await {
            Ok(output) => output.map_err(|e| Error::BackendOperationFailed {
                backend: BACKEND_NAME.into(),
                operation: operation.into(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                return Err(Error::Timeout {
                    operation: format!("{} {}", binary, args.join(" ")),
                    after: self.config.command_timeout,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::BackendOperationFailed {
                backend: BACKEND_NAME.into(),
                operation: operation.into(),
                reason: stderr.trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    fn report_args(fields: &str) -> Vec<String> {
        ["--reportformat", "json", "--units", "b", "--nosuffix", "-o", fields]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

#[async_trait]
impl VolumeBackend for LvmBackend {
    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroupRecord>> {
        let raw = self
            .run("vgs", &self.config.vgs_binary, &Self::report_args("vg_name,vg_size,vg_free"))
            .await?;
        parse_vgs_report(&raw)
    }

    async fn list_logical_volumes(&self) -> Result<Vec<LogicalVolumeRecord>> {
        let raw = self
            .run("lvs", &self.config.lvs_binary, &Self::report_args("lv_name,vg_name,lv_size"))
            .await?;
        parse_lvs_report(&raw)
    }

    async fn resize_volume(&self, volume: &LogicalVolumeRecord, target_bytes: i64) -> Result<()> {
        if target_bytes <= volume.size_bytes {
            return Err(Error::Validation(format!(
                "refusing to resize {}/{} from {} to {} bytes",
                volume.volume_group, volume.name, volume.size_bytes, target_bytes
            )));
        }

        let args = self.lvextend_args(volume, target_bytes);
        self.run("lvextend", &self.config.lvextend_binary, &args).await?;

        info!(
            volume = %volume.name,
            volume_group = %volume.volume_group,
            target_bytes,
            "Extended logical volume"
        );
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }
}
