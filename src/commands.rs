//! Command execution.

use crate::Commands;
use colored::Colorize;
use fdfs_client::{ClientConfig, StorageClient, TrackerClient};
use fdfs_protocol::file_id::split_file_id;
use fdfs_protocol::{GroupStat, MetadataFlag, NameValuePair, StorageStat};

/// Executes a command and returns the formatted output.
pub async fn execute(
    config: &ClientConfig,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Upload {
            path,
            group,
            ext,
            meta,
        } => {
            let meta = parse_pairs(&meta)?;
            let mut client = storage_client(config)?;
            let file_id = client
                .upload_file(group.as_deref(), &path, ext.as_deref(), &meta)
                .await?;
            Ok(format!(
                "{} {}",
                "Uploaded".green(),
                file_id.to_string().cyan()
            ))
        }

        Commands::UploadAppender {
            path,
            group,
            ext,
            meta,
        } => {
            let meta = parse_pairs(&meta)?;
            let mut client = storage_client(config)?;
            let file_id = client
                .upload_appender_file(group.as_deref(), &path, ext.as_deref(), &meta)
                .await?;
            Ok(format!(
                "{} appender {}",
                "Uploaded".green(),
                file_id.to_string().cyan()
            ))
        }

        Commands::Download {
            file_id,
            dest,
            offset,
            length,
        } => {
            let (group_name, filename) = split_file_id(&file_id)?;
            let mut client = storage_client(config)?;
            let written = client
                .download_to_file(group_name, filename, offset, length, &dest)
                .await?;
            Ok(format!(
                "{} {} to {} ({})",
                "Downloaded".green(),
                file_id.cyan(),
                dest.display(),
                format_bytes(written)
            ))
        }

        Commands::Delete { file_id } => {
            let mut client = storage_client(config)?;
            client.delete_file_by_file_id(&file_id).await?;
            Ok(format!("{} {}", "Deleted".green(), file_id.cyan()))
        }

        Commands::Info { file_id } => {
            let mut client = storage_client(config)?;
            let info = client.get_file_info_by_file_id(&file_id).await?;
            Ok(format!(
                "{}\n{}",
                format!("File {}", file_id.cyan()).bold(),
                serde_json::to_string_pretty(&info)?
            ))
        }

        Commands::Meta { file_id } => {
            let mut client = storage_client(config)?;
            let meta = client.get_metadata_by_file_id(&file_id).await?;
            if meta.is_empty() {
                return Ok("No metadata".yellow().to_string());
            }

            let mut output = String::new();
            for pair in &meta {
                output.push_str(&format!("  {} = {}\n", pair.name.cyan(), pair.value));
            }
            Ok(output)
        }

        Commands::SetMeta {
            file_id,
            pairs,
            merge,
        } => {
            let meta = parse_pairs(&pairs)?;
            let flag = if merge {
                MetadataFlag::Merge
            } else {
                MetadataFlag::Overwrite
            };
            let mut client = storage_client(config)?;
            client.set_metadata_by_file_id(&file_id, &meta, flag).await?;
            Ok(format!(
                "{} {} entries on {}",
                (if merge { "Merged" } else { "Set" }).green(),
                meta.len(),
                file_id.cyan()
            ))
        }

        Commands::Groups => {
            let tracker = TrackerClient::from_config(config)?;
            let groups = tracker.list_groups().await?;
            if groups.is_empty() {
                return Ok("No groups".yellow().to_string());
            }

            let mut output = String::new();
            for group in &groups {
                output.push_str(&format_group(group));
            }
            Ok(output)
        }

        Commands::Storages { group, ip } => {
            let tracker = TrackerClient::from_config(config)?;
            let storages = match ip.as_deref() {
                Some(ip) => tracker.list_storages_by_ip(&group, ip).await?,
                None => tracker.list_storages(&group).await?,
            };
            if storages.is_empty() {
                return Ok(format!("No storage nodes in {}", group).yellow().to_string());
            }

            let mut output = String::new();
            for storage in &storages {
                output.push_str(&format_storage(storage));
            }
            Ok(output)
        }

        Commands::Token {
            remote_filename,
            secret,
            ts,
        } => {
            let mut config = config.clone();
            if let Some(secret) = secret {
                config.http.secret_key = secret;
            }
            let ts = ts.unwrap_or_else(|| chrono::Utc::now().timestamp());
            let token = config.http_token(&remote_filename, ts)?;
            Ok(format!("token={}&ts={}", token, ts))
        }

        Commands::Config => Ok(format!(
            "{}\n{}",
            "Effective configuration".bold(),
            config.summary()
        )),
    }
}

fn storage_client(config: &ClientConfig) -> Result<StorageClient, Box<dyn std::error::Error>> {
    Ok(StorageClient::new(TrackerClient::from_config(config)?))
}

/// Parses `KEY=VALUE` arguments.
fn parse_pairs(args: &[String]) -> Result<Vec<NameValuePair>, String> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok(NameValuePair::new(name, value)),
            _ => Err(format!("invalid metadata \"{}\", expected KEY=VALUE", arg)),
        })
        .collect()
}

fn format_group(group: &GroupStat) -> String {
    format!(
        "  {} [storages: {}/{} active, free: {} / {} MB, port: {}]\n",
        group.group_name.cyan(),
        group.active_count,
        group.storage_count,
        group.free_mb,
        group.total_mb,
        group.storage_port
    )
}

fn format_storage(storage: &StorageStat) -> String {
    let status = if storage.status.is_serving() {
        storage.status.caption().green()
    } else {
        storage.status.caption().yellow()
    };
    format!(
        "  {} {}:{} [{}] version {}, free {} / {} MB, uploads {}/{}\n",
        storage.id.cyan(),
        storage.ip_addr,
        storage.storage_port,
        status,
        storage.version,
        storage.free_mb,
        storage.total_mb,
        storage.success_upload_count,
        storage.total_upload_count
    )
}

/// Formats bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let args = vec!["width=100".to_string(), "note=a=b".to_string()];
        let pairs = parse_pairs(&args).unwrap();
        assert_eq!(pairs[0], NameValuePair::new("width", "100"));
        assert_eq!(pairs[1], NameValuePair::new("note", "a=b"));

        assert!(parse_pairs(&["novalue".to_string()]).is_err());
        assert!(parse_pairs(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[tokio::test]
    async fn test_token_uses_secret_override() {
        let config = ClientConfig::default();
        let output = execute(
            &config,
            Commands::Token {
                remote_filename: "M00/00/00/a.jpg".to_string(),
                secret: Some("k".to_string()),
                ts: Some(10),
            },
        )
        .await
        .unwrap();
        let expected = fdfs_protocol::codec::md5_hex(b"M00/00/00/a.jpgk10");
        assert_eq!(output, format!("token={}&ts=10", expected));
    }
}
