//! File command - object storage containers and objects

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use nimbus_client::{split_path, ClientError, MissingAs, Sharing, Versioning};
use tokio::fs::File;

use super::server::{parse_pairs, WaitArgs};
use super::wait::{wait_for, WaitSpec};
use super::{timeout_arg, Completion};
use crate::context::Session;
use crate::output::{or_dash, ContainerRow, ObjectRow};

const DELETED: &str = "DELETED";

#[derive(Subcommand)]
pub enum FileCommand {
    /// List containers, or the objects of one container
    List {
        /// Container name
        container: Option<String>,

        /// Only objects whose name starts with this
        #[arg(long, requires = "container")]
        prefix: Option<String>,
    },

    /// Create a container
    Mkdir {
        /// Container name
        container: String,
    },

    /// Delete an empty container
    Rmdir {
        /// Container name
        container: String,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Delete a container and everything in it
    Purge {
        /// Container name
        container: String,
    },

    /// Show account, container or object details
    Info {
        /// CONTAINER or CONTAINER/OBJECT; the account when omitted
        path: Option<String>,
    },

    /// Upload a local file
    Upload {
        /// Local file
        local: PathBuf,

        /// CONTAINER or CONTAINER/OBJECT; the object defaults to the file name
        path: String,
    },

    /// Download an object to a local file
    Download {
        /// CONTAINER/OBJECT
        path: String,

        /// Local file; defaults to the object name
        local: Option<PathBuf>,
    },

    /// Delete an object
    Delete {
        /// CONTAINER/OBJECT
        path: String,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Make an object publicly readable
    Publish {
        /// CONTAINER/OBJECT
        path: String,
    },

    /// Revoke public access to an object
    Unpublish {
        /// CONTAINER/OBJECT
        path: String,
    },

    /// Set container or object metadata
    Meta {
        /// CONTAINER or CONTAINER/OBJECT
        path: String,

        /// Metadata entries
        #[arg(required = true, value_name = "KEY=VALUE")]
        entries: Vec<String>,

        /// Drop every container entry not given (containers only)
        #[arg(long)]
        replace: bool,
    },

    /// Delete a container metadata entry
    Delmeta {
        /// Container name
        container: String,

        /// Metadata key
        key: String,
    },

    /// Append a local file to an object
    Append {
        /// Local file
        local: PathBuf,

        /// CONTAINER/OBJECT
        path: String,
    },

    /// Overwrite bytes START to END (inclusive) of an object from a local file
    Overwrite {
        /// Local file; its first END-START+1 bytes are written
        local: PathBuf,

        /// CONTAINER/OBJECT
        path: String,

        /// First byte to replace
        start: u64,

        /// Last byte to replace
        end: u64,
    },

    /// Cut an object down to a size
    Truncate {
        /// CONTAINER/OBJECT
        path: String,

        /// Bytes to keep
        bytes: u64,
    },

    /// Show who may read and write an object, or replace that
    Share {
        /// CONTAINER/OBJECT
        path: String,

        /// Users or groups allowed to read
        #[arg(long, value_delimiter = ',', value_name = "NAMES")]
        read: Vec<String>,

        /// Users or groups allowed to write
        #[arg(long, value_delimiter = ',', value_name = "NAMES")]
        write: Vec<String>,
    },

    /// Stop sharing an object
    Unshare {
        /// CONTAINER/OBJECT
        path: String,
    },

    /// Show or set the quota of the account or a container
    Quota {
        /// Container name; the account when omitted
        container: Option<String>,

        /// New quota
        #[arg(long, value_name = "BYTES")]
        set: Option<u64>,
    },

    /// Show or set the versioning policy of the account or a container
    Versioning {
        /// Container name; the account when omitted
        container: Option<String>,

        /// New policy (auto or none)
        #[arg(long, value_parser = parse_versioning)]
        set: Option<Versioning>,
    },

    /// List account groups, or define one
    Group {
        /// Group name
        name: Option<String>,

        /// Members of the group
        #[arg(requires = "name")]
        members: Vec<String>,
    },

    /// Delete an account group
    Ungroup {
        /// Group name
        name: String,
    },
}

pub async fn run(cmd: &FileCommand, session: &Session) -> Result<Completion> {
    let storage = session.storage().await?;
    let out = &session.out;

    match cmd {
        FileCommand::List {
            container: None, ..
        } => {
            let containers = storage.list_containers().await?;
            if containers.is_empty() {
                out.info("No containers found");
                return Ok(Completion::Success);
            }
            let rows: Vec<ContainerRow> = containers
                .into_iter()
                .map(|c| ContainerRow {
                    name: c.name,
                    count: c.count,
                    bytes: c.bytes,
                })
                .collect();
            out.print(&rows);
        }

        FileCommand::List {
            container: Some(container),
            prefix,
        } => {
            let objects = storage.list_objects(container, prefix.as_deref()).await?;
            if objects.is_empty() {
                out.info(&format!("No objects in {container}"));
                return Ok(Completion::Success);
            }
            let rows: Vec<ObjectRow> = objects
                .into_iter()
                .map(|o| ObjectRow {
                    name: o.name,
                    bytes: o.bytes,
                    content_type: or_dash(o.content_type),
                    last_modified: or_dash(o.last_modified),
                })
                .collect();
            out.print(&rows);
        }

        FileCommand::Mkdir { container } => {
            storage.create_container(container).await?;
            out.success(&format!("Container {container} created"));
        }

        FileCommand::Rmdir { container, wait } => {
            storage.delete_container(container).await?;
            out.success(&format!("Container {container} deleted"));
            if wait.wait {
                let source = MissingAs::new(storage, DELETED);
                let spec = WaitSpec::until(DELETED).with_timeout(timeout_arg(wait.timeout));
                return wait_for(session, &source, &[container.clone()], spec).await;
            }
        }

        FileCommand::Purge { container } => {
            storage.purge_container(container).await?;
            out.success(&format!("Container {container} purged"));
        }

        FileCommand::Info { path } => {
            let headers = match path.as_deref().map(split_path) {
                None => storage.account_info().await?,
                Some((container, None)) => storage.container_info(container).await?,
                Some((container, Some(object))) => storage.object_info(container, object).await?,
            };
            let pairs: Vec<(String, String)> = headers.into_iter().collect();
            out.print_kv(&pairs);
        }

        FileCommand::Upload { local, path } => {
            let (container, object) = split_path(path);
            let object = match object {
                Some(object) => object.to_string(),
                None => file_name(local)?,
            };
            let (mut file, size) = open_local(local).await?;
            let summary = storage
                .upload_object_from(container, &object, &mut file, size)
                .await?;
            out.success(&format!(
                "Uploaded {} bytes to {container}/{object} ({} of {} blocks sent)",
                summary.bytes, summary.uploaded_blocks, summary.blocks
            ));
        }

        FileCommand::Download { path, local } => {
            let (container, object) = object_path(path)?;
            let target = match local {
                Some(local) => local.clone(),
                None => PathBuf::from(object.rsplit('/').next().unwrap_or(object)),
            };
            let data = storage.download_object(container, object).await?;
            tokio::fs::write(&target, &data)
                .await
                .with_context(|| format!("Failed to write {}", target.display()))?;
            out.success(&format!(
                "Downloaded {} bytes to {}",
                data.len(),
                target.display()
            ));
        }

        FileCommand::Delete { path, wait } => {
            let (container, object) = object_path(path)?;
            storage.delete_object(container, object).await?;
            out.success(&format!("Object {path} deleted"));
            if wait.wait {
                let source = MissingAs::new(storage, DELETED);
                let spec = WaitSpec::until(DELETED).with_timeout(timeout_arg(wait.timeout));
                return wait_for(session, &source, &[path.clone()], spec).await;
            }
        }

        FileCommand::Publish { path } => {
            let (container, object) = object_path(path)?;
            match storage.publish_object(container, object).await? {
                Some(public) => out.success(&format!("Object {path} is public at {public}")),
                None => out.success(&format!("Object {path} is public")),
            }
        }

        FileCommand::Unpublish { path } => {
            let (container, object) = object_path(path)?;
            storage.unpublish_object(container, object).await?;
            out.success(&format!("Object {path} is private"));
        }

        FileCommand::Meta {
            path,
            entries,
            replace,
        } => {
            let meta = parse_pairs(entries)?;
            match split_path(path) {
                ("", _) => bail!("Expected CONTAINER or CONTAINER/OBJECT, got '{path}'"),
                (_, Some(_)) if *replace => bail!("--replace applies to containers only"),
                (container, Some(object)) => {
                    storage.set_object_meta(container, object, &meta).await?
                }
                (container, None) if *replace => {
                    storage.replace_container_meta(container, &meta).await?
                }
                (container, None) => storage.set_container_meta(container, &meta).await?,
            }
            out.success(&format!("Updated {} metadata entries on {path}", meta.len()));
        }

        FileCommand::Delmeta { container, key } => {
            storage.delete_container_meta(container, key).await?;
            out.success(&format!("Deleted {key} from {container}"));
        }

        FileCommand::Append { local, path } => {
            let (container, object) = object_path(path)?;
            let (mut file, size) = open_local(local).await?;
            storage
                .append_object(container, object, &mut file, size)
                .await?;
            out.success(&format!("Appended {size} bytes to {path}"));
        }

        FileCommand::Overwrite {
            local,
            path,
            start,
            end,
        } => {
            let (container, object) = object_path(path)?;
            let (mut file, _) = open_local(local).await?;
            let written = storage
                .overwrite_object(container, object, *start, *end, &mut file)
                .await?;
            out.success(&format!("Overwrote {written} bytes of {path}"));
        }

        FileCommand::Truncate { path, bytes } => {
            let (container, object) = object_path(path)?;
            storage.truncate_object(container, object, *bytes).await?;
            out.success(&format!("Truncated {path} to {bytes} bytes"));
        }

        FileCommand::Share { path, read, write } => {
            let (container, object) = object_path(path)?;
            if read.is_empty() && write.is_empty() {
                let sharing = storage.object_sharing(container, object).await?;
                out.print_kv(&sharing_rows(&sharing));
                return Ok(Completion::Success);
            }
            let sharing = Sharing {
                read: read.clone(),
                write: write.clone(),
            };
            storage.set_object_sharing(container, object, &sharing).await?;
            out.success(&format!("Object {path} shared: {}", sharing.header_value()));
        }

        FileCommand::Unshare { path } => {
            let (container, object) = object_path(path)?;
            storage.delete_object_sharing(container, object).await?;
            out.success(&format!("Object {path} is no longer shared"));
        }

        FileCommand::Quota { container, set } => {
            let target = container.as_deref().unwrap_or("account");
            match (container, set) {
                (None, Some(quota)) => storage.set_account_quota(*quota).await?,
                (Some(container), Some(quota)) => {
                    storage.set_container_quota(container, *quota).await?
                }
                (None, None) => {
                    print_policy(session, "Quota", storage.account_quota().await?);
                    return Ok(Completion::Success);
                }
                (Some(container), None) => {
                    print_policy(session, "Quota", storage.container_quota(container).await?);
                    return Ok(Completion::Success);
                }
            }
            out.success(&format!("Quota of {target} set"));
        }

        FileCommand::Versioning { container, set } => {
            let target = container.as_deref().unwrap_or("account");
            match (container, set) {
                (None, Some(policy)) => storage.set_account_versioning(*policy).await?,
                (Some(container), Some(policy)) => {
                    storage.set_container_versioning(container, *policy).await?
                }
                (None, None) => {
                    print_policy(session, "Versioning", storage.account_versioning().await?);
                    return Ok(Completion::Success);
                }
                (Some(container), None) => {
                    let policy = storage.container_versioning(container).await?;
                    print_policy(session, "Versioning", policy);
                    return Ok(Completion::Success);
                }
            }
            out.success(&format!("Versioning of {target} set"));
        }

        FileCommand::Group {
            name: Some(name),
            members,
        } if !members.is_empty() => {
            storage.set_account_group(name, members).await?;
            out.success(&format!("Group {name} set to {}", members.join(", ")));
        }

        FileCommand::Group { name, .. } => {
            let groups = storage.account_groups().await?;
            let pairs: Vec<(String, String)> = groups
                .into_iter()
                .filter(|(group, _)| name.as_ref().map_or(true, |n| n.eq_ignore_ascii_case(group)))
                .map(|(group, members)| (group, members.join(", ")))
                .collect();
            if pairs.is_empty() {
                out.info("No groups found");
                return Ok(Completion::Success);
            }
            out.print_kv(&pairs);
        }

        FileCommand::Ungroup { name } => {
            storage.delete_account_group(name).await?;
            out.success(&format!("Group {name} deleted"));
        }
    }

    Ok(Completion::Success)
}

/// `CONTAINER/OBJECT`, both parts required
fn object_path(path: &str) -> Result<(&str, &str)> {
    match split_path(path) {
        (container, Some(object)) if !container.is_empty() => Ok((container, object)),
        _ => bail!("Expected CONTAINER/OBJECT, got '{path}'"),
    }
}

async fn open_local(local: &Path) -> Result<(File, u64)> {
    let file = File::open(local)
        .await
        .with_context(|| format!("Failed to open {}", local.display()))?;
    let size = file
        .metadata()
        .await
        .with_context(|| format!("Failed to read {}", local.display()))?
        .len();
    Ok((file, size))
}

fn parse_versioning(value: &str) -> std::result::Result<Versioning, String> {
    value.parse().map_err(|e: ClientError| e.message)
}

fn sharing_rows(sharing: &Sharing) -> Vec<(String, String)> {
    let names = |list: &[String]| {
        if list.is_empty() {
            "-".to_string()
        } else {
            list.join(", ")
        }
    };
    vec![
        ("Read".to_string(), names(&sharing.read)),
        ("Write".to_string(), names(&sharing.write)),
    ]
}

fn print_policy(session: &Session, label: &str, value: Option<impl ToString>) {
    session.out.print_kv(&[(label.to_string(), or_dash(value))]);
}

fn file_name(local: &Path) -> Result<String> {
    local
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("Cannot derive an object name from {}", local.display()))
}
