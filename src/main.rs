//! Group configuration checker
//!
//! Loads a JSON array of group definitions, builds every group and prints
//! its status. Exits with an error on the first invalid definition.
//!
//! Groups are built without providers, so this validates definitions only:
//! every selecting group reports the `COMPATIBLE` placeholder as its proxy.

use std::env;

use tracing::{error, info};

use outbound_groups::config::{get_env_or, Config, GroupConfig};
use outbound_groups::error::{GroupError, Result};
use outbound_groups::{build_group, observability, GroupStatus};

/// Build each group in `raw` and collect its name and status
async fn check_groups(raw: &str) -> Result<Vec<(String, GroupStatus)>> {
    let groups: Vec<GroupConfig> = serde_json::from_str(raw)?;
    if groups.is_empty() {
        return Err(GroupError::InvalidConfig("no groups defined".to_string()));
    }

    let mut statuses = Vec::with_capacity(groups.len());
    for group_config in &groups {
        let group = match build_group(group_config, Vec::new()) {
            Ok(group) => group,
            Err(e) => {
                error!(group = %group_config.name, "Invalid group: {}", e);
                return Err(e);
            }
        };

        statuses.push((group.name().to_string(), group.status().await));
        group.close();
    }
    Ok(statuses)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    observability::init_tracing(&config.log);

    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| get_env_or("GROUPS_FILE", "groups.json"));
    info!(path = %path, "Loading group definitions");

    let raw = tokio::fs::read_to_string(&path).await?;
    let statuses = check_groups(&raw).await?;
    for (name, status) in &statuses {
        println!("{}: {}", name, serde_json::to_string(status)?);
    }

    info!(groups = statuses.len(), "All groups valid");
    Ok(())
}
