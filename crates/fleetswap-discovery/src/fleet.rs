//! Fleet role resolution and promotion.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fleetswap_core::GroupDescriptor;
use fleetswap_provider::GroupCatalog;

use crate::error::{DiscoveryError, DiscoveryResult};

/// Tag key carrying a group's deployment role.
pub const STATE_TAG: &str = "fleet-state";

/// A group's place in the blue-green rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FleetRole {
    /// Provisioned and awaiting promotion.
    Pre,
    /// Serving production traffic.
    Live,
    /// Retired, awaiting teardown.
    Post,
}

impl FleetRole {
    pub fn tag_value(self) -> &'static str {
        match self {
            FleetRole::Pre => "pre",
            FleetRole::Live => "live",
            FleetRole::Post => "post",
        }
    }

    pub fn from_tag_value(value: &str) -> Option<Self> {
        match value {
            "pre" => Some(FleetRole::Pre),
            "live" => Some(FleetRole::Live),
            "post" => Some(FleetRole::Post),
            _ => None,
        }
    }
}

impl fmt::Display for FleetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_value())
    }
}

/// The groups participating in one service's rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fleet {
    /// The group to promote. Required — a cutover needs a candidate.
    pub pre: GroupDescriptor,
    /// The group currently serving, absent on a first deployment.
    pub live: Option<GroupDescriptor>,
    /// A previously retired group, if one is still around.
    pub post: Option<GroupDescriptor>,
}

/// Groups whose tags contain every pair in `filter`, ordered by id.
pub async fn find_groups_by_tags<C: GroupCatalog>(
    catalog: &C,
    filter: &BTreeMap<String, String>,
) -> DiscoveryResult<Vec<GroupDescriptor>> {
    let mut groups: Vec<GroupDescriptor> = catalog
        .list_groups()
        .await?
        .into_iter()
        .filter(|g| g.tags_match(filter))
        .collect();
    groups.sort_by(|a, b| a.id.cmp(&b.id));

    debug!(matched = groups.len(), "tag filter applied");
    Ok(groups)
}

/// Resolve the pre/live/post rotation among groups matching
/// `base_filter` (e.g. a service tag).
///
/// Exactly one `pre` group is required; `live` and `post` are optional
/// but must be unique when present. Groups without a recognized
/// `fleet-state` tag are ignored.
pub async fn resolve_fleet<C: GroupCatalog>(
    catalog: &C,
    base_filter: &BTreeMap<String, String>,
) -> DiscoveryResult<Fleet> {
    let groups = find_groups_by_tags(catalog, base_filter).await?;

    let mut pre = Vec::new();
    let mut live = Vec::new();
    let mut post = Vec::new();

    for group in groups {
        let role = group
            .tags
            .get(STATE_TAG)
            .and_then(|v| FleetRole::from_tag_value(v));
        match role {
            Some(FleetRole::Pre) => pre.push(group),
            Some(FleetRole::Live) => live.push(group),
            Some(FleetRole::Post) => post.push(group),
            None => debug!(group = %group.id, "no fleet-state tag, ignoring"),
        }
    }

    let pre = unique(pre, FleetRole::Pre)?.ok_or(DiscoveryError::MissingRole {
        role: FleetRole::Pre,
    })?;
    let live = unique(live, FleetRole::Live)?;
    let post = unique(post, FleetRole::Post)?;

    Ok(Fleet { pre, live, post })
}

/// Rewrite roles after a successful cutover: the old live group becomes
/// `post`, then the promoted group becomes `live`.
///
/// Demotion runs first — if the second write is lost, the rotation has
/// no `live` group rather than two, and re-resolving stays unambiguous.
pub async fn promote<C: GroupCatalog>(catalog: &C, fleet: &Fleet) -> DiscoveryResult<()> {
    if let Some(live) = &fleet.live {
        catalog
            .set_tags(
                &live.id,
                &[(STATE_TAG.to_string(), FleetRole::Post.tag_value().to_string())],
            )
            .await?;
        info!(group = %live.id, "demoted to post");
    }

    catalog
        .set_tags(
            &fleet.pre.id,
            &[(STATE_TAG.to_string(), FleetRole::Live.tag_value().to_string())],
        )
        .await?;
    info!(group = %fleet.pre.id, "promoted to live");

    Ok(())
}

fn unique(
    mut groups: Vec<GroupDescriptor>,
    role: FleetRole,
) -> DiscoveryResult<Option<GroupDescriptor>> {
    match groups.len() {
        0 => Ok(None),
        1 => Ok(Some(groups.remove(0))),
        _ => Err(DiscoveryError::AmbiguousRole {
            role,
            ids: groups.into_iter().map(|g| g.id).collect(),
        }),
    }
}
