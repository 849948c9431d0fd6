//! Cache lifetime resolution for rendered content.

use std::collections::BTreeSet;
use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use crate::domain::{
    layout::ContentItem,
    ttl::{TtlPolicy, TtlTable},
};

const METRIC_TTL_RESOLVED: &str = "varnish_xkey_ttl_resolved_total";

/// Host hook that can force a lifetime for the current response.
///
/// Returning `Some(0)` is the same as returning `None`: resolution continues.
pub trait TtlOverride: Send + Sync {
    fn ttl_for(&self, item: Option<&ContentItem>) -> Option<u32>;
}

impl<F> TtlOverride for F
where
    F: Fn(Option<&ContentItem>) -> Option<u32> + Send + Sync,
{
    fn ttl_for(&self, item: Option<&ContentItem>) -> Option<u32> {
        self(item)
    }
}

#[derive(Clone)]
pub struct TtlResolver {
    table: Arc<TtlTable>,
    override_hook: Option<Arc<dyn TtlOverride>>,
}

impl TtlResolver {
    pub fn new(table: TtlTable) -> Self {
        Self {
            table: Arc::new(table),
            override_hook: None,
        }
    }

    pub fn with_override(mut self, hook: Arc<dyn TtlOverride>) -> Self {
        self.override_hook = Some(hook);
        self
    }

    pub fn table(&self) -> &TtlTable {
        &self.table
    }

    /// Lifetime in seconds for `item`; `0` means do not cache.
    pub fn resolve(&self, item: Option<&ContentItem>) -> u32 {
        let (ttl, source) = self.resolve_with_source(item);
        counter!(METRIC_TTL_RESOLVED, "source" => source).increment(1);
        debug!(
            target = "varnish_xkey::ttl",
            ttl,
            source,
            policy = %self.table.policy(),
            "Resolved cache lifetime"
        );
        ttl
    }

    fn resolve_with_source(&self, item: Option<&ContentItem>) -> (u32, &'static str) {
        if let Some(ttl) = self
            .override_hook
            .as_ref()
            .and_then(|hook| hook.ttl_for(item))
            .filter(|ttl| *ttl > 0)
        {
            return (ttl, "override");
        }

        let Some(item) = item else {
            return (self.table.default_ttl(), "default");
        };
        if item.is_protected() {
            return (0, "protected");
        }

        let resolved = match self.table.policy() {
            TtlPolicy::FirstMatch => first_match(&self.table, item),
            TtlPolicy::Minimum => minimum(&self.table, item),
        };
        match resolved {
            Some(ttl) => (ttl, "layout"),
            None => (self.table.default_ttl(), "default"),
        }
    }
}

/// Resolve with the given table and no override hook.
pub fn resolve_ttl(table: &TtlTable, item: Option<&ContentItem>) -> u32 {
    match item {
        None => table.default_ttl(),
        Some(item) if item.is_protected() => 0,
        Some(item) => match table.policy() {
            TtlPolicy::FirstMatch => first_match(table, item),
            TtlPolicy::Minimum => minimum(table, item),
        }
        .unwrap_or(table.default_ttl()),
    }
}

/// First block with a non-zero entry; an entry of `0` is treated as unset.
fn first_match(table: &TtlTable, item: &ContentItem) -> Option<u32> {
    item.leaves()
        .find_map(|node| table.ttl_for(node).filter(|ttl| *ttl > 0))
}

/// Shortest lifetime over every distinct layout key; keys without an entry
/// count as the default. `None` when no block has an entry.
fn minimum(table: &TtlTable, item: &ContentItem) -> Option<u32> {
    let keys: BTreeSet<String> = item.leaves().map(|node| table.layout_key(node)).collect();
    let known: Vec<u32> = keys.iter().filter_map(|key| table.lookup(key)).collect();
    let shortest = known.iter().copied().min()?;
    Some(shortest.min(table.default_ttl()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::layout::{LayoutKind, LayoutNode, Section, Tab};

    fn table() -> TtlTable {
        TtlTable::new(86_400)
            .with_layout("auto_focus", 14_400)
            .with_layout("auto_focus_random", 1_800)
            .with_layout("weather", 3_600)
            .with_layout("infolive", 600)
    }

    fn node(kind: LayoutKind) -> LayoutNode {
        LayoutNode::new(kind)
    }

    #[test]
    fn missing_item_uses_default() {
        assert_eq!(TtlResolver::new(table()).resolve(None), 86_400);
    }

    #[test]
    fn protected_item_is_never_cached() {
        let item = ContentItem::new(1_u64)
            .with_password("secret")
            .with_section(Section::new(vec![node(LayoutKind::Weather)]));
        assert_eq!(TtlResolver::new(table()).resolve(Some(&item)), 0);
    }

    #[test]
    fn single_weather_block_uses_its_entry() {
        let item = ContentItem::new(1_u64).with_section(Section::new(vec![node(LayoutKind::Weather)]));
        assert_eq!(TtlResolver::new(table()).resolve(Some(&item)), 3_600);
    }

    #[test]
    fn random_leaf_inside_tabs_wins_and_stops_the_walk() {
        let tabs = node(LayoutKind::TabsGroup).with_tab(Tab::new(vec![
            node(LayoutKind::AutoFocus).with_display_mode("random"),
        ]));
        let item = ContentItem::new(1_u64)
            .with_section(Section::new(vec![node(LayoutKind::Other("text".into())), tabs]))
            .with_section(Section::new(vec![node(LayoutKind::Infolive)]));

        assert_eq!(TtlResolver::new(table()).resolve(Some(&item)), 1_800);
    }

    #[test]
    fn zero_entry_does_not_stop_the_walk() {
        let table = table().with_layout("infolive", 0);
        let item = ContentItem::new(1_u64).with_section(Section::new(vec![
            node(LayoutKind::Infolive),
            node(LayoutKind::Weather),
        ]));
        assert_eq!(resolve_ttl(&table, Some(&item)), 3_600);

        let only_zero =
            ContentItem::new(2_u64).with_section(Section::new(vec![node(LayoutKind::Infolive)]));
        assert_eq!(resolve_ttl(&table, Some(&only_zero)), 86_400);
    }

    #[test]
    fn unknown_layouts_fall_through_to_default() {
        let item = ContentItem::new(1_u64)
            .with_section(Section::new(vec![node(LayoutKind::Other("gallery".into()))]));
        assert_eq!(TtlResolver::new(table()).resolve(Some(&item)), 86_400);
    }

    #[test]
    fn minimum_policy_takes_the_shortest_entry() {
        let item = ContentItem::new(1_u64).with_section(Section::new(vec![
            node(LayoutKind::Weather),
            node(LayoutKind::Other("gallery".into())),
            node(LayoutKind::Infolive),
        ]));
        let table = table().with_policy(TtlPolicy::Minimum);

        assert_eq!(TtlResolver::new(table.clone()).resolve(Some(&item)), 600);
        assert_eq!(resolve_ttl(&table, Some(&item)), 600);
    }

    #[test]
    fn minimum_policy_is_capped_by_default() {
        let table = TtlTable::new(300)
            .with_layout("weather", 3_600)
            .with_policy(TtlPolicy::Minimum);
        let item = ContentItem::new(1_u64).with_section(Section::new(vec![node(LayoutKind::Weather)]));
        assert_eq!(resolve_ttl(&table, Some(&item)), 300);
    }

    #[test]
    fn override_hook_supersedes_resolution() {
        let hook: Arc<dyn TtlOverride> = Arc::new(|_: Option<&ContentItem>| Some(42));
        let resolver = TtlResolver::new(table()).with_override(hook);
        let item = ContentItem::new(1_u64).with_password("secret");
        assert_eq!(resolver.resolve(Some(&item)), 42);
    }

    #[test]
    fn zero_from_override_hook_is_ignored() {
        let hook: Arc<dyn TtlOverride> = Arc::new(|_: Option<&ContentItem>| Some(0));
        let resolver = TtlResolver::new(table()).with_override(hook);
        assert_eq!(resolver.resolve(None), 86_400);
    }
}
