use crate::bar::{BarState, Message, Panel};
use crate::panels::gauges::gauge_registry;
use crate::settings::{SettingSpec, Settings, split_list};
use iced::Subscription;
use log::warn;
use std::collections::HashSet;

pub type PanelValidator = fn(&Settings) -> Result<(), String>;
pub type PanelView = for<'a> fn(&'a BarState) -> Panel<'a>;
pub type PanelSubscriptionFactory = fn() -> Subscription<Message>;

/// Static metadata and hooks for one panel implementation.
pub struct PanelSpec {
    /// Stable panel id used in `halcyon.bar.{left,center,right}`.
    pub id: &'static str,
    /// Human-readable description shown in `--list-panels`.
    pub description: &'static str,
    /// Panel-specific settings metadata.
    pub settings: fn() -> &'static [SettingSpec],
    /// Panel render function.
    pub view: PanelView,
    /// Optional panel-owned subscription provider, started only while the panel is placed.
    pub subscription: Option<PanelSubscriptionFactory>,
    /// Optional panel settings validator.
    pub validate: Option<PanelValidator>,
}

inventory::collect!(PanelSpec);

/// One entry of a bar section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarItem {
    Panel(&'static str),
    Gauge(&'static str),
}

/// Section layout of the bar, left to right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarLayout {
    pub left: Vec<BarItem>,
    pub center: Vec<BarItem>,
    pub right: Vec<BarItem>,
}

impl BarLayout {
    /// Parse the three section lists. An item appears at most once across all sections.
    pub fn from_sections(left: &str, center: &str, right: &str) -> Self {
        let mut seen = HashSet::new();
        Self {
            left: items_from_setting(left, &mut seen),
            center: items_from_setting(center, &mut seen),
            right: items_from_setting(right, &mut seen),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::from_sections(
            &settings.get_or("halcyon.bar.left", ""),
            &settings.get_or("halcyon.bar.center", ""),
            &settings.get_or("halcyon.bar.right", ""),
        )
    }

    pub fn items(&self) -> impl Iterator<Item = BarItem> + '_ {
        self.left
            .iter()
            .chain(&self.center)
            .chain(&self.right)
            .copied()
    }

    /// Gauge ids in layout order, for the scheduler.
    pub fn gauge_ids(&self) -> Vec<String> {
        self.items()
            .filter_map(|item| match item {
                BarItem::Gauge(id) => Some(id.to_string()),
                BarItem::Panel(_) => None,
            })
            .collect()
    }

    pub fn panel_ids(&self) -> Vec<&'static str> {
        self.items()
            .filter_map(|item| match item {
                BarItem::Panel(id) => Some(id),
                BarItem::Gauge(_) => None,
            })
            .collect()
    }
}

/// Resolve an id against panels first, then gauges.
pub fn resolve_item(id: &str) -> Option<BarItem> {
    if let Some(spec) = find(id) {
        return Some(BarItem::Panel(spec.id));
    }
    gauge_registry::find(id).map(|spec| BarItem::Gauge(spec.id))
}

fn items_from_setting(setting: &str, seen: &mut HashSet<BarItem>) -> Vec<BarItem> {
    let mut ordered = Vec::new();
    for id in split_list(setting) {
        let Some(item) = resolve_item(&id) else {
            warn!("Unknown bar item '{id}' ignored");
            continue;
        };
        if seen.insert(item) {
            ordered.push(item);
        }
    }
    ordered
}

pub fn all() -> impl Iterator<Item = &'static PanelSpec> {
    inventory::iter::<PanelSpec>.into_iter()
}

pub fn find(id: &str) -> Option<&'static PanelSpec> {
    inventory::iter::<PanelSpec>
        .into_iter()
        .find(|spec| spec.id == id)
}

pub fn collect_settings(base: &[SettingSpec]) -> Vec<SettingSpec> {
    let mut specs = base.to_vec();
    let mut panels: Vec<&'static PanelSpec> = all().collect();
    panels.sort_by_key(|spec| spec.id);
    for panel in panels {
        specs.extend_from_slice((panel.settings)());
    }
    specs
}

pub fn validate_settings(settings: &Settings) -> Result<(), String> {
    for panel in all() {
        if let Some(validate) = panel.validate {
            validate(settings).map_err(|err| format!("Panel '{}': {err}", panel.id))?;
        }
    }
    Ok(())
}

pub fn list_panels() {
    let mut panels: Vec<&'static PanelSpec> = all().collect();
    panels.sort_by_key(|spec| spec.id);
    for panel in panels {
        println!("{}: {}", panel.id, panel.description);
    }
}

/// Subscriptions of the placed panels. Panels sharing a factory share one subscription.
pub fn subscriptions_for_layout(layout: &BarLayout) -> Vec<Subscription<Message>> {
    let mut factories: Vec<PanelSubscriptionFactory> = Vec::new();
    for id in layout.panel_ids() {
        let Some(factory) = find(id).and_then(|spec| spec.subscription) else {
            continue;
        };
        if !factories.iter().any(|known| std::ptr::fn_addr_eq(*known, factory)) {
            factories.push(factory);
        }
    }
    factories.into_iter().map(|factory| factory()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_ids_are_unique_and_do_not_shadow_gauges() {
        let mut seen = HashSet::new();
        for spec in all() {
            assert!(seen.insert(spec.id), "duplicate panel id '{}'", spec.id);
            assert!(
                gauge_registry::find(spec.id).is_none(),
                "panel id '{}' collides with a gauge",
                spec.id
            );
        }
    }

    #[test]
    fn layout_mixes_panels_and_gauges_without_duplicates() {
        let layout = BarLayout::from_sections(
            "workspaces, window,workspaces",
            "clock,bogus",
            "cpu,clock,control_center",
        );
        assert_eq!(
            layout.left,
            vec![BarItem::Panel("workspaces"), BarItem::Panel("window")]
        );
        assert_eq!(layout.center, vec![BarItem::Gauge("clock")]);
        assert_eq!(
            layout.right,
            vec![BarItem::Gauge("cpu"), BarItem::Panel("control_center")]
        );
        assert_eq!(layout.gauge_ids(), vec!["clock".to_string(), "cpu".to_string()]);
    }

    #[test]
    fn workspace_and_window_panels_share_one_subscription() {
        let layout = BarLayout::from_sections("workspaces,window", "", "control_center");
        assert_eq!(subscriptions_for_layout(&layout).len(), 1);
        assert!(subscriptions_for_layout(&BarLayout::default()).is_empty());

        let with_tray = BarLayout::from_sections("workspaces,window", "", "tray,control_center");
        assert_eq!(subscriptions_for_layout(&with_tray).len(), 2);
    }
}
