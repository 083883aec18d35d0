// Registry of gauge implementations collected at link time.
use crate::panels::gauges::gauge::Gauge;
use crate::settings::{SettingSpec, Settings};
use std::time::Instant;

pub type GaugeValidator = fn(&Settings) -> Result<(), String>;
pub type GaugeFactory = fn(Instant) -> Box<dyn Gauge>;

/// Static metadata for a gauge implementation.
pub struct GaugeSpec {
    pub id: &'static str,
    pub description: &'static str,
    pub default_enabled: bool,
    pub settings: fn() -> &'static [SettingSpec],
    pub create: GaugeFactory,
    pub validate: Option<GaugeValidator>,
}

inventory::collect!(GaugeSpec);

pub fn all() -> impl Iterator<Item = &'static GaugeSpec> {
    inventory::iter::<GaugeSpec>.into_iter()
}

pub fn find(id: &str) -> Option<&'static GaugeSpec> {
    all().find(|spec| spec.id == id)
}

/// Instantiate a gauge by id. Unknown ids are logged and skipped.
pub fn create_gauge(id: &str, now: Instant) -> Option<Box<dyn Gauge>> {
    match find(id) {
        Some(spec) => Some((spec.create)(now)),
        None => {
            log::warn!("Unknown gauge '{id}' ignored");
            None
        }
    }
}

/// Build the default gauges list based on registry metadata.
pub fn default_gauges() -> &'static str {
    use std::sync::OnceLock;

    static DEFAULT_GAUGES: OnceLock<&'static str> = OnceLock::new();
    DEFAULT_GAUGES.get_or_init(|| {
        let mut ids: Vec<&'static str> = all()
            .filter(|spec| spec.default_enabled)
            .map(|spec| spec.id)
            .collect();
        ids.sort();
        let joined = ids.join(",");
        Box::leak(joined.into_boxed_str())
    })
}

pub fn collect_settings(base: &[SettingSpec]) -> Vec<SettingSpec> {
    let mut specs = base.to_vec();
    for spec in all() {
        specs.extend_from_slice((spec.settings)());
    }
    specs
}

pub fn list_settings(base: &[SettingSpec]) {
    for spec in base {
        println!("{}:{}", spec.key, spec.default);
    }
    let mut gauges: Vec<&'static GaugeSpec> = all().collect();
    gauges.sort_by_key(|spec| spec.id);
    for gauge in gauges {
        for spec in (gauge.settings)() {
            println!("{}:{}", spec.key, spec.default);
        }
    }
}

pub fn list_gauges() {
    let mut gauges: Vec<&'static GaugeSpec> = all().collect();
    gauges.sort_by_key(|spec| spec.id);
    for gauge in gauges {
        println!("{}: {}", gauge.id, gauge.description);
    }
}

pub fn validate_settings(settings: &Settings) -> Result<(), String> {
    for spec in all() {
        if let Some(validate) = spec.validate {
            validate(settings).map_err(|err| format!("Gauge '{}': {err}", spec.id))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn gauge_ids_are_unique() {
        let mut seen = HashSet::new();
        for spec in all() {
            assert!(seen.insert(spec.id), "duplicate gauge id '{}'", spec.id);
        }
    }

    #[test]
    fn gauge_setting_keys_are_namespaced_by_id() {
        for spec in all() {
            let prefix = format!("halcyon.gauge.{}.", spec.id);
            for setting in (spec.settings)() {
                assert!(
                    setting.key.starts_with(&prefix),
                    "setting '{}' should start with '{prefix}'",
                    setting.key
                );
            }
        }
    }

    #[test]
    fn unknown_gauge_is_not_created() {
        assert!(create_gauge("does-not-exist", Instant::now()).is_none());
    }

    #[test]
    fn default_gauges_are_sorted() {
        let ids: Vec<&str> = default_gauges().split(',').filter(|id| !id.is_empty()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
