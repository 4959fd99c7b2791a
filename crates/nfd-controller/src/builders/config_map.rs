//! nfd-worker ConfigMap

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use nfd_common::crd::NodeFeatureDiscovery;
use nfd_common::{Error, WORKER_NAME};

use super::common::{apply_labels, set_controller_reference};

/// Key holding the worker configuration file
pub const WORKER_CONFIG_KEY: &str = "nfd-worker-conf";

/// Populate the worker ConfigMap with `workerConfig.configData`, verbatim.
pub fn set_config_map_as_desired(
    nfd: &NodeFeatureDiscovery,
    cm: &mut ConfigMap,
) -> Result<(), Error> {
    apply_labels(&mut cm.metadata, WORKER_NAME);
    cm.data = Some(BTreeMap::from([(
        WORKER_CONFIG_KEY.to_string(),
        nfd.spec.worker_config.config_data.clone(),
    )]));
    set_controller_reference(nfd, &mut cm.metadata, "ConfigMap")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::tests::sample_nfd;

    #[test]
    fn config_data_is_copied_verbatim() {
        let mut nfd = sample_nfd();
        nfd.spec.worker_config.config_data = "not: [valid yaml".to_string();
        let mut cm = ConfigMap::default();
        set_config_map_as_desired(&nfd, &mut cm).unwrap();

        let data = cm.data.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[WORKER_CONFIG_KEY], "not: [valid yaml");
    }

    #[test]
    fn stale_keys_are_dropped() {
        let mut cm = ConfigMap {
            data: Some(BTreeMap::from([("old".to_string(), "x".to_string())])),
            ..Default::default()
        };
        set_config_map_as_desired(&sample_nfd(), &mut cm).unwrap();
        assert!(!cm.data.unwrap().contains_key("old"));
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let nfd = sample_nfd();
        let mut cm = ConfigMap::default();
        set_config_map_as_desired(&nfd, &mut cm).unwrap();
        let first = cm.clone();
        set_config_map_as_desired(&nfd, &mut cm).unwrap();
        assert_eq!(cm, first);
    }
}
