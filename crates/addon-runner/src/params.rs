//! Override parameter resolution

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use addon_common::crd::Addon;
use addon_common::{Error, Result};

/// Prefix marking a parameter whose value is base64-encoded on the wire
const BASE64_PREFIX: &str = "base64Enc";

/// Build the render-parameter map from an Addon's overrides.
///
/// Order-preserving: later overrides of the same name win. Values of
/// parameters whose name carries the `base64Enc` prefix are decoded.
pub fn resolve_override_params(addon: &Addon) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for p in &addon.spec.r#override.params {
        let value = if p.name.starts_with(BASE64_PREFIX) {
            let bytes = STANDARD.decode(&p.value).map_err(|e| {
                Error::serialization(format!("decoding param {}: {e}", p.name))
            })?;
            String::from_utf8(bytes).map_err(|e| {
                Error::serialization(format!("decoding param {}: {e}", p.name))
            })?
        } else {
            p.value.clone()
        };
        debug!(name = %p.name, "adding override param");
        params.insert(p.name.clone(), value);
    }
    Ok(params)
}
