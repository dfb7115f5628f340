pub mod resolve_config;
pub mod run;
pub mod terminate;

use std::error::Error;

use dias_batch::{Config, VersionResolver};
use dias_core::{ContainerId, FileRef, Location, ObjectStore};

use crate::settings::Settings;

/// Loads `explicit` when given, otherwise resolves the newest config for
/// `assay` at its configured location.
pub(crate) fn load_config<S: ObjectStore + ?Sized>(
    store: &S,
    settings: &Settings,
    explicit: Option<&str>,
    assay: Option<&str>,
    default_container: Option<&ContainerId>,
) -> Result<Config, Box<dyn Error>> {
    let resolver = VersionResolver::new(store);
    if let Some(raw) = explicit {
        return Ok(resolver.load_explicit(&FileRef::parse(raw)?)?);
    }
    let Some(assay) = assay else {
        return Err("either --assay or --config is required".into());
    };
    let Some(raw_location) = settings.config_location_for(assay) else {
        return Err(format!(
            "no config location for assay {assay}; set config_location in the settings file"
        )
        .into());
    };
    let location = Location::parse(raw_location, default_container)?;
    Ok(resolver.resolve(&location, assay)?)
}
