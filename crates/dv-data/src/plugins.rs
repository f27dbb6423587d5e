//! Binding of plugin ids to the adapters in this crate

use dv_core::registry::{FileFactory, Registry, RegistryEntry};
use dv_core::RtiError;
use tracing::{info, warn};

use crate::config::RegistryConfig;
use crate::{arrow_io, exdir, image_io, json_io, numpy, table, wav_io};

fn unavailable(plugin: &str, reason: &str) -> RtiError {
    RtiError::PluginUnavailable {
        plugin: plugin.to_string(),
        reason: reason.to_string(),
    }
}

fn not_compiled(plugin: &str, feature: &str) -> RtiError {
    unavailable(plugin, &format!("built without the '{feature}' feature"))
}

/// The factory for a plugin id. Unknown ids and adapters left out of the
/// build are reported as unavailable.
pub fn plugin_factory(plugin: &str) -> Result<FileFactory, RtiError> {
    let factory: FileFactory = match plugin {
        "numpy-binary" => numpy::create_numpy_binary,
        "numpy-compressed" => numpy::create_numpy_compressed,
        "numpy-text" => numpy::create_numpy_text,
        "csv" => table::create_csv_table,
        "arrow" => arrow_io::create_arrow_file,
        "parquet" => arrow_io::create_parquet_file,
        "image" => image_io::create_image_file,
        "wav" => wav_io::create_wav_file,
        "json" => json_io::create_json_file,
        "exdir" => exdir::create_exdir_file,

        #[cfg(feature = "matlab")]
        "matlab" => crate::matlab::create_matlab_file,
        #[cfg(not(feature = "matlab"))]
        "matlab" => return Err(not_compiled(plugin, "matlab")),

        #[cfg(feature = "hdf5")]
        "hdf5" => crate::hdf5_io::create_hdf5_file,
        #[cfg(not(feature = "hdf5"))]
        "hdf5" => return Err(not_compiled(plugin, "hdf5")),

        #[cfg(feature = "netcdf")]
        "netcdf" => crate::netcdf_io::create_netcdf_file,
        #[cfg(not(feature = "netcdf"))]
        "netcdf" => return Err(not_compiled(plugin, "netcdf")),

        other => return Err(unavailable(other, "unknown plugin")),
    };
    Ok(factory)
}

/// Build a registry from configuration rows, keeping their order
pub fn registry_from_config(config: &RegistryConfig) -> Result<Registry, RtiError> {
    let mut registry = Registry::new();
    for row in &config.entries {
        let factory = plugin_factory(&row.plugin);
        if let Err(e) = &factory {
            warn!("Registry entry {} is unavailable: {}", row.name, e);
        }
        registry.register(RegistryEntry::new(row.name.as_str(), row.plugin.as_str(), &row.globs, factory)?);
    }
    info!(
        "Registry has {} entries, {} available",
        registry.entries().len(),
        registry.entries().iter().filter(|entry| entry.is_available()).count()
    );
    Ok(registry)
}

/// The built-in file type table
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    for row in &RegistryConfig::default().entries {
        match RegistryEntry::new(row.name.as_str(), row.plugin.as_str(), &row.globs, plugin_factory(&row.plugin)) {
            Ok(entry) => registry.register(entry),
            Err(e) => warn!("Skipping registry entry {}: {}", row.name, e),
        }
    }
    registry
}
