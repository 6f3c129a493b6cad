/// Dataset and variable registry for the GlorIA service.
///
/// Defines the Copernicus Marine datasets downloaded by this service, the
/// region each subset covers, and the canonical variable table that maps
/// source variable names (`thetao`, `VHM0`, ...) onto the names stored in the
/// observation table. This is the single source of truth for dataset ids —
/// other modules should reference datasets from here rather than hardcoding
/// them.

use crate::geodesy::BoundingBox;
use crate::model::{
    VAR_CURRENT_U, VAR_CURRENT_V, VAR_SALINITY, VAR_TEMPERATURE, VAR_WAVE_HEIGHT, VAR_WIND_SPEED,
};

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A canonical environmental variable and the source names that map onto it.
pub struct VariableSpec {
    /// Name stored in the observation table.
    pub name: &'static str,
    pub unit: &'static str,
    /// Names used by upstream products, checked in order.
    pub source_names: &'static [&'static str],
    /// Values outside `[min, max]` are discarded during import.
    pub valid_min: f64,
    pub valid_max: f64,
}

pub static VARIABLE_REGISTRY: &[VariableSpec] = &[
    VariableSpec {
        name: VAR_TEMPERATURE,
        unit: "degC",
        source_names: &["thetao", "bottomT", "temperatura", "temperature"],
        valid_min: -10.0,
        valid_max: 40.0,
    },
    VariableSpec {
        name: VAR_SALINITY,
        unit: "PSU",
        source_names: &["so", "salinidad", "salinity"],
        valid_min: 0.0,
        valid_max: 45.0,
    },
    VariableSpec {
        name: VAR_CURRENT_U,
        unit: "m/s",
        source_names: &["uo", "current_u"],
        valid_min: -5.0,
        valid_max: 5.0,
    },
    VariableSpec {
        name: VAR_CURRENT_V,
        unit: "m/s",
        source_names: &["vo", "current_v"],
        valid_min: -5.0,
        valid_max: 5.0,
    },
    VariableSpec {
        name: VAR_WAVE_HEIGHT,
        unit: "m",
        source_names: &["VHM0", "swh", "hs", "wave_height", "altura_olas", "significant_wave_height"],
        valid_min: 0.0,
        valid_max: 20.0,
    },
    VariableSpec {
        name: VAR_WIND_SPEED,
        unit: "m/s",
        source_names: &["wind_speed", "velocidad_viento"],
        valid_min: 0.0,
        valid_max: 80.0,
    },
];

/// Looks up a variable by its canonical name.
pub fn variable_spec(name: &str) -> Option<&'static VariableSpec> {
    VARIABLE_REGISTRY.iter().find(|v| v.name == name)
}

/// Maps an upstream variable name onto the canonical variable, if known.
pub fn canonical_variable(source_name: &str) -> Option<&'static VariableSpec> {
    VARIABLE_REGISTRY
        .iter()
        .find(|v| v.source_names.contains(&source_name))
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

/// Metadata for one downloadable product subset.
pub struct DatasetSpec {
    /// Copernicus Marine dataset id.
    pub id: &'static str,
    pub name: &'static str,
    /// Source variable names requested from the provider.
    pub variables: &'static [&'static str],
    pub bbox: BoundingBox,
    /// Depth slice in metres, if the product is 4-D.
    pub depth_range: Option<(f64, f64)>,
}

const ALICANTE_COAST: BoundingBox = BoundingBox {
    min_lon: -1.5,
    max_lon: 0.7,
    min_lat: 37.5,
    max_lat: 40.5,
};

const SURFACE_LAYER: (f64, f64) = (1.0182366371154785, 1.0182366371154785);

/// Datasets downloaded by `download_datasets`, physics first.
///
/// Sources:
///   - Dataset ids: Copernicus Marine Service product catalogue (MEDSEA)
pub static DATASET_REGISTRY: &[DatasetSpec] = &[
    DatasetSpec {
        id: "cmems_mod_med_phy-cur_anfc_4.2km_P1D-m",
        name: "Mediterranean currents",
        variables: &["uo", "vo"],
        bbox: ALICANTE_COAST,
        depth_range: Some(SURFACE_LAYER),
    },
    DatasetSpec {
        id: "cmems_mod_med_phy-tem_anfc_4.2km_P1D-m",
        name: "Mediterranean temperature",
        variables: &["thetao"],
        bbox: ALICANTE_COAST,
        depth_range: Some(SURFACE_LAYER),
    },
    DatasetSpec {
        id: "cmems_mod_med_phy-sal_anfc_4.2km_P1D-m",
        name: "Mediterranean salinity",
        variables: &["so"],
        bbox: ALICANTE_COAST,
        depth_range: Some(SURFACE_LAYER),
    },
    DatasetSpec {
        id: "cmems_mod_med_wav_anfc_4.2km_PT1H-i",
        name: "Mediterranean waves",
        variables: &["VHM0"],
        bbox: ALICANTE_COAST,
        depth_range: None,
    },
];

/// Looks up a dataset by id. Returns `None` if not found.
pub fn find_dataset(id: &str) -> Option<&'static DatasetSpec> {
    DATASET_REGISTRY.iter().find(|d| d.id == id)
}

/// Returns the ids of datasets that provide the given canonical variable.
pub fn datasets_with_variable(canonical: &str) -> Vec<&'static str> {
    DATASET_REGISTRY
        .iter()
        .filter(|d| {
            d.variables
                .iter()
                .any(|v| canonical_variable(v).map(|spec| spec.name == canonical).unwrap_or(false))
        })
        .map(|d| d.id)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_duplicate_dataset_ids() {
        let mut seen = std::collections::HashSet::new();
        for dataset in DATASET_REGISTRY {
            assert!(
                seen.insert(dataset.id),
                "duplicate dataset id '{}' found in DATASET_REGISTRY",
                dataset.id
            );
        }
    }

    #[test]
    fn test_every_dataset_variable_has_a_canonical_name() {
        // An unmapped variable would be downloaded and then silently dropped
        // by the importer.
        for dataset in DATASET_REGISTRY {
            assert!(!dataset.variables.is_empty(), "'{}' requests no variables", dataset.id);
            for var in dataset.variables {
                assert!(
                    canonical_variable(var).is_some(),
                    "variable '{}' of '{}' has no canonical mapping",
                    var,
                    dataset.id
                );
            }
        }
    }

    #[test]
    fn test_bounding_boxes_are_ordered() {
        for dataset in DATASET_REGISTRY {
            assert!(dataset.bbox.min_lon < dataset.bbox.max_lon, "lon order for '{}'", dataset.id);
            assert!(dataset.bbox.min_lat < dataset.bbox.max_lat, "lat order for '{}'", dataset.id);
            if let Some((lo, hi)) = dataset.depth_range {
                assert!(lo <= hi, "depth order for '{}'", dataset.id);
            }
        }
    }

    #[test]
    fn test_source_names_are_unique_across_variables() {
        let mut seen = std::collections::HashSet::new();
        for spec in VARIABLE_REGISTRY {
            for source in spec.source_names {
                assert!(seen.insert(*source), "source name '{}' maps to two variables", source);
            }
        }
    }

    #[test]
    fn test_valid_ranges_are_ordered() {
        for spec in VARIABLE_REGISTRY {
            assert!(spec.valid_min < spec.valid_max, "range for '{}'", spec.name);
        }
    }

    #[test]
    fn test_canonical_variable_lookup() {
        assert_eq!(canonical_variable("VHM0").map(|v| v.name), Some(VAR_WAVE_HEIGHT));
        assert_eq!(canonical_variable("bottomT").map(|v| v.name), Some(VAR_TEMPERATURE));
        assert_eq!(canonical_variable("uo").map(|v| v.name), Some(VAR_CURRENT_U));
        assert!(canonical_variable("chl").is_none());
    }

    #[test]
    fn test_datasets_with_variable_filters_correctly() {
        let wave = datasets_with_variable(VAR_WAVE_HEIGHT);
        assert_eq!(wave, vec!["cmems_mod_med_wav_anfc_4.2km_PT1H-i"]);
        let current = datasets_with_variable(VAR_CURRENT_V);
        assert_eq!(current, vec!["cmems_mod_med_phy-cur_anfc_4.2km_P1D-m"]);
        assert!(find_dataset("does-not-exist").is_none());
    }
}
