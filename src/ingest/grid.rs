//! Gridded dataset access.
//!
//! Readers expose a file as named variables with dimension names, a shape
//! and row-major values unpacked to `f64` (scale/offset applied, fill values
//! turned into NaN). `MemoryGrid` backs tests and synthetic inputs; the
//! NetCDF reader lives behind the `netcdf` cargo feature.

use std::collections::HashMap;
use std::fmt;

pub const TIME_AXIS: &[&str] = &["time", "valid_time"];
pub const DEPTH_AXIS: &[&str] = &["depth", "deptht", "lev"];
pub const LAT_AXIS: &[&str] = &["latitude", "lat", "nav_lat"];
pub const LON_AXIS: &[&str] = &["longitude", "lon", "nav_lon"];

#[derive(Debug, Clone, PartialEq)]
pub enum GridError {
    /// The file could not be opened or read.
    Io(String),
    MissingAxis(&'static str),
    MissingVariable(String),
    ShapeMismatch(String),
    /// None of the file's variables maps onto a known canonical variable.
    NoImportableVariable,
    BadTimeUnits(String),
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::Io(msg) => write!(f, "Read error: {}", msg),
            GridError::MissingAxis(axis) => write!(f, "Missing axis: {}", axis),
            GridError::MissingVariable(name) => write!(f, "Missing variable: {}", name),
            GridError::ShapeMismatch(msg) => write!(f, "Shape mismatch: {}", msg),
            GridError::NoImportableVariable => write!(f, "No importable variable in file"),
            GridError::BadTimeUnits(units) => write!(f, "Unrecognised time units: '{}'", units),
        }
    }
}

impl std::error::Error for GridError {}

/// One variable read in full.
#[derive(Debug, Clone, PartialEq)]
pub struct GridVariable {
    pub name: String,
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
    /// Row-major, missing values as NaN.
    pub values: Vec<f64>,
    pub units: Option<String>,
}

impl GridVariable {
    pub fn new(name: &str, dimensions: &[&str], shape: &[usize], values: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            shape: shape.to_vec(),
            values,
            units: None,
        }
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    /// Checks that `values` holds exactly `product(shape)` elements.
    pub fn check_shape(&self) -> Result<(), GridError> {
        let expected: usize = self.shape.iter().product();
        if self.dimensions.len() != self.shape.len() || self.values.len() != expected {
            return Err(GridError::ShapeMismatch(format!(
                "{}: {} dims, shape {:?}, {} values",
                self.name,
                self.dimensions.len(),
                self.shape,
                self.values.len()
            )));
        }
        Ok(())
    }
}

/// Read access to a gridded file.
pub trait GriddedDataset {
    fn variable_names(&self) -> Vec<String>;

    fn read_variable(&self, name: &str) -> Result<GridVariable, GridError>;

    /// A string attribute of `variable`, or a global attribute when
    /// `variable` is `None`.
    fn attribute(&self, variable: Option<&str>, name: &str) -> Option<String>;
}

/// First variable in the file named by one of `aliases`.
pub fn resolve_axis<D: GriddedDataset + ?Sized>(dataset: &D, aliases: &[&str]) -> Option<String> {
    let names = dataset.variable_names();
    aliases
        .iter()
        .find(|alias| names.iter().any(|n| n == *alias))
        .map(|alias| alias.to_string())
}

/// Reads the 1-D coordinate variable named by one of `aliases`.
pub fn read_axis<D: GriddedDataset + ?Sized>(
    grid: &D,
    aliases: &[&str],
    label: &'static str,
) -> Result<GridVariable, GridError> {
    let name = resolve_axis(grid, aliases).ok_or(GridError::MissingAxis(label))?;
    let axis = grid.read_variable(&name)?;
    if axis.shape.len() != 1 {
        return Err(GridError::ShapeMismatch(format!(
            "axis {} must be 1-D, got shape {:?}",
            name, axis.shape
        )));
    }
    Ok(axis)
}

/// A gridded dataset held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryGrid {
    variables: Vec<GridVariable>,
    attributes: HashMap<(Option<String>, String), String>,
}

impl MemoryGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_variable(&mut self, variable: GridVariable) -> Result<(), GridError> {
        variable.check_shape()?;
        if let Some(units) = &variable.units {
            self.attributes
                .insert((Some(variable.name.clone()), "units".to_string()), units.clone());
        }
        self.variables.retain(|v| v.name != variable.name);
        self.variables.push(variable);
        Ok(())
    }

    pub fn set_attribute(&mut self, variable: Option<&str>, name: &str, value: &str) {
        self.attributes
            .insert((variable.map(String::from), name.to_string()), value.to_string());
    }
}

impl GriddedDataset for MemoryGrid {
    fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    fn read_variable(&self, name: &str) -> Result<GridVariable, GridError> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .cloned()
            .ok_or_else(|| GridError::MissingVariable(name.to_string()))
    }

    fn attribute(&self, variable: Option<&str>, name: &str) -> Option<String> {
        self.attributes
            .get(&(variable.map(String::from), name.to_string()))
            .cloned()
    }
}
