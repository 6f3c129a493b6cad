//! NetCDF access for downloaded grids.
//!
//! Values are unpacked on read: `_FillValue` / `missing_value` become NaN,
//! then `scale_factor` and `add_offset` are applied.

use std::path::Path;

use netcdf::AttributeValue;

use super::grid::{GridError, GridVariable, GriddedDataset};

pub struct NetcdfGrid {
    file: netcdf::File,
}

impl NetcdfGrid {
    pub fn open(path: &Path) -> Result<Self, GridError> {
        let file = netcdf::open(path).map_err(|e| GridError::Io(format!("{}: {}", path.display(), e)))?;
        Ok(Self { file })
    }
}

/// Opens a path as a boxed grid, for `import_directory`.
pub fn open_boxed(path: &Path) -> Result<Box<dyn GriddedDataset>, GridError> {
    Ok(Box::new(NetcdfGrid::open(path)?))
}

fn attribute_number(value: &AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Double(v) => Some(*v),
        AttributeValue::Float(v) => Some(f64::from(*v)),
        AttributeValue::Int(v) => Some(f64::from(*v)),
        AttributeValue::Short(v) => Some(f64::from(*v)),
        AttributeValue::Schar(v) => Some(f64::from(*v)),
        AttributeValue::Uchar(v) => Some(f64::from(*v)),
        AttributeValue::Ushort(v) => Some(f64::from(*v)),
        AttributeValue::Uint(v) => Some(f64::from(*v)),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Floats(v) => v.first().map(|f| f64::from(*f)),
        AttributeValue::Ints(v) => v.first().map(|i| f64::from(*i)),
        AttributeValue::Shorts(v) => v.first().map(|s| f64::from(*s)),
        _ => None,
    }
}

fn attribute_text(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::Str(s) => Some(s.clone()),
        AttributeValue::Strs(v) => Some(v.join(" ")),
        other => attribute_number(other).map(|n| n.to_string()),
    }
}

fn variable_number(var: &netcdf::Variable, name: &str) -> Option<f64> {
    var.attribute(name)
        .and_then(|a| a.value().ok())
        .and_then(|v| attribute_number(&v))
}

impl GriddedDataset for NetcdfGrid {
    fn variable_names(&self) -> Vec<String> {
        self.file.variables().map(|v| v.name()).collect()
    }

    fn read_variable(&self, name: &str) -> Result<GridVariable, GridError> {
        let var = self
            .file
            .variable(name)
            .ok_or_else(|| GridError::MissingVariable(name.to_string()))?;

        let dimensions: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let raw: Vec<f64> = var
            .get_values::<f64, _>(..)
            .map_err(|e| GridError::Io(format!("{}: {}", name, e)))?;

        let fill = variable_number(&var, "_FillValue").or_else(|| variable_number(&var, "missing_value"));
        let scale = variable_number(&var, "scale_factor").unwrap_or(1.0);
        let offset = variable_number(&var, "add_offset").unwrap_or(0.0);

        let values = raw
            .into_iter()
            .map(|v| {
                if fill.is_some_and(|f| v == f) {
                    f64::NAN
                } else {
                    v * scale + offset
                }
            })
            .collect();

        let units = var
            .attribute("units")
            .and_then(|a| a.value().ok())
            .and_then(|v| attribute_text(&v));

        let variable = GridVariable { name: name.to_string(), dimensions, shape, values, units };
        variable.check_shape()?;
        Ok(variable)
    }

    fn attribute(&self, variable: Option<&str>, name: &str) -> Option<String> {
        let value = match variable {
            Some(var) => self.file.variable(var)?.attribute(name)?.value().ok()?,
            None => self.file.attribute(name)?.value().ok()?,
        };
        attribute_text(&value)
    }
}
