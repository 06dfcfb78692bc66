//! Grid file I/O.
//!
//! The pipeline only talks to [`DatasetIo`]; [`NetcdfIo`] is the production
//! implementation and needs the `netcdf` feature (it links against libnetcdf).

use std::path::Path;

use crate::dataset::SpatialDataset;
use crate::error::ClimprojError;

pub trait DatasetIo: Send + Sync {
    /// Load `variable` together with its time/lat/lon coordinates.
    fn open(&self, path: &Path, variable: &str) -> Result<SpatialDataset, ClimprojError>;
    fn write(&self, dataset: &SpatialDataset, path: &Path) -> Result<(), ClimprojError>;
}

#[cfg(feature = "netcdf")]
pub use self::backend::NetcdfIo;

#[cfg(feature = "netcdf")]
mod backend {
    use std::path::Path;

    use netcdf::AttributeValue;

    use super::DatasetIo;
    use crate::dataset::{SpatialDataset, TimeAxis};
    use crate::error::ClimprojError;

    const LAT_NAMES: &[&str] = &["lat", "latitude"];
    const LON_NAMES: &[&str] = &["lon", "longitude"];

    #[derive(Debug, Clone, Copy, Default)]
    pub struct NetcdfIo;

    fn nc_err(err: netcdf::Error) -> ClimprojError {
        ClimprojError::Netcdf(err.to_string())
    }

    fn attr_string(var: &netcdf::Variable, name: &str) -> Option<String> {
        match var.attribute_value(name)?.ok()? {
            AttributeValue::Str(value) => Some(value),
            _ => None,
        }
    }

    fn attr_f64(var: &netcdf::Variable, name: &str) -> Option<f64> {
        match var.attribute_value(name)?.ok()? {
            AttributeValue::Double(value) => Some(value),
            AttributeValue::Float(value) => Some(f64::from(value)),
            AttributeValue::Int(value) => Some(f64::from(value)),
            AttributeValue::Short(value) => Some(f64::from(value)),
            _ => None,
        }
    }

    fn read_coord(
        file: &netcdf::File,
        names: &[&str],
    ) -> Result<(String, Vec<f64>), ClimprojError> {
        for name in names {
            if let Some(var) = file.variable(name) {
                let values: Vec<f64> = var.get_values(..).map_err(nc_err)?;
                return Ok((name.to_string(), values));
            }
        }
        Err(ClimprojError::Dataset(format!(
            "missing coordinate {}",
            names.join(" or ")
        )))
    }

    impl DatasetIo for NetcdfIo {
        fn open(&self, path: &Path, variable: &str) -> Result<SpatialDataset, ClimprojError> {
            let file = netcdf::open(path).map_err(nc_err)?;
            let (lat_name, lat) = read_coord(&file, LAT_NAMES)?;
            let (lon_name, lon) = read_coord(&file, LON_NAMES)?;

            let time_var = file
                .variable("time")
                .ok_or_else(|| ClimprojError::MissingTimeAxis(path.display().to_string()))?;
            let time_values: Vec<f64> = time_var.get_values(..).map_err(nc_err)?;
            let units = attr_string(&time_var, "units").ok_or_else(|| {
                ClimprojError::TimeEncoding(format!("{}: time has no units", path.display()))
            })?;
            let calendar =
                attr_string(&time_var, "calendar").unwrap_or_else(|| "standard".to_string());
            let time = TimeAxis::decode(time_values, &units, &calendar)?;

            let var = file.variable(variable).ok_or_else(|| {
                ClimprojError::Dataset(format!(
                    "{}: variable '{variable}' not found",
                    path.display()
                ))
            })?;
            let dims: Vec<String> = var.dimensions().iter().map(|dim| dim.name()).collect();
            let expected = ["time".to_string(), lat_name, lon_name];
            if dims != expected {
                return Err(ClimprojError::Dataset(format!(
                    "{}: '{variable}' has dimensions {dims:?}, expected {expected:?}",
                    path.display()
                )));
            }

            let mut values: Vec<f32> = var.get_values(..).map_err(nc_err)?;
            let fill_value = attr_f64(&var, "_FillValue")
                .or_else(|| attr_f64(&var, "missing_value"))
                .map(|value| value as f32);
            let scale = attr_f64(&var, "scale_factor");
            let offset = attr_f64(&var, "add_offset");
            if scale.is_some() || offset.is_some() {
                let (scale, offset) = (scale.unwrap_or(1.0), offset.unwrap_or(0.0));
                for value in &mut values {
                    if fill_value != Some(*value) {
                        *value = (f64::from(*value) * scale + offset) as f32;
                    }
                }
            }

            let mut dataset = SpatialDataset::new(variable, time, lat, lon, values)?;
            dataset.fill_value = fill_value;
            dataset.units = attr_string(&var, "units");
            Ok(dataset)
        }

        fn write(&self, dataset: &SpatialDataset, path: &Path) -> Result<(), ClimprojError> {
            let mut file = netcdf::create(path).map_err(nc_err)?;
            file.add_dimension("time", dataset.time.len()).map_err(nc_err)?;
            file.add_dimension("lat", dataset.lat.len()).map_err(nc_err)?;
            file.add_dimension("lon", dataset.lon.len()).map_err(nc_err)?;

            {
                let mut time = file.add_variable::<f64>("time", &["time"]).map_err(nc_err)?;
                time.put_attribute("standard_name", "time").map_err(nc_err)?;
                time.put_attribute("units", dataset.time.units.as_str())
                    .map_err(nc_err)?;
                time.put_attribute("calendar", dataset.time.calendar.as_str())
                    .map_err(nc_err)?;
                time.put_values(&dataset.time.values, ..).map_err(nc_err)?;
            }
            {
                let mut lat = file.add_variable::<f64>("lat", &["lat"]).map_err(nc_err)?;
                lat.put_attribute("standard_name", "latitude").map_err(nc_err)?;
                lat.put_attribute("units", "degrees_north").map_err(nc_err)?;
                lat.put_values(&dataset.lat, ..).map_err(nc_err)?;
            }
            {
                let mut lon = file.add_variable::<f64>("lon", &["lon"]).map_err(nc_err)?;
                lon.put_attribute("standard_name", "longitude").map_err(nc_err)?;
                lon.put_attribute("units", "degrees_east").map_err(nc_err)?;
                lon.put_values(&dataset.lon, ..).map_err(nc_err)?;
            }
            {
                let mut var = file
                    .add_variable::<f32>(&dataset.variable, &["time", "lat", "lon"])
                    .map_err(nc_err)?;
                if let Some(fill) = dataset.fill_value {
                    var.put_attribute("_FillValue", fill).map_err(nc_err)?;
                }
                if let Some(units) = &dataset.units {
                    var.put_attribute("units", units.as_str()).map_err(nc_err)?;
                }
                var.put_values(&dataset.values, ..).map_err(nc_err)?;
            }

            file.add_attribute("Conventions", "CF-1.8").map_err(nc_err)?;
            file.add_attribute(
                "history",
                format!(
                    "{}: subset by climproj/{}",
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                    env!("CARGO_PKG_VERSION")
                )
                .as_str(),
            )
            .map_err(nc_err)?;
            Ok(())
        }
    }
}
