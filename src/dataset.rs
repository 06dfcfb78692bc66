//! In-memory grid of one variable over `[time, lat, lon]`, with the handful of
//! operations the pipeline needs: longitude normalization, bbox selection,
//! nearest-cell point sampling and per-year slicing.

use std::collections::BTreeMap;

use crate::cftime::{self, CfDate};
use crate::domain::{BoundingBox, Point};
use crate::error::ClimprojError;

/// CF time coordinate. Raw offsets and their encoding are kept so a subset can be
/// written back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAxis {
    pub values: Vec<f64>,
    pub units: String,
    pub calendar: String,
    pub dates: Vec<CfDate>,
}

impl TimeAxis {
    pub fn decode(values: Vec<f64>, units: &str, calendar: &str) -> Result<Self, ClimprojError> {
        let dates = cftime::decode_axis(&values, units, calendar)?;
        Ok(Self {
            values,
            units: units.to_string(),
            calendar: calendar.to_string(),
            dates,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            values: indices.iter().map(|&i| self.values[i]).collect(),
            units: self.units.clone(),
            calendar: self.calendar.clone(),
            dates: indices.iter().map(|&i| self.dates[i]).collect(),
        }
    }

    /// Time-step indices grouped by calendar year, in ascending year order.
    pub fn indices_by_year(&self) -> BTreeMap<i32, Vec<usize>> {
        let mut years = BTreeMap::<i32, Vec<usize>>::new();
        for (index, date) in self.dates.iter().enumerate() {
            years.entry(date.year).or_default().push(index);
        }
        years
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpatialDataset {
    pub variable: String,
    pub units: Option<String>,
    pub fill_value: Option<f32>,
    pub time: TimeAxis,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    /// Row-major `[time, lat, lon]`.
    pub values: Vec<f32>,
}

impl SpatialDataset {
    pub fn new(
        variable: impl Into<String>,
        time: TimeAxis,
        lat: Vec<f64>,
        lon: Vec<f64>,
        values: Vec<f32>,
    ) -> Result<Self, ClimprojError> {
        let variable = variable.into();
        let expected = time.len() * lat.len() * lon.len();
        if values.len() != expected {
            return Err(ClimprojError::Dataset(format!(
                "{variable}: expected {expected} values for [{}, {}, {}], got {}",
                time.len(),
                lat.len(),
                lon.len(),
                values.len()
            )));
        }
        Ok(Self {
            variable,
            units: None,
            fill_value: None,
            time,
            lat,
            lon,
            values,
        })
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_fill_value(mut self, fill_value: f32) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    fn index(&self, t: usize, j: usize, i: usize) -> usize {
        (t * self.lat.len() + j) * self.lon.len() + i
    }

    pub fn value(&self, t: usize, j: usize, i: usize) -> f32 {
        self.values[self.index(t, j, i)]
    }

    pub fn is_fill(&self, value: f32) -> bool {
        !value.is_finite() || self.fill_value.is_some_and(|fill| value == fill)
    }

    pub fn uses_0_360_longitudes(&self) -> bool {
        self.lon.iter().any(|lon| *lon > 180.0)
    }

    /// Remap a 0..360 longitude axis onto -180..180 and re-sort it ascending,
    /// permuting the data with it. Returns whether anything changed.
    pub fn normalize_longitude(&mut self) -> bool {
        if !self.uses_0_360_longitudes() {
            return false;
        }
        let shifted: Vec<f64> = self
            .lon
            .iter()
            .map(|lon| (lon + 180.0).rem_euclid(360.0) - 180.0)
            .collect();
        let mut order: Vec<usize> = (0..shifted.len()).collect();
        order.sort_by(|a, b| shifted[*a].total_cmp(&shifted[*b]));

        let time_idx: Vec<usize> = (0..self.time.len()).collect();
        let lat_idx: Vec<usize> = (0..self.lat.len()).collect();
        self.values = self.gather(&time_idx, &lat_idx, &order);
        self.lon = order.iter().map(|&i| shifted[i]).collect();
        true
    }

    /// Map every non-fill value through `convert` and relabel the units.
    pub fn convert_units(&mut self, convert: impl Fn(f64) -> f64, units: Option<&str>) {
        let fill = self.fill_value;
        for value in &mut self.values {
            let is_fill = !value.is_finite() || fill.is_some_and(|fill| *value == fill);
            if !is_fill {
                *value = convert(f64::from(*value)) as f32;
            }
        }
        if let Some(units) = units {
            self.units = Some(units.to_string());
        }
    }

    /// Inclusive lat/lon window. Axis order (ascending or descending) is preserved.
    pub fn clip(&self, bbox: &BoundingBox) -> Result<SpatialDataset, ClimprojError> {
        let lat_idx: Vec<usize> = (0..self.lat.len())
            .filter(|&j| bbox.contains_lat(self.lat[j]))
            .collect();
        let lon_idx: Vec<usize> = (0..self.lon.len())
            .filter(|&i| bbox.contains_lon(self.lon[i]))
            .collect();
        if lat_idx.is_empty() || lon_idx.is_empty() {
            return Err(ClimprojError::Dataset(format!(
                "{}: bbox {bbox} does not intersect the grid",
                self.variable
            )));
        }
        let time_idx: Vec<usize> = (0..self.time.len()).collect();
        Ok(SpatialDataset {
            variable: self.variable.clone(),
            units: self.units.clone(),
            fill_value: self.fill_value,
            time: self.time.clone(),
            lat: lat_idx.iter().map(|&j| self.lat[j]).collect(),
            lon: lon_idx.iter().map(|&i| self.lon[i]).collect(),
            values: self.gather(&time_idx, &lat_idx, &lon_idx),
        })
    }

    /// Keep only the given time steps.
    pub fn select_time(&self, indices: &[usize]) -> SpatialDataset {
        let lat_idx: Vec<usize> = (0..self.lat.len()).collect();
        let lon_idx: Vec<usize> = (0..self.lon.len()).collect();
        SpatialDataset {
            variable: self.variable.clone(),
            units: self.units.clone(),
            fill_value: self.fill_value,
            time: self.time.select(indices),
            lat: self.lat.clone(),
            lon: self.lon.clone(),
            values: self.gather(indices, &lat_idx, &lon_idx),
        }
    }

    /// Nearest grid cell per requested point, each axis matched independently.
    /// The output keeps the requested coordinates, not the matched cell centres.
    pub fn extract_points(&self, points: &[Point]) -> Result<PointDataset, ClimprojError> {
        if self.lat.is_empty() || self.lon.is_empty() {
            return Err(ClimprojError::Dataset(format!(
                "{}: empty spatial grid",
                self.variable
            )));
        }
        let series = points
            .iter()
            .map(|point| {
                let j = nearest_index(&self.lat, point.lat);
                let i = nearest_index(&self.lon, point.lon);
                let values = (0..self.time.len())
                    .map(|t| {
                        let value = self.value(t, j, i);
                        (!self.is_fill(value)).then_some(value)
                    })
                    .collect();
                PointSeries {
                    lon: point.lon,
                    lat: point.lat,
                    values,
                }
            })
            .collect();
        Ok(PointDataset {
            variable: self.variable.clone(),
            time: self.time.clone(),
            series,
        })
    }

    fn gather(&self, time_idx: &[usize], lat_idx: &[usize], lon_idx: &[usize]) -> Vec<f32> {
        let mut out = Vec::with_capacity(time_idx.len() * lat_idx.len() * lon_idx.len());
        for &t in time_idx {
            for &j in lat_idx {
                for &i in lon_idx {
                    out.push(self.value(t, j, i));
                }
            }
        }
        out
    }
}

fn nearest_index(axis: &[f64], target: f64) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (index, value) in axis.iter().enumerate() {
        let distance = (value - target).abs();
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointSeries {
    pub lon: f64,
    pub lat: f64,
    /// One entry per time step; `None` where the source cell held a fill value.
    pub values: Vec<Option<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointDataset {
    pub variable: String,
    pub time: TimeAxis,
    pub series: Vec<PointSeries>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(days: &[f64]) -> TimeAxis {
        TimeAxis::decode(days.to_vec(), "days since 2015-01-01", "noleap").unwrap()
    }

    fn grid(lat: Vec<f64>, lon: Vec<f64>, steps: usize) -> SpatialDataset {
        let days: Vec<f64> = (0..steps).map(|d| d as f64 + 0.5).collect();
        let n = steps * lat.len() * lon.len();
        let values = (0..n).map(|v| v as f32).collect();
        SpatialDataset::new("pr", axis(&days), lat, lon, values).unwrap()
    }

    #[test]
    fn rejects_shape_mismatch() {
        let err = SpatialDataset::new("pr", axis(&[0.5]), vec![0.0], vec![0.0, 1.0], vec![1.0]);
        assert!(err.is_err());
    }

    #[test]
    fn normalize_longitude_reorders_values() {
        let mut ds = grid(vec![0.0], vec![0.0, 90.0, 180.0, 270.0], 1);
        assert!(ds.normalize_longitude());
        assert_eq!(ds.lon, vec![-180.0, -90.0, 0.0, 90.0]);
        // value at original lon 180 (index 2) now leads, lon 270 (index 3) follows
        assert_eq!(ds.values, vec![2.0, 3.0, 0.0, 1.0]);
        assert!(!ds.normalize_longitude());
    }

    #[test]
    fn clip_is_inclusive() {
        let ds = grid(vec![4.0, 5.0, 6.0, 11.0], vec![9.0, 10.0, 15.0, 16.0], 2);
        let bbox = BoundingBox::new(10.0, 5.0, 15.0, 10.0).unwrap();
        let clipped = ds.clip(&bbox).unwrap();
        assert_eq!(clipped.lat, vec![5.0, 6.0]);
        assert_eq!(clipped.lon, vec![10.0, 15.0]);
        assert_eq!(clipped.time.len(), 2);
        assert_eq!(clipped.value(1, 0, 0), ds.value(1, 1, 1));
    }

    #[test]
    fn clip_outside_grid_fails() {
        let ds = grid(vec![0.0, 1.0], vec![0.0, 1.0], 1);
        let bbox = BoundingBox::new(50.0, 50.0, 60.0, 60.0).unwrap();
        assert!(ds.clip(&bbox).is_err());
    }

    #[test]
    fn points_keep_requested_coordinates() {
        let coarse = grid(vec![0.0, 2.0], vec![0.0, 2.0], 1);
        let fine = grid(vec![0.0, 0.5, 1.0, 1.5], vec![0.0, 0.5, 1.0, 1.5], 1);
        let wanted = [Point::new(1.2, 0.4).unwrap()];

        let a = coarse.extract_points(&wanted).unwrap();
        let b = fine.extract_points(&wanted).unwrap();
        assert_eq!((a.series[0].lon, a.series[0].lat), (1.2, 0.4));
        assert_eq!((b.series[0].lon, b.series[0].lat), (1.2, 0.4));
        // coarse: lat 0.0 (j=0), lon 2.0 (i=1)
        assert_eq!(a.series[0].values, vec![Some(1.0)]);
    }

    #[test]
    fn fill_values_become_missing() {
        let mut ds = grid(vec![0.0], vec![0.0], 2).with_fill_value(1.0e20);
        ds.values[1] = 1.0e20;
        let points = ds.extract_points(&[Point::new(0.0, 0.0).unwrap()]).unwrap();
        assert_eq!(points.series[0].values, vec![Some(0.0), None]);

        ds.convert_units(|v| v * 2.0, Some("mm/day"));
        assert_eq!(ds.values, vec![0.0, 1.0e20]);
        assert_eq!(ds.units.as_deref(), Some("mm/day"));
    }

    #[test]
    fn select_time_by_year() {
        let days: Vec<f64> = vec![363.5, 364.5, 365.5, 366.5];
        let ds = SpatialDataset::new(
            "tas",
            axis(&days),
            vec![0.0],
            vec![0.0],
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        let years = ds.time.indices_by_year();
        assert_eq!(years[&2015], vec![0, 1]);
        assert_eq!(years[&2016], vec![2, 3]);
        let y2016 = ds.select_time(&years[&2016]);
        assert_eq!(y2016.values, vec![3.0, 4.0]);
        assert_eq!(y2016.time.values, vec![365.5, 366.5]);
    }
}
