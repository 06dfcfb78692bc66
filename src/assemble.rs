//! Reshaping of processed datasets into per-year artifacts.

use std::collections::{BTreeMap, HashMap};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::dataset::{PointDataset, SpatialDataset};
use crate::domain::DateRange;
use crate::error::ClimprojError;
use crate::netcdf_io::DatasetIo;
use crate::store::{self, Store};

const KEY_COLUMNS: [&str; 3] = ["time", "lon", "lat"];

/// Write one grid file per calendar year covered by the filename's date range.
///
/// A single-year range is written as is. Otherwise each year gets only its own
/// time steps, and years without any step produce no file.
pub fn split_by_year<D: DatasetIo + ?Sized>(
    io: &D,
    dataset: &SpatialDataset,
    source_filename: &str,
    output_dir: &Utf8Path,
    variable: &str,
) -> Result<Vec<Utf8PathBuf>, ClimprojError> {
    let range = DateRange::parse_filename(source_filename)?;
    if range.is_single_year() {
        let path = output_dir.join(store::grid_file_name(variable, range.start_year()));
        Store::write_atomic(&path, |temp| io.write(dataset, temp))?;
        return Ok(vec![path]);
    }

    let years = dataset.time.indices_by_year();
    let mut written = Vec::new();
    for year in range.years() {
        let Some(indices) = years.get(&year) else {
            debug!(file = source_filename, year, "no time steps for year");
            continue;
        };
        let subset = dataset.select_time(indices);
        let path = output_dir.join(store::grid_file_name(variable, year));
        Store::write_atomic(&path, |temp| io.write(&subset, temp))?;
        written.push(path);
    }
    Ok(written)
}

/// Write `time,lon,lat,<variable>` tables, one per calendar year of the time axis.
/// Fill values become empty cells.
pub fn export_points_csv_by_year(
    points: &PointDataset,
    source_filename: &str,
    output_dir: &Utf8Path,
    variable: &str,
) -> Result<Vec<Utf8PathBuf>, ClimprojError> {
    if points.time.is_empty() {
        return Err(ClimprojError::MissingTimeAxis(source_filename.to_string()));
    }

    let mut written = Vec::new();
    for (year, indices) in points.time.indices_by_year() {
        let path = output_dir.join(store::points_file_name(variable, year));
        Store::write_atomic(&path, |temp| {
            let mut writer = csv::Writer::from_path(temp).map_err(csv_err)?;
            writer
                .write_record(KEY_COLUMNS.iter().copied().chain([variable]))
                .map_err(csv_err)?;
            for &t in &indices {
                let time = points.time.dates[t].compact();
                for series in &points.series {
                    let value = series.values[t]
                        .map(|value| value.to_string())
                        .unwrap_or_default();
                    let lon = series.lon.to_string();
                    let lat = series.lat.to_string();
                    writer
                        .write_record([time.as_str(), lon.as_str(), lat.as_str(), value.as_str()])
                        .map_err(csv_err)?;
                }
            }
            writer
                .flush()
                .map_err(|err| ClimprojError::Csv(err.to_string()))
        })?;
        written.push(path);
    }
    Ok(written)
}

/// Outer-join the staged per-variable tables of each year on `(time, lon, lat)`
/// and write the experiment's merged `<year>.csv`.
///
/// `tables` maps a variable to its staged `<variable>_<year>.csv` files. Columns
/// follow `variables`; a variable without a table for some year keeps an empty
/// column. Rows are ordered by time, and within one day by the order in which
/// each `(lon, lat)` first appears.
pub fn merge_points_csvs_by_year(
    store: &Store,
    model: &str,
    experiment: &str,
    tables: &HashMap<String, Vec<Utf8PathBuf>>,
    variables: &[String],
) -> Result<Vec<Utf8PathBuf>, ClimprojError> {
    let mut by_year: BTreeMap<i32, Vec<(usize, &Utf8Path)>> = BTreeMap::new();
    for (column, variable) in variables.iter().enumerate() {
        for path in tables.get(variable).into_iter().flatten() {
            let year = staged_year(path, variable)?;
            by_year.entry(year).or_default().push((column, path.as_path()));
        }
    }

    let mut written = Vec::new();
    for (year, sources) in by_year {
        let table = join_year(&sources, variables)?;
        let path = store.merged_csv_path(model, experiment, year);
        Store::write_atomic(&path, |temp| {
            let mut writer = csv::Writer::from_path(temp).map_err(csv_err)?;
            writer
                .write_record(
                    KEY_COLUMNS
                        .iter()
                        .copied()
                        .chain(variables.iter().map(String::as_str)),
                )
                .map_err(csv_err)?;
            for (key, cells) in &table {
                writer
                    .write_record(key.iter().chain(cells.iter()))
                    .map_err(csv_err)?;
            }
            writer
                .flush()
                .map_err(|err| ClimprojError::Csv(err.to_string()))
        })?;
        debug!(year, rows = table.len(), path = %path, "merged point table");
        written.push(path);
    }
    Ok(written)
}

type JoinKey = [String; 3];

fn join_year(
    sources: &[(usize, &Utf8Path)],
    variables: &[String],
) -> Result<Vec<(JoinKey, Vec<String>)>, ClimprojError> {
    let mut rows: Vec<(JoinKey, Vec<String>)> = Vec::new();
    let mut index: HashMap<JoinKey, usize> = HashMap::new();

    for &(column, path) in sources {
        let variable = &variables[column];
        let mut reader = csv::Reader::from_path(path.as_std_path()).map_err(csv_err)?;
        let headers = reader.headers().map_err(csv_err)?.clone();
        let position = |name: &str| headers.iter().position(|header| header == name);
        let (Some(time), Some(lon), Some(lat)) = (position("time"), position("lon"), position("lat"))
        else {
            return Err(ClimprojError::Csv(format!(
                "{path}: expected columns time, lon, lat"
            )));
        };
        let value = position(variable).unwrap_or(3);

        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            let field = |i: usize| record.get(i).unwrap_or_default().to_string();
            let key = [field(time), field(lon), field(lat)];
            let row = match index.get(&key) {
                Some(&row) => row,
                None => {
                    index.insert(key.clone(), rows.len());
                    rows.push((key, vec![String::new(); variables.len()]));
                    rows.len() - 1
                }
            };
            rows[row].1[column] = field(value);
        }
    }

    let ranks: Vec<usize> = {
        let mut first_seen: HashMap<(&str, &str), usize> = HashMap::new();
        rows.iter()
            .map(|(key, _)| {
                let next = first_seen.len();
                *first_seen.entry((key[1].as_str(), key[2].as_str())).or_insert(next)
            })
            .collect()
    };
    let mut ranked: Vec<(usize, (JoinKey, Vec<String>))> = ranks.into_iter().zip(rows).collect();
    // `time` is zero-padded YYYYMMDD, so string order is chronological.
    ranked.sort_by(|(rank_a, (key_a, _)), (rank_b, (key_b, _))| {
        key_a[0].cmp(&key_b[0]).then(rank_a.cmp(rank_b))
    });
    Ok(ranked.into_iter().map(|(_, row)| row).collect())
}

fn staged_year(path: &Utf8Path, variable: &str) -> Result<i32, ClimprojError> {
    path.file_stem()
        .and_then(|stem| stem.strip_prefix(variable))
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|year| year.parse().ok())
        .ok_or_else(|| {
            ClimprojError::Csv(format!("{path}: not a staged '{variable}' table"))
        })
}

fn csv_err(err: csv::Error) -> ClimprojError {
    ClimprojError::Csv(err.to_string())
}
