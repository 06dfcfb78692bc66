use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use climproj::app::App;
use climproj::catalog::{CatalogClient, CatalogQuery, DatasetHandle, FileRecord};
use climproj::dataset::{SpatialDataset, TimeAxis};
use climproj::domain::{AcquisitionRequest, BoundingBox, Credentials, DateRange, Point, SpatialMode};
use climproj::download::FileFetcher;
use climproj::error::ClimprojError;
use climproj::metadata::StaticMetadata;
use climproj::netcdf_io::DatasetIo;
use climproj::output::JsonOutput;

const FILES: &[&str] = &["20150101-20161231", "20170101-20171231"];

struct MockCatalog {
    searches: Mutex<Vec<CatalogQuery>>,
}

impl CatalogClient for MockCatalog {
    fn search(&self, query: &CatalogQuery) -> Result<Vec<DatasetHandle>, ClimprojError> {
        self.searches.lock().unwrap().push(query.clone());
        let mut models = vec!["ModelX"];
        if query.variable_id == "pr" {
            models.push("ModelY");
        }
        Ok(models
            .into_iter()
            .filter(|model| query.source_id.as_deref().is_none_or(|wanted| wanted == *model))
            .map(|model| DatasetHandle {
                id: format!("CMIP6.ScenarioMIP.{model}.{}.r1i1p1f1.day.{}", query.experiment_id, query.variable_id),
                source_ids: vec![model.to_string()],
            })
            .collect())
    }

    fn file_context(&self, dataset: &DatasetHandle) -> Result<Vec<FileRecord>, ClimprojError> {
        let variable = dataset.id.rsplit('.').next().unwrap_or_default();
        let model = &dataset.source_ids[0];
        Ok(FILES
            .iter()
            .map(|range| {
                let name = format!("{variable}_day_{model}_ssp585_r1i1p1f1_gn_{range}.nc");
                FileRecord {
                    download_url: Some(format!("https://esgf.example/fileServer/{name}")),
                    filename: Some(name),
                }
            })
            .collect())
    }
}

#[derive(Clone, Default)]
struct MockFetcher {
    calls: Arc<Mutex<Vec<String>>>,
}

impl FileFetcher for MockFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), ClimprojError> {
        self.calls.lock().unwrap().push(url.to_string());
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::write(destination, b"CDF").map_err(|err| ClimprojError::Filesystem(err.to_string()))
    }
}

type WriteLog = Arc<Mutex<Vec<(String, Vec<i32>, Vec<f64>)>>>;

/// Builds a 0..360 grid with one time step per day from the filename's range
/// (noleap calendar). Writes record the years they contain.
#[derive(Clone, Default)]
struct MockIo {
    writes: WriteLog,
}

impl DatasetIo for MockIo {
    fn open(&self, path: &Path, variable: &str) -> Result<SpatialDataset, ClimprojError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let range = DateRange::parse_filename(&name)?;
        let first = f64::from((range.start_year() - 2015) * 365);
        let days = f64::from((range.end_year() - range.start_year() + 1) * 365);
        let offsets: Vec<f64> = (0..days as usize).map(|d| first + d as f64).collect();
        let time = TimeAxis::decode(offsets, "days since 2015-01-01", "noleap")?;
        let lat = vec![4.0, 6.0, 8.0, 10.0, 12.0];
        let lon = vec![0.0, 10.0, 12.5, 15.0, 200.0, 350.0];
        let values = vec![300.0; time.len() * lat.len() * lon.len()];
        SpatialDataset::new(variable, time, lat, lon, values)
    }

    fn write(&self, dataset: &SpatialDataset, path: &Path) -> Result<(), ClimprojError> {
        let mut years: Vec<i32> = dataset.time.dates.iter().map(|date| date.year).collect();
        years.dedup();
        self.writes.lock().unwrap().push((
            dataset.variable.clone(),
            years,
            dataset.lon.clone(),
        ));
        fs::write(path, b"CDF").map_err(|err| ClimprojError::Filesystem(err.to_string()))
    }
}

fn request(root: &Path, variables: &[&str], spatial_mode: SpatialMode) -> AcquisitionRequest {
    AcquisitionRequest {
        models: None,
        experiments: vec!["ssp585".to_string()],
        variables: variables.iter().map(|v| v.to_string()).collect(),
        spatial_mode,
        start_year: None,
        output_root: Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap(),
        credentials: Credentials::new(Some("user".into()), Some("secret".into())).unwrap(),
        workers: 2,
    }
}

type TestApp = App<MockCatalog, MockFetcher, MockIo, StaticMetadata>;

fn app() -> (TestApp, MockFetcher, MockIo) {
    let fetcher = MockFetcher::default();
    let io = MockIo::default();
    let app = App::new(
        MockCatalog {
            searches: Mutex::new(Vec::new()),
        },
        fetcher.clone(),
        io.clone(),
        StaticMetadata,
    );
    (app, fetcher, io)
}

#[test]
fn bbox_scenario_writes_one_grid_per_year() {
    let temp = tempfile::tempdir().unwrap();
    let bbox = BoundingBox::new(10.0, 5.0, 15.0, 10.0).unwrap();
    let request = request(temp.path(), &["pr"], SpatialMode::Bbox(bbox));
    let (app, _fetcher, io) = app();

    let report = app.acquire(&request, &JsonOutput).unwrap();

    assert_eq!(report.models, vec!["ModelX".to_string(), "ModelY".to_string()]);
    let experiment_dir = temp.path().join("ModelX").join("ssp585");
    for year in 2015..=2017 {
        assert!(experiment_dir.join(format!("pr_{year}.nc")).is_file(), "{year}");
    }
    let raw_dir = experiment_dir.join("_raw").join("pr");
    assert_eq!(fs::read_dir(&raw_dir).unwrap().count(), 0);

    let batch = &report.batches[0];
    assert_eq!(batch.variables[0].fetched, 2);
    assert_eq!(batch.variables[0].processed, 2);
    assert_eq!(batch.variables[0].artifacts.len(), 3);

    let writes = io.writes.lock().unwrap();
    assert!(writes.iter().all(|(_, years, lon)| years.len() == 1 && lon == &vec![10.0, 12.5, 15.0]));
}

#[test]
fn second_run_downloads_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let request = request(temp.path(), &["pr"], SpatialMode::None);
    let (app, fetcher, _io) = app();

    let first = app.acquire(&request, &JsonOutput).unwrap();
    assert_eq!(first.totals().fetched, 4);
    assert_eq!(fetcher.calls.lock().unwrap().len(), 4);

    let second = app.acquire(&request, &JsonOutput).unwrap();
    assert_eq!(second.totals().fetched, 0);
    assert_eq!(second.totals().skipped, 4);
    assert_eq!(fetcher.calls.lock().unwrap().len(), 4);
}

#[test]
fn intersection_drops_models_missing_a_variable() {
    let temp = tempfile::tempdir().unwrap();
    let request = request(temp.path(), &["pr", "tas"], SpatialMode::None);
    let (app, _, _) = app();
    let report = app.acquire(&request, &JsonOutput).unwrap();
    assert_eq!(report.models, vec!["ModelX".to_string()]);
    assert!(!temp.path().join("ModelY").exists());
}

#[test]
fn points_scenario_merges_variables_per_year() {
    let temp = tempfile::tempdir().unwrap();
    let points = vec![Point::new(12.0, 7.0).unwrap(), Point::new(-160.0, 11.0).unwrap()];
    let mut request = request(temp.path(), &["tas", "pr"], SpatialMode::Points(points));
    request.models = Some(vec!["ModelX".to_string()]);
    request.start_year = Some(2017);

    let (app, fetcher, _) = app();
    let report = app.acquire(&request, &JsonOutput).unwrap();
    assert_eq!(fetcher.calls.lock().unwrap().len(), 2);

    assert_eq!(report.output_root, temp.path().to_str().unwrap());
    let batch = &report.batches[0];
    assert_eq!(
        batch.merged,
        vec![temp.path().join("ModelX/ssp585/2017.csv").to_str().unwrap().to_string()]
    );
    let merged = fs::read_to_string(&batch.merged[0]).unwrap();
    let mut lines = merged.lines();
    assert_eq!(lines.next(), Some("time,lon,lat,tas,pr"));
    assert_eq!(lines.next(), Some("20170101,12,7,26.85,25920000"));
    assert_eq!(lines.next(), Some("20170101,-160,11,26.85,25920000"));
    assert_eq!(merged.lines().count(), 1 + 365 * 2);

    let staged = temp
        .path()
        .join("ModelX/ssp585/_points/tas/tas_2017.csv");
    assert!(staged.is_file());
    assert!(!temp.path().join("ModelX/ssp585/_points/tas/tas_2015.csv").exists());
}
