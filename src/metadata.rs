use crate::error::ClimprojError;

pub const CMIP6_PRODUCT: &str = "cmip6";
pub const ESGF_SOURCE: &str = "esgf";

/// A canonical variable mapped onto the identifier a source understands.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedVariable {
    pub canonical: &'static str,
    pub source_id: &'static str,
    pub units: Option<&'static str>,
    pub convert: Option<fn(f64) -> f64>,
}

impl ResolvedVariable {
    pub fn apply(&self, value: f64) -> f64 {
        match self.convert {
            Some(convert) => convert(value),
            None => value,
        }
    }
}

pub trait VariableResolver: Send + Sync {
    fn resolve(
        &self,
        variable: &str,
        product: &str,
        source: &str,
    ) -> Result<ResolvedVariable, ClimprojError>;
}

struct Entry {
    names: &'static [&'static str],
    product: &'static str,
    source: &'static str,
    resolved: ResolvedVariable,
}

fn kg_m2_s_to_mm_day(value: f64) -> f64 {
    value * 86400.0
}

fn kelvin_to_celsius(value: f64) -> f64 {
    value - 273.15
}

// Log-profile reduction of 10 m wind to 2 m.
fn wind_10m_to_2m(value: f64) -> f64 {
    value * 0.75
}

const TABLE: &[Entry] = &[
    Entry {
        names: &["PR", "pr"],
        product: CMIP6_PRODUCT,
        source: ESGF_SOURCE,
        resolved: ResolvedVariable {
            canonical: "PR",
            source_id: "pr",
            units: Some("mm/day"),
            convert: Some(kg_m2_s_to_mm_day),
        },
    },
    Entry {
        names: &["T2M", "tas"],
        product: CMIP6_PRODUCT,
        source: ESGF_SOURCE,
        resolved: ResolvedVariable {
            canonical: "T2M",
            source_id: "tas",
            units: Some("°C"),
            convert: Some(kelvin_to_celsius),
        },
    },
    Entry {
        names: &["TMAX", "tasmax"],
        product: CMIP6_PRODUCT,
        source: ESGF_SOURCE,
        resolved: ResolvedVariable {
            canonical: "TMAX",
            source_id: "tasmax",
            units: Some("°C"),
            convert: Some(kelvin_to_celsius),
        },
    },
    Entry {
        names: &["TMIN", "tasmin"],
        product: CMIP6_PRODUCT,
        source: ESGF_SOURCE,
        resolved: ResolvedVariable {
            canonical: "TMIN",
            source_id: "tasmin",
            units: Some("°C"),
            convert: Some(kelvin_to_celsius),
        },
    },
    Entry {
        names: &["TDEW", "tdps"],
        product: CMIP6_PRODUCT,
        source: ESGF_SOURCE,
        resolved: ResolvedVariable {
            canonical: "TDEW",
            source_id: "tdps",
            units: Some("°C"),
            convert: Some(kelvin_to_celsius),
        },
    },
    Entry {
        names: &["WS2M", "sfcWind"],
        product: CMIP6_PRODUCT,
        source: ESGF_SOURCE,
        resolved: ResolvedVariable {
            canonical: "WS2M",
            source_id: "sfcWind",
            units: Some("m/s"),
            convert: Some(wind_10m_to_2m),
        },
    },
    Entry {
        names: &["WS10M"],
        product: CMIP6_PRODUCT,
        source: ESGF_SOURCE,
        resolved: ResolvedVariable {
            canonical: "WS10M",
            source_id: "sfcWind",
            units: Some("m/s"),
            convert: None,
        },
    },
    Entry {
        names: &["SRAD", "rsds"],
        product: CMIP6_PRODUCT,
        source: ESGF_SOURCE,
        resolved: ResolvedVariable {
            canonical: "SRAD",
            source_id: "rsds",
            units: Some("W/m2"),
            convert: None,
        },
    },
    Entry {
        names: &["SURFPRES", "ps"],
        product: CMIP6_PRODUCT,
        source: ESGF_SOURCE,
        resolved: ResolvedVariable {
            canonical: "SURFPRES",
            source_id: "ps",
            units: Some("Pa"),
            convert: None,
        },
    },
];

/// Built-in variable table. Lookups accept either the canonical name or the
/// CMIP6 `variable_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticMetadata;

impl VariableResolver for StaticMetadata {
    fn resolve(
        &self,
        variable: &str,
        product: &str,
        source: &str,
    ) -> Result<ResolvedVariable, ClimprojError> {
        TABLE
            .iter()
            .find(|entry| {
                entry.product.eq_ignore_ascii_case(product)
                    && entry.source.eq_ignore_ascii_case(source)
                    && entry.names.contains(&variable)
            })
            .map(|entry| entry.resolved)
            .ok_or_else(|| ClimprojError::UnknownVariable {
                variable: variable.to_string(),
                product: product.to_string(),
                source_name: source.to_string(),
            })
    }
}
