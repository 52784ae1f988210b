//! Column role resolution
//!
//! Resolves the client's declared column roles (query columns, bias/reverse
//! coordinates, dynamic filter mappings) against the header discovered at
//! decode time. Resolution happens once per request, before any row is
//! processed; a dangling reference fails the whole upload up front.

use geobatch_common::{PipelineError, Result};

use crate::record::GeocodeMode;

/// Recognized coordinate column names, checked case-insensitively when no
/// explicit override is declared.
pub const LAT_SYNONYMS: [&str; 2] = ["lat", "latitude"];
pub const LON_SYNONYMS: [&str; 4] = ["lon", "longitude", "lng", "long"];

/// Declared column roles, straight from the request surface.
#[derive(Debug, Clone, Default)]
pub struct ColumnSpec {
    /// Columns to concatenate into the forward query, in declared order.
    /// Empty means every header column, in header order.
    pub query_columns: Vec<String>,
    /// Explicit coordinate column overrides.
    pub lat_column: Option<String>,
    pub lon_column: Option<String>,
    /// Dynamic `filter key -> column name` mappings from extra query
    /// parameters.
    pub filters: Vec<(String, String)>,
}

/// Column roles resolved to header indexes.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub query_columns: Vec<usize>,
    pub lat_column: Option<usize>,
    pub lon_column: Option<usize>,
    pub filter_columns: Vec<(String, usize)>,
}

impl ColumnMapping {
    /// Resolve `spec` against `header` for the given mode.
    pub fn resolve(header: &[String], spec: &ColumnSpec, mode: GeocodeMode) -> Result<Self> {
        let query_columns = if spec.query_columns.is_empty() {
            (0..header.len()).collect()
        } else {
            spec.query_columns
                .iter()
                .map(|name| find_column(header, name))
                .collect::<Result<Vec<usize>>>()?
        };

        let lat_column = resolve_coordinate(header, spec.lat_column.as_deref(), &LAT_SYNONYMS)?;
        let lon_column = resolve_coordinate(header, spec.lon_column.as_deref(), &LON_SYNONYMS)?;

        if mode == GeocodeMode::Reverse && (lat_column.is_none() || lon_column.is_none()) {
            return Err(PipelineError::MissingCoordinateColumns);
        }

        let filter_columns = spec
            .filters
            .iter()
            .map(|(key, column)| Ok((key.clone(), find_column(header, column)?)))
            .collect::<Result<Vec<(String, usize)>>>()?;

        Ok(Self {
            query_columns,
            lat_column,
            lon_column,
            filter_columns,
        })
    }
}

/// Exact-name lookup; the error names the first unresolved reference.
fn find_column(header: &[String], name: &str) -> Result<usize> {
    header
        .iter()
        .position(|column| column == name)
        .ok_or_else(|| PipelineError::UnknownColumn(name.to_string()))
}

/// An explicit override must resolve; synonyms are merely opportunistic.
fn resolve_coordinate(
    header: &[String],
    declared: Option<&str>,
    synonyms: &[&str],
) -> Result<Option<usize>> {
    match declared {
        Some(name) => find_column(header, name).map(Some),
        None => Ok(header.iter().position(|column| {
            let lowered = column.to_ascii_lowercase();
            synonyms.contains(&lowered.as_str())
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_to_all_columns_in_header_order() {
        let header = header(&["number", "street", "city"]);
        let mapping =
            ColumnMapping::resolve(&header, &ColumnSpec::default(), GeocodeMode::Forward)
                .expect("mapping");
        assert_eq!(mapping.query_columns, vec![0, 1, 2]);
        assert!(mapping.lat_column.is_none());
    }

    #[test]
    fn test_declared_query_columns_keep_declared_order() {
        let header = header(&["city", "street", "number"]);
        let spec = ColumnSpec {
            query_columns: vec!["number".to_string(), "street".to_string()],
            ..ColumnSpec::default()
        };
        let mapping =
            ColumnMapping::resolve(&header, &spec, GeocodeMode::Forward).expect("mapping");
        assert_eq!(mapping.query_columns, vec![2, 1]);
    }

    #[test]
    fn test_unknown_query_column_names_first_offender() {
        let header = header(&["address"]);
        let spec = ColumnSpec {
            query_columns: vec!["address".to_string(), "ghost".to_string()],
            ..ColumnSpec::default()
        };
        match ColumnMapping::resolve(&header, &spec, GeocodeMode::Forward) {
            Err(PipelineError::UnknownColumn(name)) => assert_eq!(name, "ghost"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_coordinate_synonyms_resolve_case_insensitively() {
        let header = header(&["address", "Latitude", "LNG"]);
        let mapping =
            ColumnMapping::resolve(&header, &ColumnSpec::default(), GeocodeMode::Reverse)
                .expect("mapping");
        assert_eq!(mapping.lat_column, Some(1));
        assert_eq!(mapping.lon_column, Some(2));
    }

    #[test]
    fn test_reverse_without_coordinates_fails() {
        let header = header(&["address", "city"]);
        let result = ColumnMapping::resolve(&header, &ColumnSpec::default(), GeocodeMode::Reverse);
        assert!(matches!(
            result,
            Err(PipelineError::MissingCoordinateColumns)
        ));
    }

    #[test]
    fn test_forward_without_coordinates_is_fine() {
        let header = header(&["address", "city"]);
        let mapping =
            ColumnMapping::resolve(&header, &ColumnSpec::default(), GeocodeMode::Forward)
                .expect("mapping");
        assert!(mapping.lat_column.is_none());
        assert!(mapping.lon_column.is_none());
    }

    #[test]
    fn test_explicit_coordinate_override_must_exist() {
        let header = header(&["address", "lat", "lon"]);
        let spec = ColumnSpec {
            lat_column: Some("wgs84_lat".to_string()),
            ..ColumnSpec::default()
        };
        assert!(matches!(
            ColumnMapping::resolve(&header, &spec, GeocodeMode::Reverse),
            Err(PipelineError::UnknownColumn(name)) if name == "wgs84_lat"
        ));
    }

    #[test]
    fn test_filter_mapping_resolution() {
        let header = header(&["address", "insee", "dept"]);
        let spec = ColumnSpec {
            filters: vec![
                ("citycode".to_string(), "insee".to_string()),
                ("postcode".to_string(), "dept".to_string()),
            ],
            ..ColumnSpec::default()
        };
        let mapping =
            ColumnMapping::resolve(&header, &spec, GeocodeMode::Forward).expect("mapping");
        assert_eq!(
            mapping.filter_columns,
            vec![("citycode".to_string(), 1), ("postcode".to_string(), 2)]
        );
    }

    #[test]
    fn test_filter_mapping_to_missing_column_fails() {
        let header = header(&["address"]);
        let spec = ColumnSpec {
            filters: vec![("citycode".to_string(), "insee".to_string())],
            ..ColumnSpec::default()
        };
        assert!(matches!(
            ColumnMapping::resolve(&header, &spec, GeocodeMode::Forward),
            Err(PipelineError::UnknownColumn(name)) if name == "insee"
        ));
    }
}
