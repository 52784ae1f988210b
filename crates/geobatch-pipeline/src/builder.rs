//! Geocode request construction
//!
//! Builds exactly one [`GeocodeTask`] per row. Rows are never dropped here:
//! an empty forward query or an unparsable coordinate pair becomes a
//! short-circuit payload so the row still appears in the output with the
//! right status.

use crate::mapping::ColumnMapping;
use crate::record::{GeocodeMode, GeocodeTask, RowRecord, TaskPayload};

/// Build the task for one row under the resolved mapping.
pub fn build_task(row: &RowRecord, mapping: &ColumnMapping, mode: GeocodeMode) -> GeocodeTask {
    let payload = match mode {
        GeocodeMode::Forward => forward_payload(row, mapping),
        GeocodeMode::Reverse => reverse_payload(row, mapping),
    };

    // Filter values are read verbatim; a missing or empty cell simply
    // omits that filter for this row.
    let filters = mapping
        .filter_columns
        .iter()
        .filter_map(|(key, index)| {
            row.get(*index)
                .filter(|value| !value.trim().is_empty())
                .map(|value| (key.clone(), value.to_string()))
        })
        .collect();

    GeocodeTask {
        sequence: row.sequence(),
        payload,
        bias_center: bias_center(row, mapping, mode),
        filters,
    }
}

fn forward_payload(row: &RowRecord, mapping: &ColumnMapping) -> TaskPayload {
    let parts: Vec<&str> = mapping
        .query_columns
        .iter()
        .filter_map(|index| row.get(*index))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if parts.is_empty() {
        TaskPayload::EmptyQuery
    } else {
        TaskPayload::Forward {
            query: parts.join(" "),
        }
    }
}

fn reverse_payload(row: &RowRecord, mapping: &ColumnMapping) -> TaskPayload {
    match coordinates(row, mapping) {
        Some(Ok((lat, lon))) => TaskPayload::Reverse { lat, lon },
        Some(Err(detail)) => TaskPayload::InvalidCoordinates { detail },
        None => TaskPayload::InvalidCoordinates {
            detail: "missing coordinate values".to_string(),
        },
    }
}

/// Parse the row's coordinate cells. `None` when a cell is absent or blank,
/// `Some(Err)` when present but unparsable.
fn coordinates(row: &RowRecord, mapping: &ColumnMapping) -> Option<std::result::Result<(f64, f64), String>> {
    let lat_raw = mapping.lat_column.and_then(|index| row.get(index))?.trim();
    let lon_raw = mapping.lon_column.and_then(|index| row.get(index))?.trim();
    if lat_raw.is_empty() || lon_raw.is_empty() {
        return None;
    }
    match (lat_raw.parse::<f64>(), lon_raw.parse::<f64>()) {
        (Ok(lat), Ok(lon)) => Some(Ok((lat, lon))),
        _ => Some(Err(format!(
            "unparsable coordinates: lat={lat_raw:?} lon={lon_raw:?}"
        ))),
    }
}

/// Forward requests use resolvable lat/lon cells as a bias center when both
/// parse; reverse requests carry their coordinates in the payload instead.
fn bias_center(
    row: &RowRecord,
    mapping: &ColumnMapping,
    mode: GeocodeMode,
) -> Option<(f64, f64)> {
    if mode == GeocodeMode::Reverse {
        return None;
    }
    match coordinates(row, mapping) {
        Some(Ok(center)) => Some(center),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ColumnSpec;
    use crate::record::GeocodeMode;
    use std::sync::Arc;

    fn row(header: &[&str], fields: &[&str]) -> RowRecord {
        let header: Arc<[String]> = header.iter().map(|s| s.to_string()).collect::<Vec<_>>().into();
        RowRecord::new(0, header, fields.iter().map(|s| s.to_string()).collect())
    }

    fn mapping(header: &[&str], spec: &ColumnSpec, mode: GeocodeMode) -> ColumnMapping {
        let header: Vec<String> = header.iter().map(|s| s.to_string()).collect();
        ColumnMapping::resolve(&header, spec, mode).expect("mapping")
    }

    #[test]
    fn test_forward_query_joins_non_empty_values() {
        let header = ["number", "street", "city"];
        let record = row(&header, &["12", "", "paris"]);
        let mapping = mapping(&header, &ColumnSpec::default(), GeocodeMode::Forward);

        let task = build_task(&record, &mapping, GeocodeMode::Forward);
        assert_eq!(
            task.payload,
            TaskPayload::Forward {
                query: "12 paris".to_string()
            }
        );
    }

    #[test]
    fn test_all_empty_query_columns_short_circuit() {
        let header = ["address", "city"];
        let record = row(&header, &["", ""]);
        let mapping = mapping(&header, &ColumnSpec::default(), GeocodeMode::Forward);

        let task = build_task(&record, &mapping, GeocodeMode::Forward);
        assert_eq!(task.payload, TaskPayload::EmptyQuery);
    }

    #[test]
    fn test_forward_bias_center_from_lat_lon_columns() {
        let header = ["address", "lat", "lon"];
        let record = row(&header, &["1 rue x", "49.8974", "2.2901"]);
        let mapping = mapping(&header, &ColumnSpec::default(), GeocodeMode::Forward);

        let task = build_task(&record, &mapping, GeocodeMode::Forward);
        assert_eq!(task.bias_center, Some((49.8974, 2.2901)));
        // Coordinate columns still participate in the default query columns.
        assert!(matches!(task.payload, TaskPayload::Forward { .. }));
    }

    #[test]
    fn test_forward_unparsable_bias_is_ignored() {
        let header = ["address", "lat", "lon"];
        let record = row(&header, &["1 rue x", "north", "east"]);
        let mapping = mapping(&header, &ColumnSpec::default(), GeocodeMode::Forward);

        let task = build_task(&record, &mapping, GeocodeMode::Forward);
        assert_eq!(task.bias_center, None);
    }

    #[test]
    fn test_reverse_parses_coordinates() {
        let header = ["lat", "lon"];
        let record = row(&header, &["49.8974", "2.2901"]);
        let mapping = mapping(&header, &ColumnSpec::default(), GeocodeMode::Reverse);

        let task = build_task(&record, &mapping, GeocodeMode::Reverse);
        assert_eq!(
            task.payload,
            TaskPayload::Reverse {
                lat: 49.8974,
                lon: 2.2901
            }
        );
        assert_eq!(task.bias_center, None);
    }

    #[test]
    fn test_reverse_unparsable_coordinates_short_circuit() {
        let header = ["lat", "lon"];
        let record = row(&header, &["abc", "2.2901"]);
        let mapping = mapping(&header, &ColumnSpec::default(), GeocodeMode::Reverse);

        let task = build_task(&record, &mapping, GeocodeMode::Reverse);
        assert!(matches!(
            task.payload,
            TaskPayload::InvalidCoordinates { .. }
        ));
    }

    #[test]
    fn test_reverse_blank_coordinates_short_circuit() {
        let header = ["lat", "lon"];
        let record = row(&header, &["", ""]);
        let mapping = mapping(&header, &ColumnSpec::default(), GeocodeMode::Reverse);

        let task = build_task(&record, &mapping, GeocodeMode::Reverse);
        assert!(matches!(
            task.payload,
            TaskPayload::InvalidCoordinates { .. }
        ));
    }

    #[test]
    fn test_filters_skip_empty_cells() {
        let header = ["address", "insee", "dept"];
        let record = row(&header, &["1 rue x", "80021", " "]);
        let spec = ColumnSpec {
            filters: vec![
                ("citycode".to_string(), "insee".to_string()),
                ("postcode".to_string(), "dept".to_string()),
            ],
            ..ColumnSpec::default()
        };
        let mapping = mapping(&header, &spec, GeocodeMode::Forward);

        let task = build_task(&record, &mapping, GeocodeMode::Forward);
        assert_eq!(
            task.filters,
            vec![("citycode".to_string(), "80021".to_string())]
        );
    }
}
