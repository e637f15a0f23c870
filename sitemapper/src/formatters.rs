use std::io::{Cursor, Write};

use anyhow::{anyhow, Result};
use enum_dispatch::enum_dispatch;
use itertools::Itertools;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    aggregate::{AggregateView, CountyYield, RegionYield, ScalarMetrics},
    error::SitemapperResult,
    COL,
};

/// Utility function to convert from polars `AnyValue` to `serde_json::Value`.
/// Only covers the types the dashboard frames carry.
fn any_value_to_json(value: &AnyValue) -> Result<Value> {
    match value {
        AnyValue::Null => Ok(Value::Null),
        AnyValue::Boolean(b) => Ok(Value::Bool(*b)),
        AnyValue::String(s) => Ok(Value::String((*s).to_string())),
        AnyValue::Int32(n) => Ok(json!(*n)),
        AnyValue::Int64(n) => Ok(json!(*n)),
        AnyValue::UInt32(n) => Ok(json!(*n)),
        AnyValue::UInt64(n) => Ok(json!(*n)),
        AnyValue::Float32(n) => Ok(json!(*n)),
        AnyValue::Float64(n) => Ok(json!(*n)),
        _ => Err(anyhow!("Failed to convert type")),
    }
}

fn row_properties(df: &DataFrame, idx: usize) -> Result<serde_json::Map<String, Value>> {
    let mut properties = serde_json::Map::new();
    for col in df.get_columns() {
        properties.insert(col.name().to_string(), any_value_to_json(&col.get(idx)?)?);
    }
    Ok(properties)
}

/// Trait to define different output generators. Defines two
/// functions, format which generates a serialized string of the
/// `DataFrame` and save which writes the output to a writer
#[enum_dispatch]
pub trait OutputGenerator {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()>;
    fn format(&self, df: &mut DataFrame) -> Result<String> {
        // Just creating an empty vec to store the buffered output
        let mut data: Vec<u8> = vec![];
        let mut buff = Cursor::new(&mut data);
        self.save(&mut buff, df)?;

        Ok(String::from_utf8(data)?)
    }
}

/// Enum of OutputFormatters one for each potential
/// output type
#[enum_dispatch(OutputGenerator)]
#[derive(Serialize, Deserialize, Debug)]
pub enum OutputFormatter {
    GeoJSON(GeoJSONFormatter),
    Csv(CSVFormatter),
    Json(JSONFormatter),
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct CSVFormatter;

impl OutputGenerator for CSVFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        CsvWriter::new(writer).finish(df)?;
        Ok(())
    }
}

/// Format the frame as a JSON array with one object per row
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct JSONFormatter;

impl OutputGenerator for JSONFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        let rows = (0..df.height())
            .map(|idx| row_properties(df, idx).map(Value::Object))
            .collect::<Result<Vec<_>>>()?;
        serde_json::to_writer(writer, &rows)?;
        Ok(())
    }
}

/// Format facility rows as a geojson collection of points, built from the
/// latitude and longitude columns. Rows without coordinates are left out
/// since a map cannot place them.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct GeoJSONFormatter;

impl OutputGenerator for GeoJSONFormatter {
    fn format(&self, df: &mut DataFrame) -> Result<String> {
        let latitudes = df.column(COL::LATITUDE)?.f64()?;
        let longitudes = df.column(COL::LONGITUDE)?.f64()?;
        let other_cols = df.drop(COL::LATITUDE)?.drop(COL::LONGITUDE)?;
        let mut features: Vec<geojson::Feature> = vec![];

        for (idx, (lat, lon)) in latitudes.into_iter().zip(longitudes).enumerate() {
            if let (Some(lat), Some(lon)) = (lat, lon) {
                let feature = geojson::Feature {
                    geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![
                        lon, lat,
                    ]))),
                    properties: Some(row_properties(&other_cols, idx)?),
                    bbox: None,
                    id: None,
                    foreign_members: None,
                };
                features.push(feature);
            }
        }

        let feature_collection = geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        };
        Ok(feature_collection.to_string())
    }

    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        let result = self.format(df)?;
        writer.write_all(result.as_bytes())?;

        Ok(())
    }
}

/// Conversion of a derived view into a frame for the output formatters.
pub trait ToFrame {
    fn to_frame(&self) -> SitemapperResult<DataFrame>;
}

impl ToFrame for AggregateView {
    fn to_frame(&self) -> SitemapperResult<DataFrame> {
        let mut columns = vec![Series::new(
            &self.key,
            self.rows.iter().map(|row| row.key.as_str()).collect_vec(),
        )];
        for (idx, name) in self.columns.iter().enumerate() {
            columns.push(Series::new(
                name,
                self.rows.iter().map(|row| row.values[idx]).collect_vec(),
            ));
        }
        Ok(DataFrame::new(columns)?)
    }
}

impl ToFrame for [CountyYield] {
    fn to_frame(&self) -> SitemapperResult<DataFrame> {
        Ok(DataFrame::new(vec![
            Series::new(
                COL::COUNTY,
                self.iter().map(|row| row.county.as_str()).collect_vec(),
            ),
            Series::new(
                COL::REGION,
                self.iter().map(|row| row.region.as_deref()).collect_vec(),
            ),
            Series::new(COL::TX_NEW, self.iter().map(|row| row.tx_new).collect_vec()),
            Series::new(COL::TESTED, self.iter().map(|row| row.tested).collect_vec()),
            Series::new(
                COL::POSITIVE,
                self.iter().map(|row| row.positive).collect_vec(),
            ),
        ])?)
    }
}

impl ToFrame for [RegionYield] {
    fn to_frame(&self) -> SitemapperResult<DataFrame> {
        Ok(DataFrame::new(vec![
            Series::new(
                COL::REGION,
                self.iter().map(|row| row.region.as_str()).collect_vec(),
            ),
            Series::new(COL::TX_NEW, self.iter().map(|row| row.tx_new).collect_vec()),
            Series::new(COL::TESTED, self.iter().map(|row| row.tested).collect_vec()),
            Series::new(
                COL::POSITIVE,
                self.iter().map(|row| row.positive).collect_vec(),
            ),
            Series::new(
                "positivity",
                self.iter().map(RegionYield::positivity).collect_vec(),
            ),
        ])?)
    }
}

impl ToFrame for ScalarMetrics {
    fn to_frame(&self) -> SitemapperResult<DataFrame> {
        let metrics: [(&str, Option<i64>); 9] = [
            ("site_count", Some(self.site_count as i64)),
            ("county_count", Some(self.county_count as i64)),
            ("current_on_treatment", Some(self.current_on_treatment)),
            ("previous_on_treatment", self.previous_on_treatment),
            ("new_on_treatment", Some(self.new_on_treatment)),
            ("net_new", self.net_new),
            ("previous_net_new", self.previous_net_new),
            ("new_growth", self.new_growth),
            ("previous_new_growth", self.previous_new_growth),
        ];
        Ok(DataFrame::new(vec![
            Series::new("metric", metrics.iter().map(|(name, _)| *name).collect_vec()),
            Series::new("value", metrics.iter().map(|(_, value)| *value).collect_vec()),
        ])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateRow;

    fn test_df() -> DataFrame {
        df!(
             "mfl_code" => &["13023", "14110", "15002"],
             "count" => &[2i64, 3, 4],
             "latitude" => &[Some(-0.5), None, Some(1.25)],
             "longitude" => &[Some(34.0), Some(36.0), Some(35.5)]
        )
        .unwrap()
    }

    #[test]
    fn geojson_formatter_should_skip_rows_without_coordinates() {
        let formatter = GeoJSONFormatter;
        let mut df = test_df();
        let output = formatter.format(&mut df);
        assert!(output.is_ok(), "Output should not error");
        let output: Value = serde_json::from_str(&output.unwrap()).unwrap();
        let expected = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [34.0, -0.5]},
                    "properties": {"mfl_code": "13023", "count": 2}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [35.5, 1.25]},
                    "properties": {"mfl_code": "15002", "count": 4}
                }
            ]
        });
        assert_eq!(output, expected, "Output should be correct");
    }

    #[test]
    fn csv_formatter_should_work() {
        let formatter = CSVFormatter;
        let mut df = test_df();
        let output = formatter.format(&mut df);
        let correct_str = [
            "mfl_code,count,latitude,longitude",
            "13023,2,-0.5,34.0",
            "14110,3,,36.0",
            "15002,4,1.25,35.5",
            "",
        ]
        .join("\n");

        assert!(output.is_ok(), "Output should not error");
        assert_eq!(output.unwrap(), correct_str, "Output should be correct");
    }

    #[test]
    fn json_formatter_should_write_records() {
        let formatter = JSONFormatter;
        let mut df = test_df().select(["mfl_code", "count"]).unwrap();
        let output = formatter.format(&mut df).unwrap();
        let rows: Vec<Value> = serde_json::from_str(&output).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1]["mfl_code"], "14110");
        assert_eq!(rows[1]["count"], 3);
    }

    #[test]
    fn aggregate_view_to_frame() {
        let view = AggregateView {
            key: COL::COUNTY.into(),
            columns: vec![COL::SITE_COUNT.into()],
            rows: vec![
                AggregateRow {
                    key: "Y".into(),
                    values: vec![1],
                },
                AggregateRow {
                    key: "X".into(),
                    values: vec![2],
                },
            ],
        };
        let mut df = view.to_frame().unwrap();
        let output = CSVFormatter.format(&mut df).unwrap();
        assert_eq!(output, "county,count\nY,1\nX,2\n");
    }
}
